//! v001: master key/value table, site identity, and the CRR catalog.

use rusqlite::Connection;

use crr_core::errors::CrrResult;

use crate::to_storage_err;

pub const CATALOG_SQL: &str = "
    CREATE TABLE IF NOT EXISTS crr_master (
        key   TEXT PRIMARY KEY,
        value
    );

    CREATE TABLE IF NOT EXISTS crr_tables (
        tbl_name       TEXT PRIMARY KEY,
        pk_columns     TEXT NOT NULL,
        schema_hash    TEXT NOT NULL,
        schema_version INTEGER NOT NULL,
        created_at     TEXT NOT NULL
    );
";

pub const SITE_ID_SQL: &str = "
    CREATE TABLE IF NOT EXISTS crr_site_id (
        site_id BLOB NOT NULL,
        ordinal INTEGER PRIMARY KEY
    );
    CREATE UNIQUE INDEX IF NOT EXISTS crr_site_id_idx ON crr_site_id (site_id);
";

pub fn create_catalog_tables(conn: &Connection) -> CrrResult<()> {
    conn.execute_batch(CATALOG_SQL)
        .map_err(|e| to_storage_err(e.to_string()))
}

pub fn migrate(conn: &Connection) -> CrrResult<()> {
    tracing::info!("v001: creating bookkeeping tables");
    create_catalog_tables(conn)?;
    conn.execute_batch(SITE_ID_SQL)
        .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(())
}
