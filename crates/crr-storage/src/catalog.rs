//! The schema catalog: which tables are CRRs, their primary keys, and the
//! column-layout hash their triggers were generated from.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crr_core::constants::ENGINE_SCHEMA_VERSION;
use crr_core::errors::CrrResult;

use crate::sql::{clock_table_name, object_exists};
use crate::to_storage_err;

const VERSION_FLOOR_KEY: &str = "db_version_floor";

/// One registered CRR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub table: String,
    pub pk_columns: Vec<String>,
    pub schema_hash: String,
    pub schema_version: u32,
    pub created_at: String,
}

/// Whether `table` is registered as a CRR and its clock table exists.
pub fn is_crr(conn: &Connection, table: &str) -> CrrResult<bool> {
    if !object_exists(conn, "table", "crr_tables")? {
        return Ok(false);
    }
    Ok(get(conn, table)?.is_some() && object_exists(conn, "table", &clock_table_name(table))?)
}

pub fn get(conn: &Connection, table: &str) -> CrrResult<Option<CatalogEntry>> {
    conn.query_row(
        "SELECT tbl_name, pk_columns, schema_hash, schema_version, created_at
         FROM crr_tables WHERE tbl_name = ?1",
        [table],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, String>(4)?,
            ))
        },
    )
    .optional()
    .map_err(|e| to_storage_err(e.to_string()))?
    .map(entry_from_row)
    .transpose()
}

/// All registered CRRs, ordered by name. Empty when the catalog does not exist yet.
pub fn list_crrs(conn: &Connection) -> CrrResult<Vec<CatalogEntry>> {
    if !object_exists(conn, "table", "crr_tables")? {
        return Ok(Vec::new());
    }
    let mut stmt = conn
        .prepare(
            "SELECT tbl_name, pk_columns, schema_hash, schema_version, created_at
             FROM crr_tables ORDER BY tbl_name",
        )
        .map_err(|e| to_storage_err(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, String>(4)?,
            ))
        })
        .map_err(|e| to_storage_err(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| to_storage_err(e.to_string()))?;
    rows.into_iter().map(entry_from_row).collect()
}

fn entry_from_row(
    (table, pk_json, schema_hash, schema_version, created_at): (
        String,
        String,
        String,
        u32,
        String,
    ),
) -> CrrResult<CatalogEntry> {
    let pk_columns: Vec<String> = serde_json::from_str(&pk_json)
        .map_err(|e| to_storage_err(format!("corrupt pk_columns for {table}: {e}")))?;
    Ok(CatalogEntry {
        table,
        pk_columns,
        schema_hash,
        schema_version,
        created_at,
    })
}

/// Register or refresh a CRR. Keeps the original `created_at`.
pub fn upsert(
    conn: &Connection,
    table: &str,
    pk_columns: &[String],
    schema_hash: &str,
) -> CrrResult<()> {
    let pk_json = serde_json::to_string(pk_columns)
        .map_err(|e| to_storage_err(format!("failed to encode pk columns: {e}")))?;
    conn.execute(
        "INSERT INTO crr_tables (tbl_name, pk_columns, schema_hash, schema_version, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (tbl_name) DO UPDATE SET
            pk_columns = excluded.pk_columns,
            schema_hash = excluded.schema_hash,
            schema_version = excluded.schema_version",
        rusqlite::params![
            table,
            pk_json,
            schema_hash,
            ENGINE_SCHEMA_VERSION,
            Utc::now().to_rfc3339()
        ],
    )
    .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(())
}

pub fn remove(conn: &Connection, table: &str) -> CrrResult<()> {
    conn.execute("DELETE FROM crr_tables WHERE tbl_name = ?1", [table])
        .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(())
}

/// Versions handed out by dropped CRRs survive here so they are never reissued.
pub fn read_version_floor(conn: &Connection) -> CrrResult<i64> {
    if !object_exists(conn, "table", "crr_master")? {
        return Ok(0);
    }
    let v: Option<i64> = conn
        .query_row(
            "SELECT value FROM crr_master WHERE key = ?1",
            [VERSION_FLOOR_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(v.unwrap_or(0))
}

pub fn write_version_floor(conn: &Connection, version: i64) -> CrrResult<()> {
    conn.execute(
        "INSERT INTO crr_master (key, value) VALUES (?1, ?2)
         ON CONFLICT (key) DO UPDATE SET value = max(value, excluded.value)",
        rusqlite::params![VERSION_FLOOR_KEY, version],
    )
    .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(())
}
