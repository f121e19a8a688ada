//! Forward migrations of the engine's own bookkeeping schema.
//!
//! The installed version lives in `crr_master` under `schema_version`.
//! Migrations run in order, each inside its own savepoint, and are safe to
//! re-run: every step uses `IF NOT EXISTS` or checks before altering.

pub mod v001_bookkeeping;
pub mod v002_tracked_peers;
pub mod v003_clock_local_version;

use rusqlite::{Connection, OptionalExtension};

use crr_core::constants::ENGINE_SCHEMA_VERSION;
use crr_core::errors::{CrrError, CrrResult, StorageError};

use crate::sql::{object_exists, with_savepoint};
use crate::to_storage_err;

type Migration = fn(&Connection) -> CrrResult<()>;

const MIGRATIONS: &[(u32, Migration)] = &[
    (1, v001_bookkeeping::migrate),
    (2, v002_tracked_peers::migrate),
    (3, v003_clock_local_version::migrate),
];

const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Create the catalog tables the first time any CRR operation touches a database.
pub fn create_schema_table_if_not_exists(conn: &Connection) -> CrrResult<()> {
    v001_bookkeeping::create_catalog_tables(conn)
}

/// Engine schema version recorded in the database; 0 when never recorded.
pub fn persisted_schema_version(conn: &Connection) -> CrrResult<u32> {
    if !object_exists(conn, "table", "crr_master")? {
        return Ok(0);
    }
    let v: Option<u32> = conn
        .query_row(
            "SELECT value FROM crr_master WHERE key = ?1",
            [SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(v.unwrap_or(0))
}

/// Bring the bookkeeping schema up to [`ENGINE_SCHEMA_VERSION`].
///
/// No-op when already current. Refuses, without writing anything, when the
/// database was written by a newer engine. Returns the version now installed.
pub fn maybe_update_db(conn: &Connection) -> CrrResult<u32> {
    let persisted = persisted_schema_version(conn)?;
    if persisted > ENGINE_SCHEMA_VERSION {
        tracing::warn!(
            persisted,
            supported = ENGINE_SCHEMA_VERSION,
            "refusing to open database written by a newer engine"
        );
        return Err(CrrError::SchemaTooNew {
            persisted,
            supported: ENGINE_SCHEMA_VERSION,
        });
    }

    for &(version, migrate) in MIGRATIONS {
        if version <= persisted {
            continue;
        }
        with_savepoint(conn, "crr_migrate", |conn| {
            migrate(conn).map_err(|e| migration_failed(version, e))?;
            conn.execute(
                "INSERT INTO crr_master (key, value) VALUES (?1, ?2)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
                rusqlite::params![SCHEMA_VERSION_KEY, version],
            )
            .map_err(|e| migration_failed(version, to_storage_err(e.to_string())))?;
            Ok(())
        })?;
        tracing::info!(version, "applied engine schema migration");
    }

    Ok(ENGINE_SCHEMA_VERSION)
}

fn migration_failed(version: u32, err: CrrError) -> CrrError {
    match err {
        CrrError::Storage(StorageError::MigrationFailed { .. }) => err,
        other => CrrError::Storage(StorageError::MigrationFailed {
            version,
            reason: other.to_string(),
        }),
    }
}

/// Add a column to a table if it doesn't already exist. Returns whether it was added.
pub(crate) fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> CrrResult<bool> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1)")
        .map_err(|e| to_storage_err(e.to_string()))?;
    let columns: Vec<String> = stmt
        .query_map([table], |row| row.get::<_, String>(0))
        .map_err(|e| to_storage_err(e.to_string()))?
        .collect::<Result<_, _>>()
        .map_err(|e| to_storage_err(e.to_string()))?;

    if columns.iter().any(|c| c == column) {
        return Ok(false);
    }
    conn.execute_batch(&format!(
        "ALTER TABLE {} ADD COLUMN {} {definition}",
        crate::sql::quote_ident(table),
        crate::sql::quote_ident(column)
    ))
    .map_err(|e| to_storage_err(e.to_string()))?;
    tracing::debug!("added column {table}.{column}");
    Ok(true)
}
