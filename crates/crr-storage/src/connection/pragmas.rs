//! PRAGMA configuration applied to the write connection.
//!
//! WAL mode (file-backed only), NORMAL sync, configurable busy_timeout,
//! trusted schema so generated triggers may call the engine's functions.

use rusqlite::Connection;

use crr_core::errors::CrrResult;
use crr_core::CrrConfig;

use crate::to_storage_err;

/// Apply connection pragmas. `file_backed` gates WAL, which in-memory databases ignore.
pub fn apply_pragmas(conn: &Connection, config: &CrrConfig, file_backed: bool) -> CrrResult<()> {
    if file_backed && config.wal_mode {
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(|e| to_storage_err(e.to_string()))?;
    }
    conn.execute_batch(&format!(
        "
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = {};
        PRAGMA trusted_schema = ON;
        ",
        config.busy_timeout_ms
    ))
    .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(())
}

/// Verify that WAL mode is active on a connection.
pub fn verify_wal_mode(conn: &Connection) -> CrrResult<bool> {
    let mode: String = conn
        .pragma_query_value(None, "journal_mode", |row| row.get(0))
        .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(mode.eq_ignore_ascii_case("wal"))
}
