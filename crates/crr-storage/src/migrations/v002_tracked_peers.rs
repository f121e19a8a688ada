//! v002: per-peer watermarks for incremental exchange.

use rusqlite::Connection;

use crr_core::errors::CrrResult;

use crate::to_storage_err;

pub const TRACKED_PEERS_SQL: &str = "
    CREATE TABLE IF NOT EXISTS crr_tracked_peers (
        site_id BLOB NOT NULL,
        event   INTEGER NOT NULL,
        version INTEGER NOT NULL,
        PRIMARY KEY (site_id, event)
    ) WITHOUT ROWID;
";

pub fn migrate(conn: &Connection) -> CrrResult<()> {
    tracing::info!("v002: creating tracked peers table");
    conn.execute_batch(TRACKED_PEERS_SQL)
        .map_err(|e| to_storage_err(e.to_string()))
}
