//! Persisted replica identity.

use rusqlite::{Connection, OptionalExtension};

use crr_core::errors::CrrResult;
use crr_core::SiteId;

use crate::migrations::v001_bookkeeping::SITE_ID_SQL;
use crate::to_storage_err;

/// Return the database's SiteId, generating and persisting one on first use.
/// Idempotent: later calls (and later processes) read back the same value.
pub fn init_site_id(conn: &Connection) -> CrrResult<SiteId> {
    conn.execute_batch(SITE_ID_SQL)
        .map_err(|e| to_storage_err(e.to_string()))?;

    let existing: Option<Vec<u8>> = conn
        .query_row(
            "SELECT site_id FROM crr_site_id WHERE ordinal = 0",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| to_storage_err(e.to_string()))?;

    if let Some(bytes) = existing {
        return SiteId::from_slice(&bytes);
    }

    let site_id = SiteId::generate();
    conn.execute(
        "INSERT INTO crr_site_id (site_id, ordinal) VALUES (?1, 0)",
        [site_id.as_bytes().as_slice()],
    )
    .map_err(|e| to_storage_err(e.to_string()))?;
    tracing::info!(site_id = %site_id, "generated site id");
    Ok(site_id)
}
