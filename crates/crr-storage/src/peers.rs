//! Peer tracking: durable per-peer watermarks of exchanged versions.
//!
//! A watermark is the highest *sender-local* version exchanged in one
//! direction. Received watermarks advance only after a changeset has been
//! applied; writes never move a watermark backwards.

use rusqlite::{Connection, OptionalExtension};

use crr_core::errors::CrrResult;
use crr_core::{PeerEvent, SiteId};

use crate::migrations::v002_tracked_peers::TRACKED_PEERS_SQL;
use crate::to_storage_err;

pub fn init_peer_tracking_table(conn: &Connection) -> CrrResult<()> {
    conn.execute_batch(TRACKED_PEERS_SQL)
        .map_err(|e| to_storage_err(e.to_string()))
}

/// Advance the watermark for `(peer, event)` to `version` if higher.
pub fn record_peer_version(
    conn: &Connection,
    peer: &SiteId,
    event: PeerEvent,
    version: i64,
) -> CrrResult<()> {
    conn.execute(
        "INSERT INTO crr_tracked_peers (site_id, event, version) VALUES (?1, ?2, ?3)
         ON CONFLICT (site_id, event) DO UPDATE SET version = max(version, excluded.version)",
        rusqlite::params![peer.as_bytes().as_slice(), event.as_i64(), version],
    )
    .map_err(|e| to_storage_err(e.to_string()))?;
    tracing::debug!(peer = %peer, ?event, version, "peer watermark recorded");
    Ok(())
}

/// Current watermark for `(peer, event)`; 0 when nothing was exchanged yet.
pub fn peer_version(conn: &Connection, peer: &SiteId, event: PeerEvent) -> CrrResult<i64> {
    let v: Option<i64> = conn
        .query_row(
            "SELECT version FROM crr_tracked_peers WHERE site_id = ?1 AND event = ?2",
            rusqlite::params![peer.as_bytes().as_slice(), event.as_i64()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(v.unwrap_or(0))
}

/// All known peers and their watermarks.
pub fn list_peers(conn: &Connection) -> CrrResult<Vec<(SiteId, PeerEvent, i64)>> {
    let mut stmt = conn
        .prepare("SELECT site_id, event, version FROM crr_tracked_peers ORDER BY site_id, event")
        .map_err(|e| to_storage_err(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })
        .map_err(|e| to_storage_err(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| to_storage_err(e.to_string()))?;
    rows.into_iter()
        .map(|(site, event, version)| {
            let event = if event == PeerEvent::Sent.as_i64() {
                PeerEvent::Sent
            } else {
                PeerEvent::Received
            };
            Ok((SiteId::from_slice(&site)?, event, version))
        })
        .collect()
}
