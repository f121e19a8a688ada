//! Change records and the changeset wire format.
//!
//! A `ChangeRecord` describes the current state of one cell (or, with the
//! sentinel column, one row's liveness). A `Changeset` is the unit shipped
//! between replicas: the records a sender holds above some local version
//! cursor, stamped with the sender and the highest local version included.
//!
//! The JSON encoding is the stable wire contract. It carries an explicit
//! `format_version`; decoders refuse versions they do not know.

use serde::{Deserialize, Serialize};

use crate::cell_version::CellVersion;
use crate::constants::{SENTINEL_COLUMN, WIRE_FORMAT_VERSION};
use crate::errors::{CrrError, CrrResult};
use crate::site::SiteId;
use crate::value::Value;

/// One versioned cell (or row-liveness) state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Table the record belongs to.
    pub table: String,
    /// Primary key values, in primary-key column order.
    pub pk: Vec<Value>,
    /// Column name, or [`SENTINEL_COLUMN`] for row create/delete records.
    pub cid: String,
    /// Cell value. Always `Null` for sentinel records.
    pub val: Value,
    /// Number of writes this cell has seen. For sentinels, equal to `cl`.
    pub col_version: i64,
    /// DbVersion of the transaction that authored this state.
    pub db_version: i64,
    /// Site that authored this state.
    pub site_id: SiteId,
    /// Order of this write within its authoring transaction.
    pub seq: i64,
    /// Causal length of the row: odd = live, even = deleted.
    pub cl: i64,
}

impl ChangeRecord {
    pub fn is_sentinel(&self) -> bool {
        self.cid == SENTINEL_COLUMN
    }

    /// Whether the record describes a deleted row.
    pub fn is_tombstone(&self) -> bool {
        self.cl % 2 == 0
    }

    pub fn cell_version(&self) -> CellVersion {
        CellVersion::new(
            self.val.clone(),
            self.col_version,
            self.db_version,
            self.site_id,
        )
    }
}

/// Batch of change records exchanged between replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub format_version: u32,
    /// Replica that produced the batch.
    pub sender: SiteId,
    /// Highest sender-local version included; the receiver's next cursor.
    pub until_version: i64,
    pub changes: Vec<ChangeRecord>,
}

impl Changeset {
    pub fn new(sender: SiteId, until_version: i64, changes: Vec<ChangeRecord>) -> Self {
        Self {
            format_version: WIRE_FORMAT_VERSION,
            sender,
            until_version,
            changes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn to_json(&self) -> CrrResult<String> {
        serde_json::to_string(self).map_err(|e| CrrError::Wire {
            reason: e.to_string(),
        })
    }

    pub fn from_json(json: &str) -> CrrResult<Self> {
        let changeset: Changeset = serde_json::from_str(json).map_err(|e| CrrError::Wire {
            reason: e.to_string(),
        })?;
        if changeset.format_version > WIRE_FORMAT_VERSION {
            return Err(CrrError::Wire {
                reason: format!(
                    "changeset format {} is newer than supported {WIRE_FORMAT_VERSION}",
                    changeset.format_version
                ),
            });
        }
        Ok(changeset)
    }
}

/// What merging a single record did to local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOutcome {
    /// The record was dominated by, or identical to, local state.
    Ignored,
    /// The record won and replaced a cell (or created the row).
    Applied,
    /// The record was a newer tombstone and the row was removed.
    RowDeleted,
    /// The record carried a newer live causal length and revived the row.
    RowResurrected,
}

impl MergeOutcome {
    pub fn changed_state(&self) -> bool {
        !matches!(self, MergeOutcome::Ignored)
    }
}

/// Direction of a peer watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerEvent {
    Received,
    Sent,
}

impl PeerEvent {
    pub fn as_i64(&self) -> i64 {
        match self {
            PeerEvent::Received => 0,
            PeerEvent::Sent => 1,
        }
    }
}
