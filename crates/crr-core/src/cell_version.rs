//! The per-cell last-writer-wins rule.
//!
//! A cell's state is its value plus `(col_version, db_version, site_id)`.
//! Merge keeps the state that is greater under, in order:
//! 1. higher `col_version` (number of writes the cell has seen);
//! 2. higher `db_version` of the authoring transaction;
//! 3. greater `site_id` bytes;
//! 4. greater value under [`compare_values`].
//!
//! Every step is a pure function of the two states, so any two replicas that
//! see the same pair pick the same winner regardless of arrival order.
//! Causal length (row liveness) is resolved before cells are compared and is
//! not part of this rule.
//!
//! # Examples
//!
//! ```
//! use crr_core::{CellVersion, SiteId, Value};
//!
//! let site = SiteId::from_bytes([1; 16]);
//! let local = CellVersion::new(Value::from("b"), 2, 7, site);
//! let remote = CellVersion::new(Value::from("c"), 3, 1, site);
//! assert!(remote.wins_over(&local));
//! ```

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::site::SiteId;
use crate::value::{compare_values, Value};

/// Version metadata plus value for a single cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellVersion {
    pub value: Value,
    pub col_version: i64,
    pub db_version: i64,
    pub site_id: SiteId,
}

impl CellVersion {
    pub fn new(value: Value, col_version: i64, db_version: i64, site_id: SiteId) -> Self {
        Self {
            value,
            col_version,
            db_version,
            site_id,
        }
    }

    /// Total order used by merge. `Equal` means the two states are identical.
    pub fn merge_cmp(&self, other: &Self) -> Ordering {
        self.col_version
            .cmp(&other.col_version)
            .then_with(|| self.db_version.cmp(&other.db_version))
            .then_with(|| self.site_id.cmp(&other.site_id))
            .then_with(|| compare_values(&self.value, &other.value))
    }

    /// Whether `self` (incoming) should replace `current`.
    pub fn wins_over(&self, current: &Self) -> bool {
        self.merge_cmp(current) == Ordering::Greater
    }

    /// Merge `other` into `self`, keeping the greater state.
    pub fn merge(&mut self, other: &Self) {
        if other.wins_over(self) {
            *self = other.clone();
        }
    }
}
