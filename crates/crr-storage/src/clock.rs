//! Per-database logical clock.
//!
//! The first CRR write in a host transaction allocates `committed + 1` as the
//! transaction's pending DbVersion; every later write in the same transaction
//! reuses it. The commit hook promotes pending to committed, the rollback hook
//! discards it. Sequence numbers order the writes inside one transaction and
//! reset at each boundary.
//!
//! On open, `committed` is seeded from the highest version persisted in any
//! clock table (and the floor left by dropped CRRs), so versions are never
//! reused across restarts.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension};

use crr_core::errors::CrrResult;

use crate::catalog;
use crate::sql::{clock_table_name, quote_ident};
use crate::to_storage_err;

#[derive(Debug, Default)]
struct ClockState {
    committed: i64,
    pending: Option<i64>,
    seq: i64,
}

/// Monotonic DbVersion allocator shared by triggers, merge, and backfill.
#[derive(Debug, Default)]
pub struct LogicalClock {
    state: Mutex<ClockState>,
}

impl LogicalClock {
    pub fn new(committed: i64) -> Self {
        Self {
            state: Mutex::new(ClockState {
                committed,
                ..ClockState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        // Plain counters; a panic mid-update cannot leave them inconsistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last committed DbVersion.
    pub fn current(&self) -> i64 {
        self.lock().committed
    }

    /// DbVersion of the open transaction, allocating it on first use.
    pub fn next(&self) -> i64 {
        let mut state = self.lock();
        match state.pending {
            Some(v) => v,
            None => {
                let v = state.committed + 1;
                state.pending = Some(v);
                v
            }
        }
    }

    /// Pending DbVersion without allocating.
    pub fn pending(&self) -> Option<i64> {
        self.lock().pending
    }

    /// Next sequence number within the open transaction.
    pub fn next_seq(&self) -> i64 {
        let mut state = self.lock();
        let seq = state.seq;
        state.seq += 1;
        seq
    }

    pub fn on_commit(&self) {
        let mut state = self.lock();
        if let Some(v) = state.pending.take() {
            state.committed = state.committed.max(v);
        }
        state.seq = 0;
    }

    pub fn on_rollback(&self) {
        let mut state = self.lock();
        state.pending = None;
        state.seq = 0;
    }
}

/// Highest DbVersion persisted anywhere in the database.
pub fn fetch_db_version_from_storage(conn: &Connection) -> CrrResult<i64> {
    let mut max = catalog::read_version_floor(conn)?;
    for entry in catalog::list_crrs(conn)? {
        let sql = format!(
            "SELECT max(\"__crr_local_version\") FROM {}",
            quote_ident(&clock_table_name(&entry.table))
        );
        let v: Option<i64> = conn
            .query_row(&sql, [], |row| row.get(0))
            .optional()
            .map_err(|e| to_storage_err(e.to_string()))?
            .flatten();
        if let Some(v) = v {
            max = max.max(v);
        }
    }
    Ok(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_version_per_transaction() {
        let clock = LogicalClock::new(4);
        assert_eq!(clock.next(), 5);
        assert_eq!(clock.next(), 5);
        assert_eq!(clock.current(), 4);
        clock.on_commit();
        assert_eq!(clock.current(), 5);
        assert_eq!(clock.next(), 6);
    }

    #[test]
    fn rollback_discards_pending() {
        let clock = LogicalClock::new(0);
        assert_eq!(clock.next(), 1);
        assert_eq!(clock.next_seq(), 0);
        assert_eq!(clock.next_seq(), 1);
        clock.on_rollback();
        assert_eq!(clock.pending(), None);
        assert_eq!(clock.next_seq(), 0);
        assert_eq!(clock.next(), 1);
    }

    #[test]
    fn commit_without_writes_keeps_version() {
        let clock = LogicalClock::new(3);
        clock.on_commit();
        assert_eq!(clock.current(), 3);
    }
}
