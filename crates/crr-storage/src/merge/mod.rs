//! Exchanging changes: extracting local records and merging remote ones.

pub mod apply;
pub mod changes;

pub use apply::{apply_changeset, merge_change};
pub use changes::changes_since;

use crr_core::MergeOutcome;

/// Tally of what applying a changeset did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub applied: usize,
    pub ignored: usize,
    pub rows_deleted: usize,
    pub rows_resurrected: usize,
}

impl MergeReport {
    pub fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Ignored => self.ignored += 1,
            MergeOutcome::Applied => self.applied += 1,
            MergeOutcome::RowDeleted => self.rows_deleted += 1,
            MergeOutcome::RowResurrected => self.rows_resurrected += 1,
        }
    }

    /// Records that changed local state.
    pub fn changed(&self) -> usize {
        self.applied + self.rows_deleted + self.rows_resurrected
    }

    pub fn total(&self) -> usize {
        self.changed() + self.ignored
    }
}
