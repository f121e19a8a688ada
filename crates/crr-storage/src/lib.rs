//! # crr-storage
//!
//! SQLite-hosted engine for conflict-free replicated relations: converts
//! plain tables into CRRs, records every cell write as a versioned change
//! through generated triggers, backfills pre-existing rows, and merges change
//! records from peers deterministically.
//!
//! All state is per connection and threaded explicitly through a
//! [`CrrContext`]; the engine owns no threads.

pub mod backfill;
pub mod catalog;
pub mod clock;
pub mod connection;
pub mod context;
pub mod conversion;
pub mod engine;
pub mod merge;
pub mod migrations;
pub mod peers;
pub mod site_id;
pub mod sql;
pub mod table_info;

pub use backfill::backfill_table;
pub use catalog::is_crr;
pub use clock::LogicalClock;
pub use context::CrrContext;
pub use conversion::{
    begin_alter, commit_alter, create_crr, drop_crr, is_table_compatible,
    remove_crr_triggers_if_exist,
};
pub use engine::CrrEngine;
pub use merge::{apply_changeset, changes_since, merge_change, MergeReport};
pub use migrations::{create_schema_table_if_not_exists, maybe_update_db};
pub use peers::init_peer_tracking_table;
pub use site_id::init_site_id;
pub use table_info::{ensure_table_infos_are_up_to_date, TableInfo};

use crr_core::errors::{CrrError, StorageError};

/// Convert a host storage error message into a `CrrError`.
pub(crate) fn to_storage_err(message: String) -> CrrError {
    CrrError::Storage(StorageError::Sqlite { message })
}
