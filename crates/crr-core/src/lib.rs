//! # crr-core
//!
//! Foundation crate for conflict-free replicated relations.
//! Defines the cell value model and its total order, site identity,
//! change records and their wire format, the per-cell merge rule,
//! errors, config, and constants. The storage crate depends on this.

pub mod cell_version;
pub mod change;
pub mod config;
pub mod constants;
pub mod errors;
pub mod site;
pub mod value;

// Re-export the most commonly used types at the crate root.
pub use cell_version::CellVersion;
pub use change::{ChangeRecord, Changeset, MergeOutcome, PeerEvent};
pub use config::CrrConfig;
pub use errors::{CrrError, CrrResult};
pub use site::SiteId;
pub use value::{compare_values, Value};
