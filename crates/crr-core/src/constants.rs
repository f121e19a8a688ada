/// Engine crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the engine's own bookkeeping schema this build understands.
pub const ENGINE_SCHEMA_VERSION: u32 = 3;

/// Version of the `Changeset` wire encoding produced by this build.
pub const WIRE_FORMAT_VERSION: u32 = 1;

/// Column name used by row-level (create/delete) change records.
pub const SENTINEL_COLUMN: &str = "-1";

/// Prefix reserved for the engine's bookkeeping columns and tables.
pub const RESERVED_PREFIX: &str = "__crr_";

/// Suffix appended to a table name to form its clock table.
pub const CLOCK_TABLE_SUFFIX: &str = "__crr_clock";

/// Length of a site identifier in bytes.
pub const SITE_ID_LEN: usize = 16;
