// Single source of truth for all default values.

pub const DEFAULT_BACKFILL_BATCH_SIZE: usize = 1_000;
pub const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5_000;
pub const DEFAULT_WAL_MODE: bool = true;
pub const DEFAULT_EXCLUDE_PEER_OWN_CHANGES: bool = true;
