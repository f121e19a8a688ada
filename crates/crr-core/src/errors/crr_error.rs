use super::{ConfigError, StorageError};

/// Top-level error for every engine operation.
///
/// Merge conflicts are not errors: every pair of change records has a
/// defined winner, so there is no conflict variant.
#[derive(Debug, thiserror::Error)]
pub enum CrrError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("table {table} cannot be a CRR: {reason}")]
    Incompatible { table: String, reason: String },

    #[error("persisted engine schema version {persisted} is newer than supported {supported}")]
    SchemaTooNew { persisted: u32, supported: u32 },

    #[error("table {table} is not a CRR")]
    UnknownTable { table: String },

    #[error("invalid change: {reason}")]
    InvalidChange { reason: String },

    #[error("wire format error: {reason}")]
    Wire { reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias used across the engine.
pub type CrrResult<T> = Result<T, CrrError>;
