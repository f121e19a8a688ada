//! Status codes for the host integration boundary.

use super::{ConfigError, CrrError, StorageError};

/// Maps errors to the integer status and string code a host binding reports.
/// Zero is reserved for success and is never returned.
pub trait CrrErrorCode {
    /// Stable string code (e.g., "INCOMPATIBLE_TABLE").
    fn error_code(&self) -> &'static str;

    /// Non-zero integer status.
    fn status_code(&self) -> i32;

    /// Formatted `[ERROR_CODE] message` string for out-parameters.
    fn status_message(&self) -> String
    where
        Self: std::fmt::Display,
    {
        format!("[{}] {}", self.error_code(), self)
    }
}

pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
pub const MIGRATION_FAILED: &str = "MIGRATION_FAILED";
pub const INCOMPATIBLE_TABLE: &str = "INCOMPATIBLE_TABLE";
pub const SCHEMA_TOO_NEW: &str = "SCHEMA_TOO_NEW";
pub const UNKNOWN_TABLE: &str = "UNKNOWN_TABLE";
pub const INVALID_CHANGE: &str = "INVALID_CHANGE";
pub const WIRE_ERROR: &str = "WIRE_ERROR";
pub const CONFIG_ERROR: &str = "CONFIG_ERROR";

impl CrrErrorCode for CrrError {
    fn error_code(&self) -> &'static str {
        match self {
            CrrError::Storage(StorageError::Sqlite { .. }) => STORAGE_ERROR,
            CrrError::Storage(StorageError::MigrationFailed { .. }) => MIGRATION_FAILED,
            CrrError::Incompatible { .. } => INCOMPATIBLE_TABLE,
            CrrError::SchemaTooNew { .. } => SCHEMA_TOO_NEW,
            CrrError::UnknownTable { .. } => UNKNOWN_TABLE,
            CrrError::InvalidChange { .. } => INVALID_CHANGE,
            CrrError::Wire { .. } => WIRE_ERROR,
            CrrError::Config(_) => CONFIG_ERROR,
        }
    }

    fn status_code(&self) -> i32 {
        match self {
            CrrError::Storage(StorageError::Sqlite { .. }) => 1,
            CrrError::Storage(StorageError::MigrationFailed { .. }) => 2,
            CrrError::Incompatible { .. } => 3,
            CrrError::SchemaTooNew { .. } => 4,
            CrrError::UnknownTable { .. } => 5,
            CrrError::InvalidChange { .. } => 6,
            CrrError::Wire { .. } => 7,
            CrrError::Config(_) => 8,
        }
    }
}

impl CrrErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        CONFIG_ERROR
    }

    fn status_code(&self) -> i32 {
        8
    }
}
