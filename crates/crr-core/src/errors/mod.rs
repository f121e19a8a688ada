//! Error handling for the CRR engine.
//! One error enum per subsystem, `thiserror` only, aggregated into `CrrError`.

pub mod config_error;
pub mod crr_error;
pub mod error_code;
pub mod storage_error;

pub use config_error::ConfigError;
pub use crr_error::{CrrError, CrrResult};
pub use error_code::CrrErrorCode;
pub use storage_error::StorageError;
