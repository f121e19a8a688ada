//! Configuration for the CRR engine.
//! TOML-based; environment variables override file values.

pub mod crr_config;
pub mod defaults;

pub use crr_config::CrrConfig;
