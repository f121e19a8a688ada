//! The single write connection the engine runs on.

pub mod pragmas;
pub mod write_connection;

pub use write_connection::WriteConnection;
