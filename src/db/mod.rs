pub mod files;
pub mod pool;
pub mod spans;

pub use pool::{DbBusyError, SqlDb};
