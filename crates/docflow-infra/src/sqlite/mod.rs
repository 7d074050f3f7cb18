//! SQLite persistence for the durable execution log.

pub mod log;
pub mod pool;

pub use log::SqliteExecutionLog;
pub use pool::DatabasePool;
