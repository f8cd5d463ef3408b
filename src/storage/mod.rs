//! Storage drivers - concrete store links behind [`Driver`](crate::connection::Driver)

pub mod sqlite;

pub use sqlite::{SqliteDriver, SqliteDriverError, SqliteStatement};
