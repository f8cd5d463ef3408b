//! # Daokit - Resilient DAO Persistence Engine
//!
//! Change-tracking records persisted through a self-healing connection.
//!
//! Daokit provides:
//! - Records with a declared schema that report exactly what changed since
//!   the last save or load
//! - Counter and set property types written as relative updates
//! - A persistence mapper choosing INSERT, UPDATE or upsert per record state
//! - A connection that retries, reconnects and recycles with a bounded budget
//! - SQLite, MySQL and CQL statement dialects, and a SQLite driver

pub mod value;
pub mod value_type;
pub mod record;
pub mod connection;
pub mod statement;
pub mod mapper;
pub mod storage;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use value::Value;
pub use value_type::{Counter, PropertyKind, PropertyValue, UniqueSet};
pub use record::{Change, ChangeSet, Dao, Record, RecordType, SchemaBuilder, Transform};
pub use connection::{ConnectionError, ErrorKind, ResilientConnection};
pub use statement::{Dialect, Statement};
pub use mapper::PersistenceMapper;
pub use storage::SqliteDriver;

/// Result type alias for Daokit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Daokit operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("DAO not found: {0}")]
    DaoNotFound(String),

    #[error("Too many results: {0}")]
    TooManyResults(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Data store error: {0}")]
    DataStore(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid value for {property}: {reason}")]
    Validation { property: String, reason: String },

    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// A uniqueness constraint rejected the write
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Error::Connection(e) if e.is_duplicate_key())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::DaoNotFound(_))
    }

    /// The store kind of a connection failure, if this is one
    pub fn connection_kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Connection(e) => Some(e.kind()),
            _ => None,
        }
    }
}
