//! Store-facing primitives a [`ResilientConnection`](super::ResilientConnection) drives

use super::error::ConnectionError;
use crate::value::Value;

/// Outcome of a write statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Execution {
    pub affected_rows: u64,
    /// Identifier generated by the store for the last inserted row, if any
    pub last_insert_id: Option<i64>,
}

/// One result row: column names paired with values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }
}

/// The minimal capability set of one physical store link.
///
/// Drivers are blocking and single-link. Any per-call native resource
/// (cursor, statement borrow) must be released before `execute`/`query`
/// return, on success and failure alike.
pub trait Driver {
    /// Compiled statement handle
    type Handle;
    /// Raw store error, classified through [`Driver::classify`]
    type Error: std::error::Error + Send + Sync + 'static;

    /// Short store name used in logs and cache keys
    fn name(&self) -> &str;

    fn connect(&mut self) -> Result<(), Self::Error>;

    fn is_connected(&self) -> bool;

    fn disconnect(&mut self);

    /// Make `name` the active database/keyspace of the open link
    fn select_database(&mut self, name: &str) -> Result<(), Self::Error>;

    /// Whether `name` can be selected at all
    fn database_exists(&mut self, _name: &str) -> Result<bool, Self::Error> {
        Ok(true)
    }

    fn prepare(&mut self, text: &str) -> Result<Self::Handle, Self::Error>;

    /// Free a handle evicted from the statement cache
    fn release(&mut self, _handle: Self::Handle) {}

    fn execute(&mut self, handle: &Self::Handle, params: &[Value]) -> Result<Execution, Self::Error>;

    fn query(&mut self, handle: &Self::Handle, params: &[Value]) -> Result<Vec<Row>, Self::Error>;

    /// Execute without preparing (used while prepares are delayed)
    fn execute_direct(&mut self, text: &str, params: &[Value]) -> Result<Execution, Self::Error>;

    fn query_direct(&mut self, text: &str, params: &[Value]) -> Result<Vec<Row>, Self::Error>;

    fn begin(&mut self) -> Result<(), Self::Error>;

    fn commit(&mut self) -> Result<(), Self::Error>;

    fn rollback(&mut self) -> Result<(), Self::Error>;

    /// Normalize a raw store error into the connection taxonomy
    fn classify(&self, error: Self::Error) -> ConnectionError;

    /// Whether a server-side timeout is answered by re-preparing the
    /// statement on the same link (wide-column stores) instead of treating
    /// the link as broken.
    fn reprepare_on_timeout(&self) -> bool {
        false
    }
}
