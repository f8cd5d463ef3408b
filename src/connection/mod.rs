//! Resilient connection - bounded retry and reconnect over one store link
//!
//! Every query runs through a retry wrapper:
//! 1. recycle a link that has been open longer than the recycle interval
//!    (never inside a transaction), or connect if there is no link
//! 2. run the unit of work (prepare + bind + execute)
//! 3. classify a failure; non-recoverable kinds are raised at once
//! 4. link-level failures drop the link, or are raised as-is inside a
//!    transaction; otherwise back off 1-30 ms and try again
//! 5. once the retry budget is spent, disconnect and raise
//!
//! The failing statement is evicted from the prepared-statement cache on
//! every failed attempt.

pub mod cache;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod shared_cache;

pub use cache::{normalize_key, StatementCache};
pub use driver::{Driver, Execution, Row};
pub use error::{ConnectionError, ErrorKind};
pub use metrics::{CollectingSink, MetricsSink, NoopSink, QueryMode, QuerySpan, SpanId, SpanTracker, TracingSink};
pub use shared_cache::{MemoryCache, SharedCache};

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::ConnectionConfig;
use crate::statement::Statement;
use crate::Result;

const CONNECT_BACKOFF_MS: RangeInclusive<u64> = 1..=5;
const RETRY_BACKOFF_MS: RangeInclusive<u64> = 1..=30;
const MAX_TRACKED_STATEMENTS: usize = 1024;

fn backoff(range: RangeInclusive<u64>) {
    let ms = rand::thread_rng().gen_range(range);
    std::thread::sleep(Duration::from_millis(ms));
}

/// One store link with retry, reconnect, statement caching and transactions.
///
/// Not safe for concurrent use; give each worker its own connection.
pub struct ResilientConnection<D: Driver> {
    driver: D,
    config: ConnectionConfig,
    database: Option<String>,
    statements: StatementCache<D::Handle>,
    seen: HashMap<String, u32>,
    in_transaction: bool,
    connected_at: Option<Instant>,
    spans: SpanTracker,
    metrics: Arc<dyn MetricsSink>,
    shared_cache: Option<Arc<dyn SharedCache>>,
    last_retry_count: u32,
    last_insert_id: Option<i64>,
}

impl<D: Driver> ResilientConnection<D> {
    pub fn new(driver: D, config: ConnectionConfig) -> Self {
        let statements = StatementCache::new(config.max_prepared_statements);
        Self {
            driver,
            config,
            database: None,
            statements,
            seen: HashMap::new(),
            in_transaction: false,
            connected_at: None,
            spans: SpanTracker::default(),
            metrics: Arc::new(TracingSink),
            shared_cache: None,
            last_retry_count: 0,
            last_insert_id: None,
        }
    }

    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    pub fn with_shared_cache(mut self, cache: Arc<dyn SharedCache>) -> Self {
        self.shared_cache = Some(cache);
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Retries spent by the most recent query
    pub fn last_retry_count(&self) -> u32 {
        self.last_retry_count
    }

    /// Store-generated identifier of the most recent write, if any
    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }

    pub fn cached_statements(&self) -> usize {
        self.statements.len()
    }

    /// Establish the link unless it is already up
    pub fn connect(&mut self) -> Result<()> {
        if self.driver.is_connected() {
            return Ok(());
        }

        let attempts = self.config.connect_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.driver.connect() {
                Ok(()) => break,
                Err(e) => {
                    let failure = self.driver.classify(e);
                    tracing::debug!(
                        "Connect attempt {}/{} to {} failed: {}",
                        attempt,
                        attempts,
                        self.driver.name(),
                        failure
                    );
                    if attempt >= attempts || !failure.is_recoverable() {
                        let mut err = ConnectionError::new(
                            failure.kind(),
                            format!(
                                "Unable to connect to {} after {} attempts: {}",
                                self.driver.name(),
                                attempt,
                                failure.message()
                            ),
                        );
                        if let Some(code) = failure.code() {
                            err = err.with_code(code.to_string());
                        }
                        return Err(err.with_source(failure).into());
                    }
                    backoff(CONNECT_BACKOFF_MS);
                }
            }
        }

        self.connected_at = Some(Instant::now());
        tracing::debug!("Connected to {}", self.driver.name());

        if let Some(name) = self.database.clone() {
            if let Err(e) = self.apply_database(&name) {
                self.disconnect();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Drop the link and every prepared statement; safe when already closed
    pub fn disconnect(&mut self) {
        for handle in self.statements.drain() {
            self.driver.release(handle);
        }
        if self.in_transaction {
            tracing::warn!("Disconnecting {} with an open transaction", self.driver.name());
            self.in_transaction = false;
        }
        if self.driver.is_connected() {
            self.driver.disconnect();
            tracing::debug!("Disconnected from {}", self.driver.name());
        }
        self.connected_at = None;
    }

    /// Select a database; applied now if connected, otherwise on next connect
    pub fn switch_database(&mut self, name: &str) -> Result<()> {
        self.database = Some(name.to_string());
        if self.driver.is_connected() {
            self.apply_database(name)?;
        }
        Ok(())
    }

    fn apply_database(&mut self, name: &str) -> Result<()> {
        let key = format!("daokit:database:{}:{}", self.driver.name(), name);
        let verified = self
            .shared_cache
            .as_ref()
            .is_some_and(|cache| cache.get(&key).is_some());

        if !verified {
            let exists = self
                .driver
                .database_exists(name)
                .map_err(|e| self.driver.classify(e))?;
            if !exists {
                return Err(ConnectionError::new(
                    ErrorKind::UnknownDatabase,
                    format!("Unknown database '{}'", name),
                )
                .into());
            }
            if let Some(cache) = &self.shared_cache {
                cache.set(&key, "1".to_string(), None);
            }
        }

        self.driver
            .select_database(name)
            .map_err(|e| self.driver.classify(e))?;
        // Handles were compiled against the previous database
        for handle in self.statements.drain() {
            self.driver.release(handle);
        }
        Ok(())
    }

    /// Run a write and report the affected row count
    pub fn run_query(&mut self, statement: &Statement) -> Result<u64> {
        Ok(self.execute(statement)?.affected_rows)
    }

    /// Run a write and report the full execution outcome
    pub fn execute(&mut self, statement: &Statement) -> Result<Execution> {
        let span = self.spans.start(QueryMode::Write, &statement.text);
        let result = self.with_retries(statement, |driver, handle, stmt| match handle {
            Some(h) => driver.execute(h, &stmt.params),
            None => driver.execute_direct(&stmt.text, &stmt.params),
        });
        self.finish_span(span)?;

        let execution = result?;
        self.last_insert_id = execution.last_insert_id;
        Ok(execution)
    }

    /// Run a read and return every row
    pub fn fetch_results(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        let span = self.spans.start(QueryMode::Read, &statement.text);
        let result = self.with_retries(statement, |driver, handle, stmt| match handle {
            Some(h) => driver.query(h, &stmt.params),
            None => driver.query_direct(&stmt.text, &stmt.params),
        });
        self.finish_span(span)?;
        result
    }

    fn finish_span(&mut self, id: SpanId) -> Result<()> {
        let span = self.spans.stop(id)?;
        self.metrics.record(&span);
        Ok(())
    }

    pub fn start_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(ConnectionError::new(ErrorKind::Transaction, "Already in a transaction").into());
        }
        self.ensure_link()?;
        self.driver.begin().map_err(|e| self.driver.classify(e))?;
        self.in_transaction = true;
        tracing::debug!("Transaction started on {}", self.driver.name());
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(ConnectionError::not_in_transaction().into());
        }

        let result = self.driver.commit().map_err(|e| self.driver.classify(e));
        if let Err(failure) = &result {
            tracing::warn!("Commit failed, rolling back: {}", failure);
            if let Err(e) = self.driver.rollback() {
                tracing::debug!("Rollback after failed commit also failed: {}", e);
            }
        }
        self.in_transaction = false;
        Ok(result?)
    }

    pub fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(ConnectionError::not_in_transaction().into());
        }

        let result = self.driver.rollback().map_err(|e| self.driver.classify(e));
        self.in_transaction = false;
        Ok(result?)
    }

    /// Run `work` inside a transaction, committing on success and rolling
    /// back on error
    pub fn transaction<T>(&mut self, work: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.start_transaction()?;
        match work(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if self.in_transaction {
                    if let Err(rb) = self.rollback() {
                        tracing::warn!("Rollback failed: {}", rb);
                    }
                }
                Err(e)
            }
        }
    }

    fn link_expired(&self) -> bool {
        self.connected_at
            .is_some_and(|at| at.elapsed() >= self.config.recycle_after())
    }

    /// Step 1: make sure there is a fresh link to work on
    fn ensure_link(&mut self) -> Result<()> {
        if self.driver.is_connected() {
            if !self.in_transaction && self.link_expired() {
                tracing::debug!("Recycling connection to {}", self.driver.name());
                self.disconnect();
                self.connect()?;
            }
            return Ok(());
        }

        if self.in_transaction {
            self.in_transaction = false;
            tracing::error!("Link to {} dropped inside a transaction", self.driver.name());
            return Err(ConnectionError::new(
                ErrorKind::ConnectionLost,
                "Connection lost inside a transaction",
            )
            .into());
        }
        self.connect()
    }

    /// Whether a failure leaves the link unusable
    fn breaks_link(&self, failure: &ConnectionError) -> bool {
        match failure.kind() {
            ErrorKind::Timeout => !self.driver.reprepare_on_timeout(),
            kind => kind.is_link_level(),
        }
    }

    fn note_use(&mut self, key: &str) -> u32 {
        if self.seen.len() >= MAX_TRACKED_STATEMENTS && !self.seen.contains_key(key) {
            self.seen.clear();
        }
        let count = self.seen.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    fn invalidate(&mut self, key: &str) {
        if let Some(handle) = self.statements.remove(key) {
            self.driver.release(handle);
        }
    }

    /// Step 2: one attempt of prepare + bind + execute
    fn attempt<T, F>(&mut self, key: &str, statement: &Statement, work: &mut F) -> std::result::Result<T, D::Error>
    where
        F: FnMut(&mut D, Option<&D::Handle>, &Statement) -> std::result::Result<T, D::Error>,
    {
        if self.note_use(key) <= self.config.delayed_prepares {
            return work(&mut self.driver, None, statement);
        }

        if self.statements.capacity() == 0 {
            let handle = self.driver.prepare(&statement.text)?;
            let out = work(&mut self.driver, Some(&handle), statement);
            self.driver.release(handle);
            return out;
        }

        if !self.statements.contains(key) {
            let handle = self.driver.prepare(&statement.text)?;
            for evicted in self.statements.insert(key.to_string(), handle) {
                self.driver.release(evicted);
            }
        }
        work(&mut self.driver, self.statements.get(key), statement)
    }

    fn with_retries<T, F>(&mut self, statement: &Statement, mut work: F) -> Result<T>
    where
        F: FnMut(&mut D, Option<&D::Handle>, &Statement) -> std::result::Result<T, D::Error>,
    {
        let key = normalize_key(&statement.text);
        let mut retries = 0u32;
        let mut reprepared = false;
        self.last_retry_count = 0;

        loop {
            self.ensure_link()?;

            let failure = match self.attempt(&key, statement, &mut work) {
                Ok(out) => {
                    self.last_retry_count = retries;
                    return Ok(out);
                }
                Err(e) => self.driver.classify(e),
            };
            self.invalidate(&key);

            if failure.kind() == ErrorKind::PreparedStatementNotFound && !reprepared {
                reprepared = true;
                tracing::debug!("Re-preparing statement unknown to the server: {}", key);
                continue;
            }

            if !failure.is_recoverable() {
                // Inside a transaction the caller still owns the link and
                // must be able to roll back.
                if !self.in_transaction {
                    self.disconnect();
                }
                return Err(failure.with_retries(retries).into());
            }

            if self.in_transaction && self.breaks_link(&failure) {
                tracing::error!(
                    "Link failure inside a transaction on {}, not retrying: {}",
                    self.driver.name(),
                    failure
                );
                self.disconnect();
                return Err(failure.with_retries(retries).into());
            }

            // The server has already rolled the whole transaction back.
            if self.in_transaction && failure.kind() == ErrorKind::Deadlock {
                tracing::error!(
                    "Deadlock inside a transaction on {}, transaction rolled back: {}",
                    self.driver.name(),
                    failure
                );
                self.in_transaction = false;
                return Err(failure.with_retries(retries).into());
            }

            if retries >= self.config.retries {
                self.disconnect();
                tracing::error!("Query failed after {} retries: {}", retries, failure);
                return Err(failure.with_retries(retries).into());
            }

            if self.breaks_link(&failure) {
                self.disconnect();
            }
            retries += 1;
            tracing::warn!(
                "Retrying query ({}/{}) after {}: {}",
                retries,
                self.config.retries,
                failure.kind(),
                failure
            );
            backoff(RETRY_BACKOFF_MS);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted driver failing with MySQL error numbers on demand

    use super::*;
    use crate::value::Value;
    use std::collections::VecDeque;

    #[derive(Debug, thiserror::Error)]
    #[error("scripted store error {code}")]
    pub struct ScriptedError {
        pub code: u32,
    }

    #[derive(Debug, Default)]
    pub struct ScriptedDriver {
        pub connected: bool,
        pub connects: u32,
        pub disconnects: u32,
        pub connect_failures: VecDeque<u32>,
        pub failures: VecDeque<u32>,
        pub commit_failure: Option<u32>,
        pub executions: u32,
        pub prepares: u32,
        pub released: u32,
        pub direct_executions: u32,
        pub begins: u32,
        pub commits: u32,
        pub rollbacks: u32,
        pub rows: Vec<Row>,
        pub affected: u64,
        pub insert_id: Option<i64>,
        pub selected: Vec<String>,
        pub existence_checks: u32,
        pub missing_databases: Vec<String>,
        pub timeout_reprepares: bool,
        pub statements: Vec<String>,
    }

    impl ScriptedDriver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_with(codes: &[u32]) -> Self {
            Self {
                failures: codes.iter().copied().collect(),
                ..Self::default()
            }
        }

        fn run(&mut self, text: &str) -> std::result::Result<(), ScriptedError> {
            self.executions += 1;
            self.statements.push(text.to_string());
            match self.failures.pop_front() {
                Some(code) => {
                    // Link-level failures take the link down with them
                    if ErrorKind::from_mysql_code(code).is_link_level() {
                        self.connected = false;
                    }
                    Err(ScriptedError { code })
                }
                None => Ok(()),
            }
        }
    }

    impl Driver for ScriptedDriver {
        type Handle = String;
        type Error = ScriptedError;

        fn name(&self) -> &str {
            "scripted"
        }

        fn connect(&mut self) -> std::result::Result<(), ScriptedError> {
            self.connects += 1;
            if let Some(code) = self.connect_failures.pop_front() {
                return Err(ScriptedError { code });
            }
            self.connected = true;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn disconnect(&mut self) {
            self.disconnects += 1;
            self.connected = false;
        }

        fn select_database(&mut self, name: &str) -> std::result::Result<(), ScriptedError> {
            self.selected.push(name.to_string());
            Ok(())
        }

        fn database_exists(&mut self, name: &str) -> std::result::Result<bool, ScriptedError> {
            self.existence_checks += 1;
            Ok(!self.missing_databases.iter().any(|m| m == name))
        }

        fn prepare(&mut self, text: &str) -> std::result::Result<String, ScriptedError> {
            self.prepares += 1;
            Ok(text.to_string())
        }

        fn release(&mut self, _handle: String) {
            self.released += 1;
        }

        fn execute(&mut self, handle: &String, _params: &[Value]) -> std::result::Result<Execution, ScriptedError> {
            self.run(handle)?;
            Ok(Execution {
                affected_rows: self.affected,
                last_insert_id: self.insert_id,
            })
        }

        fn query(&mut self, handle: &String, _params: &[Value]) -> std::result::Result<Vec<Row>, ScriptedError> {
            self.run(handle)?;
            Ok(self.rows.clone())
        }

        fn execute_direct(&mut self, text: &str, _params: &[Value]) -> std::result::Result<Execution, ScriptedError> {
            self.direct_executions += 1;
            self.run(text)?;
            Ok(Execution {
                affected_rows: self.affected,
                last_insert_id: self.insert_id,
            })
        }

        fn query_direct(&mut self, text: &str, _params: &[Value]) -> std::result::Result<Vec<Row>, ScriptedError> {
            self.direct_executions += 1;
            self.run(text)?;
            Ok(self.rows.clone())
        }

        fn begin(&mut self) -> std::result::Result<(), ScriptedError> {
            self.begins += 1;
            Ok(())
        }

        fn commit(&mut self) -> std::result::Result<(), ScriptedError> {
            self.commits += 1;
            match self.commit_failure.take() {
                Some(code) => Err(ScriptedError { code }),
                None => Ok(()),
            }
        }

        fn rollback(&mut self) -> std::result::Result<(), ScriptedError> {
            self.rollbacks += 1;
            Ok(())
        }

        fn classify(&self, error: ScriptedError) -> ConnectionError {
            let code = error.code;
            ConnectionError::new(ErrorKind::from_mysql_code(code), error.to_string())
                .with_code(code.to_string())
                .with_source(error)
        }

        fn reprepare_on_timeout(&self) -> bool {
            self.timeout_reprepares
        }
    }
}
