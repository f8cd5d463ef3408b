//! SQLite driver

use std::path::{Path, PathBuf};

use rusqlite::{ffi, params_from_iter, Connection, ErrorCode};

use crate::connection::{ConnectionError, Driver, ErrorKind, Execution, Row};
use crate::value::Value;

/// Errors raised by [`SqliteDriver`]
#[derive(Debug, thiserror::Error)]
pub enum SqliteDriverError {
    #[error("SQLite database is not open")]
    NotConnected,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// A prepared statement; compiled statements live in rusqlite's own cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteStatement {
    sql: String,
}

impl SqliteStatement {
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// One SQLite database file (or in-memory database) as a store link.
///
/// The "database" of a SQLite link is its file: selecting another database
/// reopens the link on that path. In-memory databases do not survive a
/// reconnect.
#[derive(Debug)]
pub struct SqliteDriver {
    path: Option<PathBuf>,
    conn: Option<Connection>,
}

impl SqliteDriver {
    /// Driver for a database file, created on first connect if missing
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            conn: None,
        }
    }

    /// Driver for a private in-memory database
    pub fn in_memory() -> Self {
        Self { path: None, conn: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<&Connection, SqliteDriverError> {
        self.conn.as_ref().ok_or(SqliteDriverError::NotConnected)
    }

    fn run(&self, sql: &str, params: &[Value]) -> Result<Execution, SqliteDriverError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let affected = stmt.execute(params_from_iter(params.iter()))?;
        let is_insert = sql.trim_start().get(..6).is_some_and(|head| head.eq_ignore_ascii_case("insert"));

        Ok(Execution {
            affected_rows: affected as u64,
            last_insert_id: (is_insert && affected > 0).then(|| conn.last_insert_rowid()),
        })
    }

    fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SqliteDriverError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                (0..width).map(|i| row.get::<_, Value>(i)).collect::<rusqlite::Result<Vec<_>>>()
            })?
            .map(|values| values.map(|v| Row::new(columns.clone(), v)))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl Driver for SqliteDriver {
    type Handle = SqliteStatement;
    type Error = SqliteDriverError;

    fn name(&self) -> &str {
        "sqlite"
    }

    fn connect(&mut self) -> Result<(), SqliteDriverError> {
        let conn = match &self.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        self.conn = Some(conn);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!("Failed to close SQLite database cleanly: {}", e);
            }
        }
    }

    fn select_database(&mut self, name: &str) -> Result<(), SqliteDriverError> {
        let target = (name != ":memory:").then(|| PathBuf::from(name));
        if target == self.path && self.conn.is_some() {
            return Ok(());
        }
        self.disconnect();
        self.path = target;
        self.connect()
    }

    fn database_exists(&mut self, name: &str) -> Result<bool, SqliteDriverError> {
        if name == ":memory:" {
            return Ok(true);
        }
        let path = Path::new(name);
        // A missing file is created on open as long as its directory exists
        Ok(path.exists()
            || path
                .parent()
                .is_some_and(|dir| dir.as_os_str().is_empty() || dir.is_dir()))
    }

    fn prepare(&mut self, text: &str) -> Result<SqliteStatement, SqliteDriverError> {
        // Compile once so syntax errors surface here; the compiled form
        // goes back into the connection's statement cache on drop.
        self.conn()?.prepare_cached(text)?;
        Ok(SqliteStatement { sql: text.to_string() })
    }

    fn release(&mut self, handle: SqliteStatement) {
        tracing::trace!("Released statement: {}", handle.sql);
    }

    fn execute(&mut self, handle: &SqliteStatement, params: &[Value]) -> Result<Execution, SqliteDriverError> {
        self.run(&handle.sql, params)
    }

    fn query(&mut self, handle: &SqliteStatement, params: &[Value]) -> Result<Vec<Row>, SqliteDriverError> {
        self.fetch(&handle.sql, params)
    }

    fn execute_direct(&mut self, text: &str, params: &[Value]) -> Result<Execution, SqliteDriverError> {
        let conn = self.conn()?;
        if params.is_empty() && text.trim_end().trim_end_matches(';').contains(';') {
            conn.execute_batch(text)?;
            return Ok(Execution {
                affected_rows: conn.changes() as u64,
                last_insert_id: None,
            });
        }
        self.run(text, params)
    }

    fn query_direct(&mut self, text: &str, params: &[Value]) -> Result<Vec<Row>, SqliteDriverError> {
        self.fetch(text, params)
    }

    fn begin(&mut self) -> Result<(), SqliteDriverError> {
        self.conn()?.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SqliteDriverError> {
        self.conn()?.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SqliteDriverError> {
        self.conn()?.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn classify(&self, error: SqliteDriverError) -> ConnectionError {
        let (kind, code) = match &error {
            SqliteDriverError::NotConnected => (ErrorKind::ConnectionLost, None),
            SqliteDriverError::Sqlite(rusqlite::Error::SqliteFailure(failure, _)) => {
                (classify_sqlite(failure), Some(failure.extended_code))
            }
            // Binding and column conversion problems are statement errors
            SqliteDriverError::Sqlite(_) => (ErrorKind::Query, None),
        };

        let mut err = ConnectionError::new(kind, error.to_string());
        if let Some(code) = code {
            err = err.with_code(code.to_string());
        }
        err.with_source(error)
    }
}

fn classify_sqlite(failure: &ffi::Error) -> ErrorKind {
    match failure.code {
        ErrorCode::ConstraintViolation => match failure.extended_code {
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE => ErrorKind::DuplicateKey,
            _ => ErrorKind::Query,
        },
        ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ErrorKind::Timeout,
        ErrorCode::SchemaChanged => ErrorKind::PreparedStatementNotFound,
        ErrorCode::PermissionDenied | ErrorCode::AuthorizationForStatementDenied => ErrorKind::Authentication,
        ErrorCode::CannotOpen | ErrorCode::NotADatabase => ErrorKind::ConnectionLost,
        ErrorCode::SystemIoFailure => ErrorKind::GeneralError,
        // SQLITE_ERROR: syntax errors, missing tables and columns
        ErrorCode::Unknown | ErrorCode::TypeMismatch | ErrorCode::TooBig | ErrorCode::ParameterOutOfRange => {
            ErrorKind::Query
        }
        _ => ErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::connection::ResilientConnection;
    use crate::statement::Statement;
    use tempfile::TempDir;

    fn connected() -> SqliteDriver {
        let mut driver = SqliteDriver::in_memory();
        driver.connect().unwrap();
        driver
            .execute_direct(
                "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, email TEXT UNIQUE, age INTEGER);",
                &[],
            )
            .unwrap();
        driver
    }

    #[test]
    fn test_execute_and_query() {
        let mut driver = connected();
        let insert = driver.prepare("INSERT INTO users (email, age) VALUES (?, ?)").unwrap();

        let first = driver.execute(&insert, &[Value::from("a@x.io"), Value::from(30)]).unwrap();
        assert_eq!(first.affected_rows, 1);
        assert_eq!(first.last_insert_id, Some(1));

        driver.execute(&insert, &[Value::from("b@x.io"), Value::Null]).unwrap();

        let rows = driver
            .query_direct("SELECT id, email, age FROM users ORDER BY id", &[])
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].columns(), ["id", "email", "age"]);
        assert_eq!(rows[1].get("email"), Some(&Value::from("b@x.io")));
        assert_eq!(rows[1].get("age"), Some(&Value::Null));
    }

    #[test]
    fn test_update_reports_no_insert_id() {
        let mut driver = connected();
        driver
            .execute_direct("INSERT INTO users (email) VALUES (?)", &[Value::from("a@x.io")])
            .unwrap();
        let update = driver
            .execute_direct("UPDATE users SET age = ?", &[Value::from(1)])
            .unwrap();
        assert_eq!(update.affected_rows, 1);
        assert_eq!(update.last_insert_id, None);
    }

    #[test]
    fn test_duplicate_key_classification() {
        let mut driver = connected();
        let sql = "INSERT INTO users (email) VALUES (?)";
        driver.execute_direct(sql, &[Value::from("a@x.io")]).unwrap();
        let err = driver.execute_direct(sql, &[Value::from("a@x.io")]).unwrap_err();

        let classified = driver.classify(err);
        assert_eq!(classified.kind(), ErrorKind::DuplicateKey);
        assert_eq!(classified.code(), Some(ffi::SQLITE_CONSTRAINT_UNIQUE.to_string().as_str()));
    }

    #[test]
    fn test_syntax_error_classification() {
        let mut driver = connected();
        let err = driver.prepare("SELEC nope").unwrap_err();
        assert_eq!(driver.classify(err).kind(), ErrorKind::Query);

        let err = driver.query_direct("SELECT * FROM missing", &[]).unwrap_err();
        assert_eq!(driver.classify(err).kind(), ErrorKind::Query);
    }

    #[test]
    fn test_not_connected() {
        let mut driver = SqliteDriver::in_memory();
        let err = driver.execute_direct("SELECT 1", &[]).unwrap_err();
        assert!(matches!(err, SqliteDriverError::NotConnected));
        assert_eq!(driver.classify(err).kind(), ErrorKind::ConnectionLost);
    }

    #[test]
    fn test_transactions() {
        let mut driver = connected();
        driver.begin().unwrap();
        driver
            .execute_direct("INSERT INTO users (email) VALUES (?)", &[Value::from("a@x.io")])
            .unwrap();
        driver.rollback().unwrap();

        let rows = driver.query_direct("SELECT * FROM users", &[]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_select_database_reopens_file() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.db");
        let second = dir.path().join("second.db");

        let mut driver = SqliteDriver::open(&first);
        driver.connect().unwrap();
        driver.execute_direct("CREATE TABLE t (x INTEGER);", &[]).unwrap();

        let second_name = second.to_string_lossy().into_owned();
        assert!(driver.database_exists(&second_name).unwrap());
        driver.select_database(&second_name).unwrap();
        assert_eq!(driver.path(), Some(second.as_path()));
        assert!(driver.query_direct("SELECT * FROM t", &[]).is_err());

        driver.select_database(&first.to_string_lossy()).unwrap();
        assert!(driver.query_direct("SELECT * FROM t", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_missing_directory_is_not_a_database() {
        let mut driver = SqliteDriver::in_memory();
        assert!(!driver.database_exists("/definitely/not/here/x.db").unwrap());
        assert!(driver.database_exists(":memory:").unwrap());
    }

    #[test]
    fn test_resilient_connection_over_sqlite() {
        let dir = TempDir::new().unwrap();
        let mut conn = ResilientConnection::new(SqliteDriver::open(dir.path().join("app.db")), ConnectionConfig::default());

        conn.run_query(&Statement::raw("CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT)"))
            .unwrap();
        let insert = Statement::new("INSERT INTO kv (k, v) VALUES (?, ?)", vec!["a".into(), "1".into()]);
        assert_eq!(conn.run_query(&insert).unwrap(), 1);

        let err = conn.run_query(&insert).unwrap_err();
        assert!(err.is_duplicate_key());
        assert_eq!(conn.last_retry_count(), 0);

        // The link was dropped after the failure and comes back on demand
        let rows = conn.fetch_results(&Statement::raw("SELECT v FROM kv")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("v"), Some(&Value::from("1")));
    }
}
