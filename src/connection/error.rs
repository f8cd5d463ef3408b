//! Connection failure taxonomy
//!
//! Every store error is classified exactly once, at the connection boundary,
//! into an [`ErrorKind`]. Retry and propagation decisions match on the kind;
//! nothing downstream inspects error messages.

use std::fmt;

/// Normalized failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Link could not be established or was dropped
    ConnectionLost,
    /// Server closed the link ("server has gone away")
    ServerGoneAway,
    /// Unspecified server failure that leaves the link unusable
    GeneralError,
    /// Malformed or unexpected protocol traffic
    ProtocolError,
    /// Uniqueness constraint violated
    DuplicateKey,
    /// Syntax or semantic error in the statement
    Query,
    /// Server-side timeout (lock wait, read/write timeout, busy)
    Timeout,
    Deadlock,
    /// Server no longer knows the prepared statement
    PreparedStatementNotFound,
    Authentication,
    UnknownDatabase,
    /// Transaction state misuse (commit without begin, nested begin)
    Transaction,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionLost => "connection lost",
            ErrorKind::ServerGoneAway => "server gone away",
            ErrorKind::GeneralError => "general error",
            ErrorKind::ProtocolError => "unknown protocol error",
            ErrorKind::DuplicateKey => "duplicate key",
            ErrorKind::Query => "query error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Deadlock => "deadlock",
            ErrorKind::PreparedStatementNotFound => "prepared statement not found",
            ErrorKind::Authentication => "authentication failure",
            ErrorKind::UnknownDatabase => "unknown database",
            ErrorKind::Transaction => "transaction state",
            ErrorKind::Other => "other",
        }
    }

    /// Eligible for retry under the connection's retry budget
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionLost
                | ErrorKind::ServerGoneAway
                | ErrorKind::GeneralError
                | ErrorKind::ProtocolError
                | ErrorKind::Timeout
                | ErrorKind::Deadlock
                | ErrorKind::PreparedStatementNotFound
        )
    }

    /// The physical link itself is unusable and must be dropped
    pub fn is_link_level(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionLost
                | ErrorKind::ServerGoneAway
                | ErrorKind::GeneralError
                | ErrorKind::ProtocolError
        )
    }

    /// Classify a MySQL server or client error number
    pub fn from_mysql_code(code: u32) -> Self {
        match code {
            2006 => ErrorKind::ServerGoneAway,
            2002 | 2003 | 2005 | 2013 | 2055 => ErrorKind::ConnectionLost,
            2027 | 1156 | 1157 | 1158 | 1159 | 1160 | 1161 => ErrorKind::ProtocolError,
            1062 | 1586 | 1022 => ErrorKind::DuplicateKey,
            1064 | 1054 | 1146 | 1149 | 1136 | 1166 | 1292 | 1366 => ErrorKind::Query,
            1205 | 3024 => ErrorKind::Timeout,
            1213 => ErrorKind::Deadlock,
            1243 | 1615 => ErrorKind::PreparedStatementNotFound,
            1044 | 1045 | 1142 | 1143 | 1227 | 1698 => ErrorKind::Authentication,
            1049 => ErrorKind::UnknownDatabase,
            _ => ErrorKind::Other,
        }
    }

    /// Classify a five-character SQLSTATE
    pub fn from_sqlstate(state: &str) -> Self {
        match state {
            "HY000" => ErrorKind::GeneralError,
            "08S01" => ErrorKind::ConnectionLost,
            "40001" => ErrorKind::Deadlock,
            "HYT00" => ErrorKind::Timeout,
            "28000" => ErrorKind::Authentication,
            "3D000" => ErrorKind::UnknownDatabase,
            "26000" => ErrorKind::PreparedStatementNotFound,
            "23505" => ErrorKind::DuplicateKey,
            _ if state.starts_with("08") => ErrorKind::ConnectionLost,
            _ if state.starts_with("42") => ErrorKind::Query,
            _ => ErrorKind::Other,
        }
    }

    /// Classify a CQL native protocol error code
    pub fn from_cql_code(code: u32) -> Self {
        match code {
            0x0000 => ErrorKind::GeneralError,
            0x000A => ErrorKind::ProtocolError,
            0x0100 => ErrorKind::Authentication,
            0x1000 | 0x1002 => ErrorKind::ConnectionLost,
            0x1001 | 0x1100 | 0x1200 => ErrorKind::Timeout,
            0x2000 | 0x2200 | 0x2300 => ErrorKind::Query,
            0x2100 => ErrorKind::Authentication,
            0x2400 => ErrorKind::DuplicateKey,
            0x2500 => ErrorKind::PreparedStatementNotFound,
            _ => ErrorKind::Other,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A classified store failure
#[derive(Debug)]
pub struct ConnectionError {
    kind: ErrorKind,
    code: Option<String>,
    message: String,
    retries: u32,
    source: Option<BoxError>,
}

impl ConnectionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            retries: 0,
            source: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub(crate) fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn not_in_transaction() -> Self {
        Self::new(ErrorKind::Transaction, "Not currently in a transaction")
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Native store error code, when the store reported one
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// How many retries were spent before this error surfaced
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn is_duplicate_key(&self) -> bool {
        self.kind == ErrorKind::DuplicateKey
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code {})", code)?;
        }
        if self.retries > 0 {
            write!(f, " after {} retries", self.retries)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_classification() {
        assert_eq!(ErrorKind::from_mysql_code(2006), ErrorKind::ServerGoneAway);
        assert_eq!(ErrorKind::from_mysql_code(1062), ErrorKind::DuplicateKey);
        assert_eq!(ErrorKind::from_mysql_code(1064), ErrorKind::Query);
        assert_eq!(ErrorKind::from_mysql_code(1243), ErrorKind::PreparedStatementNotFound);
        assert_eq!(ErrorKind::from_mysql_code(1045), ErrorKind::Authentication);
        assert_eq!(ErrorKind::from_mysql_code(9999), ErrorKind::Other);
    }

    #[test]
    fn test_recoverability() {
        assert!(!ErrorKind::DuplicateKey.is_recoverable());
        assert!(!ErrorKind::Query.is_recoverable());
        assert!(!ErrorKind::Authentication.is_recoverable());
        assert!(ErrorKind::Timeout.is_recoverable());
        assert!(!ErrorKind::Timeout.is_link_level());
        assert!(ErrorKind::ServerGoneAway.is_link_level());
        assert!(ErrorKind::GeneralError.is_link_level());
        assert!(ErrorKind::ProtocolError.is_link_level());
    }

    #[test]
    fn test_cql_and_sqlstate() {
        assert_eq!(ErrorKind::from_cql_code(0x2500), ErrorKind::PreparedStatementNotFound);
        assert_eq!(ErrorKind::from_cql_code(0x1200), ErrorKind::Timeout);
        assert_eq!(ErrorKind::from_cql_code(0x2000), ErrorKind::Query);
        assert_eq!(ErrorKind::from_sqlstate("HY000"), ErrorKind::GeneralError);
        assert_eq!(ErrorKind::from_sqlstate("08006"), ErrorKind::ConnectionLost);
        assert_eq!(ErrorKind::from_sqlstate("42P01"), ErrorKind::Query);
    }

    #[test]
    fn test_display_includes_code_and_retries() {
        let err = ConnectionError::new(ErrorKind::Timeout, "lock wait timeout")
            .with_code("1205")
            .with_retries(2);
        assert_eq!(err.to_string(), "lock wait timeout (code 1205) after 2 retries");
        assert_eq!(
            ConnectionError::not_in_transaction().to_string(),
            "Not currently in a transaction"
        );
    }
}
