//! Error types for sqlentity operations.

use std::fmt;

/// The primary error type for all sqlentity operations.
///
/// Logical commit outcomes (nothing to insert, update-only violated, hook
/// veto) are reported as `Ok(false)` by the entity layer and never surface
/// here. This enum carries driver failures and configuration mistakes.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (open, lost handle)
    Connection(ConnectionError),
    /// Query execution errors reported by the driver
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction bookkeeping errors
    Transaction(TransactionError),
    /// Schema metadata / registration errors
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to open the database
    Connect,
    /// The handle is no longer usable
    Disconnected,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    /// Native driver error code (SQLite extended result code, MySQL errno).
    pub code: Option<i32>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Duplicate key on a unique or primary key index
    UniqueViolation,
    /// Referenced row missing or still referenced
    ForeignKeyViolation,
    /// Any other constraint (NOT NULL, CHECK)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied / read-only database
    Permission,
    /// Database is locked or busy
    Busy,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Commit requested with no open transaction
    NotActive,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a configuration error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    /// Is this a duplicate-key violation?
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Query(q) => q.is_unique_violation(),
            _ => false,
        }
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        match self {
            Error::Query(q) => q.is_foreign_key_violation(),
            _ => false,
        }
    }

    /// Is this a schema/registration error?
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Get SQLSTATE if available (e.g., "23505" for unique violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Native driver error code if available.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Query(q) => q.code,
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl QueryError {
    /// Create a query error without driver codes.
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            sql: None,
            code: None,
            sqlstate: None,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the statement text.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.kind == QueryErrorKind::UniqueViolation
            || self.sqlstate.as_deref() == Some("23505")
            || self.code == Some(1062)
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        self.kind == QueryErrorKind::ForeignKeyViolation
            || self.sqlstate.as_deref() == Some("23503")
            || matches!(self.code, Some(1451 | 1452))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => match (&e.code, &e.sqlstate) {
                (Some(code), _) => write!(f, "Query error ({}): {}", code, e.message),
                (None, Some(sqlstate)) => {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                }
                (None, None) => write!(f, "Query error: {}", e.message),
            },
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for sqlentity operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_helpers_by_kind_and_sqlstate() {
        let query = QueryError {
            kind: QueryErrorKind::Constraint,
            sql: Some("INSERT INTO t VALUES (1)".to_string()),
            code: None,
            sqlstate: Some("23505".to_string()),
            message: "unique violation".to_string(),
            source: None,
        };
        assert!(query.is_unique_violation());
        assert!(!query.is_foreign_key_violation());

        let err = Error::Query(query);
        assert!(err.is_unique_violation());
        assert_eq!(err.sqlstate(), Some("23505"));
        assert_eq!(err.sql(), Some("INSERT INTO t VALUES (1)"));

        let fk = Error::Query(QueryError::new(
            QueryErrorKind::ForeignKeyViolation,
            "FOREIGN KEY constraint failed",
        ));
        assert!(fk.is_foreign_key_violation());
        assert!(!fk.is_unique_violation());
    }

    #[test]
    fn mysql_codes_are_recognised() {
        let mut dup = QueryError::new(QueryErrorKind::Database, "Duplicate entry");
        dup.code = Some(1062);
        assert!(dup.is_unique_violation());

        let mut fk = QueryError::new(QueryErrorKind::Database, "Cannot add or update");
        fk.code = Some(1452);
        assert!(fk.is_foreign_key_violation());
    }

    #[test]
    fn display_prefers_driver_code() {
        let mut q = QueryError::new(QueryErrorKind::Busy, "database is locked");
        q.code = Some(5);
        assert_eq!(Error::Query(q).to_string(), "Query error (5): database is locked");

        let cfg = Error::config("field 'name' registered twice");
        assert!(cfg.is_config_error());
        assert_eq!(
            cfg.to_string(),
            "Configuration error: field 'name' registered twice"
        );
    }
}
