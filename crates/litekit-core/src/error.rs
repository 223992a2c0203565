//! Error types for litekit operations.
//!
//! Every failure carries the SQLite-style result code that the connection
//! also records as its last error. Failures that never reached the engine
//! (a closed connection, a bad argument count, a cursor misuse) use the code
//! SQLite itself would have reported for the same mistake.

use std::fmt;

/// The primary error type for all litekit operations.
#[derive(Debug)]
pub enum Error {
    /// Opening, closing, or using a connection that is not usable
    Connection(ConnectionError),
    /// Statement compilation or execution errors
    Query(QueryError),
    /// Parameter binding errors
    Bind(BindError),
    /// Result cursor misuse
    Cursor(CursorError),
    /// Configuration errors
    Config(ConfigError),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub code: i32,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to open the database
    Open,
    /// Operation attempted on a connection that is not open
    NotOpen,
    /// Another top-level operation is in flight on this connection
    InUse,
    /// The engine refused to release the handle
    Close,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub code: i32,
    pub sql: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// The engine could not compile the statement
    Prepare,
    /// Stepping the statement failed (constraint, busy after retries, ...)
    Step,
}

#[derive(Debug)]
pub struct BindError {
    pub kind: BindErrorKind,
    pub code: i32,
    pub sql: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindErrorKind {
    /// Supplied argument count differs from the statement's parameter count
    CountMismatch { expected: usize, actual: usize },
    /// A named argument matches no parameter in the statement
    UnknownParameter,
    /// Two named arguments resolve to the same parameter
    DuplicateParameter,
    /// The engine rejected a bind call
    Native,
}

#[derive(Debug)]
pub struct CursorError {
    pub kind: CursorErrorKind,
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorErrorKind {
    /// The cursor was closed, explicitly or by its connection
    Closed,
    /// All rows have been read
    Exhausted,
    /// `next()` has not produced a row yet
    NoRow,
    /// No column with the requested name
    UnknownColumn,
    /// Column index past the end of the row
    IndexOutOfRange,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// The result code recorded for this failure.
    pub fn code(&self) -> i32 {
        match self {
            Error::Connection(e) => e.code,
            Error::Query(e) => e.code,
            Error::Bind(e) => e.code,
            Error::Cursor(e) => e.code,
            Error::Config(_) => 1,
        }
    }

    /// Human-readable message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Error::Connection(e) => &e.message,
            Error::Query(e) => &e.message,
            Error::Bind(e) => &e.message,
            Error::Cursor(e) => &e.message,
            Error::Config(e) => &e.message,
        }
    }

    /// Did the engine report the database as busy or locked?
    pub fn is_busy(&self) -> bool {
        match self {
            Error::Query(q) => q.is_busy(),
            _ => false,
        }
    }

    /// Is this a cursor misuse (access after close, bad column, ...)?
    pub fn is_cursor_misuse(&self) -> bool {
        matches!(self, Error::Cursor(_))
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::Bind(b) => b.sql.as_deref(),
            _ => None,
        }
    }
}

impl QueryError {
    /// Is the primary result code SQLITE_BUSY (5) or SQLITE_LOCKED (6)?
    pub fn is_busy(&self) -> bool {
        matches!(self.code & 0xff, 5 | 6)
    }

    /// Is the primary result code SQLITE_CONSTRAINT (19)?
    pub fn is_constraint(&self) -> bool {
        self.code & 0xff == 19
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e),
            Error::Query(e) => match e.kind {
                QueryErrorKind::Prepare => write!(f, "Prepare error: {}", e),
                QueryErrorKind::Step => write!(f, "Query error: {}", e),
            },
            Error::Bind(e) => write!(f, "Bind error: {}", e),
            Error::Cursor(e) => write!(f, "Cursor error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e),
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
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for CursorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
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

impl From<BindError> for Error {
    fn from(err: BindError) -> Self {
        Error::Bind(err)
    }
}

impl From<CursorError> for Error {
    fn from(err: CursorError) -> Self {
        Error::Cursor(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for litekit operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_and_constraint_helpers() {
        let busy = QueryError {
            kind: QueryErrorKind::Step,
            code: 5,
            sql: Some("INSERT INTO t VALUES (1)".to_string()),
            message: "database is locked".to_string(),
        };
        assert!(busy.is_busy());
        assert!(!busy.is_constraint());

        // SQLITE_CONSTRAINT_UNIQUE is an extended code over SQLITE_CONSTRAINT
        let unique = QueryError {
            kind: QueryErrorKind::Step,
            code: 2067,
            sql: None,
            message: "UNIQUE constraint failed: t.a".to_string(),
        };
        assert!(unique.is_constraint());

        let err = Error::Query(busy);
        assert!(err.is_busy());
        assert_eq!(err.code(), 5);
        assert_eq!(err.sql(), Some("INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn display_includes_category() {
        let err = Error::Bind(BindError {
            kind: BindErrorKind::CountMismatch {
                expected: 2,
                actual: 1,
            },
            code: 25,
            sql: None,
            message: "expected 2 arguments, got 1".to_string(),
        });
        assert_eq!(err.to_string(), "Bind error: expected 2 arguments, got 1");
        assert_eq!(err.message(), "expected 2 arguments, got 1");

        let err = Error::Cursor(CursorError {
            kind: CursorErrorKind::Closed,
            code: 21,
            message: "cursor is closed".to_string(),
        });
        assert!(err.is_cursor_misuse());
        assert!(!err.is_busy());
        assert_eq!(err.to_string(), "Cursor error: cursor is closed");
    }
}
