//! litekit - a thin, stateful SQLite connection layer.
//!
//! litekit provides:
//!
//! - A [`Connection`] that remembers the code and message of its last failure
//! - An opt-in statement cache keyed by SQL text
//! - Positional and named parameter binding with strict argument counting
//! - Forward-only [`ResultCursor`]s with typed, by-name or by-index accessors
//! - Busy/locked retry within a configurable window
//! - Exclusive and deferred transactions
//!
//! # Quick Start
//!
//! ```
//! use litekit::prelude::*;
//!
//! let conn = Connection::memory();
//! conn.open()?;
//! conn.set_should_cache_statements(true);
//!
//! conn.execute_update("CREATE TABLE heroes (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)", ())?;
//! conn.execute_update(
//!     "INSERT INTO heroes (name, age) VALUES (:name, :age)",
//!     named_params! { "name" => "Spider-Man", "age" => 25 },
//! )?;
//!
//! let mut cursor = conn.execute_query("SELECT name, age FROM heroes WHERE age > ?", params![18])?;
//! while cursor.next()? {
//!     assert_eq!(cursor.string_for_column("name")?, "Spider-Man");
//!     assert_eq!(cursor.int_for_column("age")?, 25);
//! }
//!
//! assert_eq!(conn.long_for_query("SELECT count(*) FROM heroes", ())?, Some(1));
//! # Ok::<(), litekit::Error>(())
//! ```
//!
//! # Errors
//!
//! Every fallible call returns [`Result`]. The failure is also recorded on
//! the connection ([`Connection::last_error_code`],
//! [`Connection::last_error_message`]), logged through `tracing` when
//! `logs_errors` is on, and aborts the process when `crash_on_errors` is on.

pub use litekit_core::error::{
    BindError, BindErrorKind, ConfigError, ConnectionError, ConnectionErrorKind, CursorError,
    CursorErrorKind, QueryError, QueryErrorKind,
};
pub use litekit_core::{Error, Params, Result, Value, named_params, params};
pub use litekit_sqlite::{
    Connection, ConnectionConfig, CursorState, DEFAULT_BUSY_RETRY_TIMEOUT_MS, FromColumn,
    OpenFlags, PreparedStatement, ResultCursor, StatementCache, StatementId, Transaction,
    sqlite_version, sqlite_version_number,
};

pub use chrono::{DateTime, Utc};

/// Prelude module for convenient imports.
///
/// ```
/// use litekit::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Connection, ConnectionConfig, DateTime, Error, FromColumn, OpenFlags, Params, Result,
        ResultCursor, Transaction, Utc, Value, named_params, params,
    };
}
