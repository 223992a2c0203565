//! SQLite connection layer for litekit.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate wraps libsqlite3 (bundled through `libsqlite3-sys`) in a
//! [`Connection`] that keeps its own error state, caches compiled statements
//! on request, and hands out forward-only [`ResultCursor`]s with typed
//! column accessors.
//!
//! # Features
//!
//! - Positional (`?`, `?NNN`) and named (`:a`, `@a`, `$a`) parameters with
//!   strict argument counting
//! - Statement cache with checkout/checkin, safe against re-entrant use of
//!   the same SQL
//! - Busy/locked retry within a configurable window
//! - Exclusive and deferred transactions, plus a scoped [`Transaction`]
//!   guard with savepoints
//! - Last error code and message kept on the connection
//!
//! # Example
//!
//! ```
//! use litekit_core::params;
//! use litekit_sqlite::Connection;
//!
//! let conn = Connection::memory();
//! conn.open().unwrap();
//! conn.execute_update("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", ()).unwrap();
//! conn.execute_update("INSERT INTO users (name) VALUES (?)", params!["Alice"]).unwrap();
//!
//! let mut cursor = conn.execute_query("SELECT id, name FROM users", ()).unwrap();
//! assert!(cursor.next().unwrap());
//! assert_eq!(cursor.string_for_column("name").unwrap(), "Alice");
//! ```
//!
//! # Type Mapping
//!
//! | Rust Type | SQLite Type |
//! |-----------|-------------|
//! | `bool` | INTEGER (0/1) |
//! | `i8` .. `i64`, `u8` .. `u32` | INTEGER |
//! | `f32`, `f64` | REAL |
//! | `String`, `&str` | TEXT |
//! | `Vec<u8>`, `&[u8]` | BLOB |
//! | `Option<T>` | NULL or T |
//! | `DateTime<Utc>` | TEXT (RFC 3339, UTC, nanoseconds) |
//!
//! # Thread Safety
//!
//! `Connection` is both `Send` and `Sync`; its state sits behind a mutex.
//! It still serves one logical caller at a time: a top-level call made
//! while another is running fails with `ConnectionErrorKind::InUse`.

mod additions;
pub mod bind;
pub mod cache;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod ffi;
pub mod statement;
pub mod transaction;
pub mod types;

pub use cache::{Lease, StatementCache};
pub use config::{ConnectionConfig, DEFAULT_BUSY_RETRY_TIMEOUT_MS, OpenFlags};
pub use connection::Connection;
pub use cursor::{CursorState, ResultCursor};
pub use statement::{PreparedStatement, StatementId};
pub use transaction::Transaction;
pub use types::FromColumn;

/// Re-export the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// Re-export the SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}
