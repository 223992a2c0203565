//! Compiled statements.
//!
//! A [`PreparedStatement`] owns one `sqlite3_stmt` handle. It is created by
//! the connection, lent to cursors and updates through the statement cache,
//! and finalized exactly once.

#![allow(clippy::cast_possible_truncation)]

use crate::ffi;
use crate::types;
use chrono::{DateTime, Utc};
use litekit_core::error::{QueryError, QueryErrorKind};
use litekit_core::{Error, Value};
use std::ffi::{CString, c_char, c_int};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_STATEMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a compiled statement.
///
/// Leases remember the id of the statement they borrowed so that a lease
/// outliving a cache flush can never be matched against a recompiled
/// statement with the same SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(u64);

impl StatementId {
    fn next() -> Self {
        Self(NEXT_STATEMENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A compiled SQL statement.
pub struct PreparedStatement {
    id: StatementId,
    sql: String,
    raw: *mut ffi::sqlite3_stmt,
    use_count: u64,
}

// SAFETY: the handle is only touched while the owning connection's mutex is
// held, so it never crosses threads concurrently.
unsafe impl Send for PreparedStatement {}

impl PreparedStatement {
    /// Compile `sql` against an open database handle.
    ///
    /// `sql` must hold exactly one statement. Trailing whitespace and
    /// comments are fine; a second statement is a prepare error.
    pub(crate) fn prepare(db: *mut ffi::sqlite3, sql: &str) -> Result<Self, Error> {
        let c_sql = CString::new(sql)
            .map_err(|_| prepare_failure(sql, ffi::SQLITE_MISUSE, "SQL contains null byte"))?;

        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();

        // SAFETY: db is a live handle owned by the caller; all pointers are valid
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                db,
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut raw,
                &mut tail,
            )
        };

        if rc != ffi::SQLITE_OK {
            // SAFETY: db is valid
            let message = unsafe { ffi::errmsg(db) };
            return Err(prepare_failure(sql, rc, &message));
        }

        if raw.is_null() {
            return Err(prepare_failure(
                sql,
                ffi::SQLITE_MISUSE,
                "SQL contains no statement",
            ));
        }

        let mut statement = Self {
            id: StatementId::next(),
            sql: sql.to_string(),
            raw,
            use_count: 1,
        };

        let consumed = if tail.is_null() {
            sql.len()
        } else {
            // SAFETY: SQLite sets tail to a position inside c_sql's buffer
            let offset = unsafe { tail.offset_from(c_sql.as_ptr()) };
            usize::try_from(offset).unwrap_or(sql.len())
        };
        let rest = sql.get(consumed..).unwrap_or_default();
        if !rest.trim().is_empty() {
            if let Some(rc) = compiles_to_statement(db, rest) {
                statement.finalize();
                if rc != ffi::SQLITE_OK {
                    // SAFETY: db is valid
                    let message = unsafe { ffi::errmsg(db) };
                    return Err(prepare_failure(sql, rc, &message));
                }
                return Err(prepare_failure(
                    sql,
                    ffi::SQLITE_MISUSE,
                    "SQL contains more than one statement; use execute_batch",
                ));
            }
        }

        Ok(statement)
    }

    pub fn id(&self) -> StatementId {
        self.id
    }

    /// The SQL text this statement was compiled from.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// How many times this statement has been handed out for execution.
    pub fn use_count(&self) -> u64 {
        self.use_count
    }

    pub(crate) fn mark_used(&mut self) {
        self.use_count += 1;
    }

    pub fn is_finalized(&self) -> bool {
        self.raw.is_null()
    }

    /// Number of bind parameters (`?`, `?NNN`, `:a`, `@a`, `$a`).
    pub fn parameter_count(&self) -> usize {
        if self.raw.is_null() {
            return 0;
        }
        // SAFETY: raw is a live statement
        let n = unsafe { ffi::sqlite3_bind_parameter_count(self.raw) };
        usize::try_from(n).unwrap_or(0)
    }

    /// 1-based index of a parameter given its full name including sigil.
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        if self.raw.is_null() {
            return None;
        }
        let c_name = CString::new(name).ok()?;
        // SAFETY: raw is a live statement and c_name is NUL-terminated
        let idx = unsafe { ffi::sqlite3_bind_parameter_index(self.raw, c_name.as_ptr()) };
        usize::try_from(idx).ok().filter(|&i| i > 0)
    }

    /// Number of result columns.
    pub fn column_count(&self) -> usize {
        if self.raw.is_null() {
            return 0;
        }
        // SAFETY: raw is a live statement
        let n = unsafe { ffi::sqlite3_column_count(self.raw) };
        usize::try_from(n).unwrap_or(0)
    }

    /// Result column name as reported by SQLite (alias if one was given).
    pub fn column_name(&self, index: usize) -> Option<String> {
        if index >= self.column_count() {
            return None;
        }
        // SAFETY: raw is live and index is in range
        unsafe { types::column_name(self.raw, index as c_int) }
    }

    /// Bind one value to a 1-based parameter index, returning the raw result code.
    pub(crate) fn bind(&self, index: usize, value: &Value) -> c_int {
        if self.raw.is_null() {
            return ffi::SQLITE_MISUSE;
        }
        // SAFETY: raw is live; SQLite range-checks the index itself
        unsafe { types::bind_value(self.raw, index as c_int, value) }
    }

    /// Advance one step, returning the raw result code.
    pub(crate) fn step(&self) -> c_int {
        if self.raw.is_null() {
            return ffi::SQLITE_MISUSE;
        }
        // SAFETY: raw is live
        unsafe { ffi::sqlite3_step(self.raw) }
    }

    /// Rewind to the beginning and forget all bound values.
    pub fn reset(&self) {
        if self.raw.is_null() {
            return;
        }
        // SAFETY: raw is live. The return value of reset only repeats the
        // error of the previous step, which has already been reported.
        unsafe {
            ffi::sqlite3_reset(self.raw);
            ffi::sqlite3_clear_bindings(self.raw);
        }
    }

    /// Release the native handle. Safe to call more than once.
    pub fn finalize(&mut self) {
        if self.raw.is_null() {
            return;
        }
        // SAFETY: raw is live and is nulled immediately afterwards
        unsafe {
            ffi::sqlite3_finalize(self.raw);
        }
        self.raw = ptr::null_mut();
    }

    // Column readers. The cursor checks row state and bounds before calling
    // these; out-of-range reads still degrade to the NULL conversion.

    fn column_ok(&self, index: usize) -> bool {
        index < self.column_count()
    }

    pub(crate) fn column_type(&self, index: usize) -> c_int {
        if !self.column_ok(index) {
            return ffi::SQLITE_NULL;
        }
        // SAFETY: raw is live and index is in range
        unsafe { ffi::sqlite3_column_type(self.raw, index as c_int) }
    }

    pub(crate) fn column_is_null(&self, index: usize) -> bool {
        self.column_type(index) == ffi::SQLITE_NULL
    }

    pub(crate) fn column_i64(&self, index: usize) -> i64 {
        if !self.column_ok(index) {
            return 0;
        }
        // SAFETY: raw is live and index is in range
        unsafe { ffi::sqlite3_column_int64(self.raw, index as c_int) }
    }

    pub(crate) fn column_int(&self, index: usize) -> i32 {
        if !self.column_ok(index) {
            return 0;
        }
        // SAFETY: raw is live and index is in range
        unsafe { ffi::sqlite3_column_int(self.raw, index as c_int) }
    }

    pub(crate) fn column_double(&self, index: usize) -> f64 {
        if !self.column_ok(index) {
            return 0.0;
        }
        // SAFETY: raw is live and index is in range
        unsafe { ffi::sqlite3_column_double(self.raw, index as c_int) }
    }

    pub(crate) fn column_text(&self, index: usize) -> String {
        if !self.column_ok(index) {
            return String::new();
        }
        // SAFETY: raw is live and index is in range
        unsafe { types::read_text(self.raw, index as c_int) }
    }

    pub(crate) fn column_blob(&self, index: usize) -> Vec<u8> {
        self.with_column_bytes(index, <[u8]>::to_vec)
    }

    /// Lend the column's bytes to `f` without copying them.
    pub(crate) fn with_column_bytes<R>(&self, index: usize, f: impl FnOnce(&[u8]) -> R) -> R {
        if !self.column_ok(index) {
            return f(&[]);
        }
        // SAFETY: raw is live and index is in range; the slice does not
        // escape the closure, and nothing steps the statement meanwhile
        let bytes = unsafe { types::column_bytes(self.raw, index as c_int) };
        f(bytes)
    }

    pub(crate) fn column_value(&self, index: usize) -> Value {
        if !self.column_ok(index) {
            return Value::Null;
        }
        // SAFETY: raw is live and index is in range
        unsafe { types::read_column(self.raw, index as c_int) }
    }

    pub(crate) fn column_date(&self, index: usize) -> Option<DateTime<Utc>> {
        if !self.column_ok(index) {
            return None;
        }
        // SAFETY: raw is live and index is in range
        unsafe { types::read_date(self.raw, index as c_int) }
    }
}

impl Drop for PreparedStatement {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl std::fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("id", &self.id)
            .field("sql", &self.sql)
            .field("use_count", &self.use_count)
            .field("finalized", &self.raw.is_null())
            .finish()
    }
}

/// Does `rest` hold anything besides whitespace and comments? Returns the
/// result code of compiling it when it does.
fn compiles_to_statement(db: *mut ffi::sqlite3, rest: &str) -> Option<c_int> {
    let Ok(c_rest) = CString::new(rest) else {
        return Some(ffi::SQLITE_MISUSE);
    };
    let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();
    // SAFETY: db is a live handle; all pointers are valid
    let rc = unsafe {
        ffi::sqlite3_prepare_v2(
            db,
            c_rest.as_ptr(),
            c_rest.as_bytes().len() as c_int,
            &mut raw,
            ptr::null_mut(),
        )
    };
    if raw.is_null() {
        return (rc != ffi::SQLITE_OK).then_some(rc);
    }
    // SAFETY: raw was just compiled and is not referenced anywhere else
    unsafe {
        ffi::sqlite3_finalize(raw);
    }
    Some(rc)
}

fn prepare_failure(sql: &str, code: c_int, message: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Prepare,
        code,
        sql: Some(sql.to_string()),
        message: message.to_string(),
    })
}
