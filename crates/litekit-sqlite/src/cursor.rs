//! Forward-only result cursor.
//!
//! A [`ResultCursor`] walks the rows of one query. It borrows its connection
//! and refers to its statement only by slot id, so the connection can
//! force-close it (on `close()` or a cache flush) and every later access
//! reports a cursor error instead of touching a finalized statement.
//!
//! ```
//! use litekit_sqlite::Connection;
//!
//! let conn = Connection::memory();
//! conn.open().unwrap();
//! conn.execute_update("CREATE TABLE t (a INTEGER, b TEXT)", ()).unwrap();
//! conn.execute_update("INSERT INTO t VALUES (1, 'one'), (2, 'two')", ()).unwrap();
//!
//! let mut cursor = conn.execute_query("SELECT a, b FROM t ORDER BY a", ()).unwrap();
//! let mut seen = Vec::new();
//! while cursor.next().unwrap() {
//!     seen.push((cursor.long_for_column("a").unwrap(), cursor.string_for_column("B").unwrap()));
//! }
//! assert_eq!(seen, vec![(1, "one".to_string()), (2, "two".to_string())]);
//! ```

use crate::connection::{Connection, CursorId};
use crate::ffi;
use crate::statement::PreparedStatement;
use crate::types::FromColumn;
use chrono::{DateTime, Utc};
use litekit_core::error::{CursorError, CursorErrorKind};
use litekit_core::{Error, Result, Value};
use std::cell::{Cell, OnceCell};
use std::collections::HashMap;

/// Where a cursor is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Executed, `next()` not yet called.
    Created,
    /// Positioned on a row; column access is valid.
    RowReady,
    /// All rows read; the statement has been returned.
    Exhausted,
    /// Closed explicitly, by an error, or by the connection.
    Closed,
}

/// Rows of one executed query.
pub struct ResultCursor<'conn> {
    conn: &'conn Connection,
    id: CursorId,
    sql: String,
    state: Cell<CursorState>,
    columns: OnceCell<HashMap<String, usize>>,
}

impl<'conn> ResultCursor<'conn> {
    pub(crate) fn new(conn: &'conn Connection, id: CursorId, sql: &str) -> Self {
        Self {
            conn,
            id,
            sql: sql.to_string(),
            state: Cell::new(CursorState::Created),
            columns: OnceCell::new(),
        }
    }

    /// The connection this cursor reads from.
    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    /// The SQL text of the query.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn state(&self) -> CursorState {
        self.state.get()
    }

    pub fn is_closed(&self) -> bool {
        self.state.get() == CursorState::Closed
    }

    /// Is the cursor positioned on a row?
    pub fn has_another_row(&self) -> bool {
        self.state.get() == CursorState::RowReady
    }

    /// Advance to the next row.
    ///
    /// Returns `Ok(false)` once the rows are exhausted, and keeps doing so.
    /// A failed step closes the cursor. Calling this on a closed cursor is
    /// an error.
    pub fn next(&mut self) -> Result<bool> {
        match self.state.get() {
            CursorState::Closed => {
                return Err(self
                    .conn
                    .report(cursor_error(CursorErrorKind::Closed, "cursor is closed")));
            }
            CursorState::Exhausted => return Ok(false),
            CursorState::Created | CursorState::RowReady => {}
        }

        match self.conn.step_cursor(self.id, &self.sql) {
            Ok(true) => {
                self.state.set(CursorState::RowReady);
                Ok(true)
            }
            Ok(false) => {
                self.state.set(CursorState::Exhausted);
                tracing::trace!(sql = %self.sql, "cursor exhausted");
                Ok(false)
            }
            Err(e) => {
                self.state.set(CursorState::Closed);
                Err(e)
            }
        }
    }

    /// Return the statement and stop reading. Closing twice does nothing.
    pub fn close(&mut self) {
        if self.state.get() == CursorState::Closed {
            return;
        }
        self.conn.release_cursor(self.id);
        self.state.set(CursorState::Closed);
    }

    fn state_error(&self) -> Option<Error> {
        let (kind, message) = match self.state.get() {
            CursorState::RowReady => return None,
            CursorState::Created => (CursorErrorKind::NoRow, "next() has not produced a row yet"),
            CursorState::Exhausted => (CursorErrorKind::Exhausted, "all rows have been read"),
            CursorState::Closed => (CursorErrorKind::Closed, "cursor is closed"),
        };
        Some(self.conn.report(cursor_error(kind, message)))
    }

    /// Run `f` against the statement, tracking a forced close.
    fn with_statement<R>(&self, f: impl FnOnce(&PreparedStatement) -> Result<R>) -> Result<R> {
        let result = self.conn.with_cursor_statement(self.id, f);
        if let Err(Error::Cursor(CursorError {
            kind: CursorErrorKind::Closed,
            ..
        })) = &result
        {
            self.state.set(CursorState::Closed);
        }
        result
    }

    /// Read column `index` of the current row with `f`.
    fn read<R>(&self, index: usize, f: impl FnOnce(&PreparedStatement, usize) -> R) -> Result<R> {
        if let Some(err) = self.state_error() {
            return Err(err);
        }
        self.with_statement(|stmt| {
            let count = stmt.column_count();
            if index >= count {
                return Err(cursor_error(
                    CursorErrorKind::IndexOutOfRange,
                    &format!("column index {} out of range for {} columns", index, count),
                ));
            }
            Ok(f(stmt, index))
        })
    }

    fn column_map(&self) -> Result<&HashMap<String, usize>> {
        if let Some(map) = self.columns.get() {
            return Ok(map);
        }
        if matches!(
            self.state.get(),
            CursorState::Exhausted | CursorState::Closed
        ) {
            if let Some(err) = self.state_error() {
                return Err(err);
            }
        }
        let map = self.with_statement(|stmt| {
            let mut map = HashMap::with_capacity(stmt.column_count());
            for i in 0..stmt.column_count() {
                if let Some(name) = stmt.column_name(i) {
                    map.entry(name.to_lowercase()).or_insert(i);
                }
            }
            Ok(map)
        })?;
        Ok(self.columns.get_or_init(|| map))
    }

    /// Index of the column called `name`, ignoring case.
    pub fn column_index_for_name(&self, name: &str) -> Result<usize> {
        let map = self.column_map()?;
        match map.get(&name.to_lowercase()) {
            Some(&index) => Ok(index),
            None => Err(self.conn.report(cursor_error(
                CursorErrorKind::UnknownColumn,
                &format!("no column named {:?}", name),
            ))),
        }
    }

    /// Name of the column at `index`.
    pub fn column_name_for_index(&self, index: usize) -> Result<String> {
        if matches!(
            self.state.get(),
            CursorState::Exhausted | CursorState::Closed
        ) {
            if let Some(err) = self.state_error() {
                return Err(err);
            }
        }
        self.with_statement(|stmt| {
            stmt.column_name(index).ok_or_else(|| {
                cursor_error(
                    CursorErrorKind::IndexOutOfRange,
                    &format!("column index {} out of range", index),
                )
            })
        })
    }

    /// Number of result columns.
    pub fn column_count(&self) -> Result<usize> {
        if matches!(
            self.state.get(),
            CursorState::Exhausted | CursorState::Closed
        ) {
            if let Some(err) = self.state_error() {
                return Err(err);
            }
        }
        self.with_statement(|stmt| Ok(stmt.column_count()))
    }

    /// Read column `index` as `T`.
    pub fn get<T: FromColumn>(&self, index: usize) -> Result<T> {
        self.read(index, T::from_column)
    }

    /// Read the column called `name` as `T`.
    pub fn get_named<T: FromColumn>(&self, name: &str) -> Result<T> {
        let index = self.column_index_for_name(name)?;
        self.get(index)
    }

    pub fn int_for_column(&self, name: &str) -> Result<i32> {
        self.get_named(name)
    }

    pub fn int_for_column_index(&self, index: usize) -> Result<i32> {
        self.get(index)
    }

    pub fn long_for_column(&self, name: &str) -> Result<i64> {
        self.get_named(name)
    }

    pub fn long_for_column_index(&self, index: usize) -> Result<i64> {
        self.get(index)
    }

    pub fn bool_for_column(&self, name: &str) -> Result<bool> {
        self.get_named(name)
    }

    pub fn bool_for_column_index(&self, index: usize) -> Result<bool> {
        self.get(index)
    }

    pub fn double_for_column(&self, name: &str) -> Result<f64> {
        self.get_named(name)
    }

    pub fn double_for_column_index(&self, index: usize) -> Result<f64> {
        self.get(index)
    }

    /// Text of the column; numbers are converted, NULL is the empty string.
    pub fn string_for_column(&self, name: &str) -> Result<String> {
        self.get_named(name)
    }

    pub fn string_for_column_index(&self, index: usize) -> Result<String> {
        self.get(index)
    }

    /// Copy of the column's bytes; NULL is empty.
    pub fn data_for_column(&self, name: &str) -> Result<Vec<u8>> {
        self.get_named(name)
    }

    pub fn data_for_column_index(&self, index: usize) -> Result<Vec<u8>> {
        self.get(index)
    }

    /// The column as a point in time, or `None` for NULL or unparseable text.
    pub fn date_for_column(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        let index = self.column_index_for_name(name)?;
        self.date_for_column_index(index)
    }

    pub fn date_for_column_index(&self, index: usize) -> Result<Option<DateTime<Utc>>> {
        self.read(index, PreparedStatement::column_date)
    }

    /// The column as stored: one of Null, Integer, Real, Text or Blob.
    pub fn object_for_column(&self, name: &str) -> Result<Value> {
        self.get_named(name)
    }

    pub fn object_for_column_index(&self, index: usize) -> Result<Value> {
        self.get(index)
    }

    pub fn column_is_null(&self, name: &str) -> Result<bool> {
        let index = self.column_index_for_name(name)?;
        self.column_index_is_null(index)
    }

    pub fn column_index_is_null(&self, index: usize) -> Result<bool> {
        self.read(index, |stmt, i| stmt.column_type(i) == ffi::SQLITE_NULL)
    }

    /// Lend the column's bytes to `f` without copying them.
    ///
    /// The connection stays locked while `f` runs, so `f` must not use the
    /// connection or this cursor.
    pub fn data_no_copy_for_column<R>(&self, name: &str, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let index = self.column_index_for_name(name)?;
        self.data_no_copy_for_column_index(index, f)
    }

    pub fn data_no_copy_for_column_index<R>(
        &self,
        index: usize,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R> {
        self.read(index, |stmt, i| stmt.with_column_bytes(i, f))
    }

    /// The current row as a map from column name to stored value.
    pub fn result_dict(&self) -> Result<HashMap<String, Value>> {
        if let Some(err) = self.state_error() {
            return Err(err);
        }
        self.with_statement(|stmt| {
            let mut row = HashMap::with_capacity(stmt.column_count());
            for i in 0..stmt.column_count() {
                let name = stmt.column_name(i).unwrap_or_else(|| format!("col{}", i));
                row.insert(name, stmt.column_value(i));
            }
            Ok(row)
        })
    }
}

impl Drop for ResultCursor<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ResultCursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("sql", &self.sql)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

fn cursor_error(kind: CursorErrorKind, message: &str) -> Error {
    Error::Cursor(CursorError {
        kind,
        code: match kind {
            CursorErrorKind::IndexOutOfRange => ffi::SQLITE_RANGE,
            _ => ffi::SQLITE_MISUSE,
        },
        message: message.to_string(),
    })
}
