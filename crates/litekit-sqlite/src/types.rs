//! Type encoding and decoding between Rust and SQLite.
//!
//! SQLite has a simple type system with 5 storage classes:
//! - INTEGER: Signed 64-bit integer
//! - REAL: 8-byte IEEE floating point
//! - TEXT: UTF-8 string
//! - BLOB: Binary data
//! - NULL: The NULL value
//!
//! Dates have no storage class of their own. They are bound as RFC 3339
//! text with nanoseconds, which survives every column affinity unchanged,
//! and read back from either that text, another ISO-8601 form, or a number
//! of seconds since the Unix epoch.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]

use crate::ffi;
use crate::statement::PreparedStatement;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use litekit_core::Value;
use std::ffi::{CStr, c_int};

/// Bind a Value to a prepared statement parameter.
///
/// # Safety
/// - `stmt` must be a valid, non-null prepared statement handle
/// - `index` must be a valid 1-based parameter index
pub unsafe fn bind_value(stmt: *mut ffi::sqlite3_stmt, index: c_int, value: &Value) -> c_int {
    // SAFETY: caller upholds the handle and index contract; text and blob
    // buffers are copied by SQLite because of the transient destructor
    unsafe {
        match value {
            Value::Null => ffi::sqlite3_bind_null(stmt, index),

            Value::Integer(v) => ffi::sqlite3_bind_int64(stmt, index, *v),

            Value::Real(v) => ffi::sqlite3_bind_double(stmt, index, *v),

            Value::Text(s) => {
                let bytes = s.as_bytes();
                ffi::sqlite3_bind_text(
                    stmt,
                    index,
                    bytes.as_ptr().cast(),
                    bytes.len() as c_int,
                    ffi::transient(),
                )
            }

            Value::Blob(b) => ffi::sqlite3_bind_blob(
                stmt,
                index,
                b.as_ptr().cast(),
                b.len() as c_int,
                ffi::transient(),
            ),

            Value::Date(when) => {
                let text = date_to_text(when);
                ffi::sqlite3_bind_text(
                    stmt,
                    index,
                    text.as_ptr().cast(),
                    text.len() as c_int,
                    ffi::transient(),
                )
            }
        }
    }
}

/// Read a column value from a result row.
///
/// # Safety
/// - `stmt` must be a valid prepared statement that has just returned SQLITE_ROW
/// - `index` must be a valid 0-based column index
pub unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Value {
    // SAFETY: caller guarantees stmt is positioned on a row and index is valid
    unsafe {
        match ffi::sqlite3_column_type(stmt, index) {
            ffi::SQLITE_INTEGER => Value::Integer(ffi::sqlite3_column_int64(stmt, index)),
            ffi::SQLITE_FLOAT => Value::Real(ffi::sqlite3_column_double(stmt, index)),
            ffi::SQLITE_TEXT => Value::Text(read_text(stmt, index)),
            ffi::SQLITE_BLOB => Value::Blob(column_bytes(stmt, index).to_vec()),
            _ => Value::Null,
        }
    }
}

/// Read a column as text, converting numbers and decoding invalid UTF-8 lossily.
///
/// # Safety
/// Same contract as [`read_column`].
pub unsafe fn read_text(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> String {
    // SAFETY: caller upholds the statement contract
    unsafe {
        let ptr = ffi::sqlite3_column_text(stmt, index);
        if ptr.is_null() {
            return String::new();
        }
        let len = ffi::sqlite3_column_bytes(stmt, index);
        let slice = std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize);
        String::from_utf8_lossy(slice).into_owned()
    }
}

/// Borrow a column's bytes without copying.
///
/// The slice is only valid until the statement is stepped, reset or
/// finalized, or until another accessor converts the same column.
///
/// # Safety
/// Same contract as [`read_column`], and the returned slice must not
/// outlive the current row.
pub unsafe fn column_bytes<'a>(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> &'a [u8] {
    // SAFETY: caller upholds the statement contract; sqlite3_column_bytes is
    // called after sqlite3_column_blob as SQLite requires
    unsafe {
        let ptr = ffi::sqlite3_column_blob(stmt, index);
        let len = ffi::sqlite3_column_bytes(stmt, index);
        if ptr.is_null() || len <= 0 {
            &[]
        } else {
            std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize)
        }
    }
}

/// Read a column as a point in time.
///
/// # Safety
/// Same contract as [`read_column`].
pub unsafe fn read_date(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<DateTime<Utc>> {
    // SAFETY: caller upholds the statement contract
    unsafe {
        match ffi::sqlite3_column_type(stmt, index) {
            ffi::SQLITE_NULL => None,
            ffi::SQLITE_TEXT => parse_date_text(&read_text(stmt, index)),
            _ => date_from_unix_seconds(ffi::sqlite3_column_double(stmt, index)),
        }
    }
}

/// Get the column name from a result.
///
/// # Safety
/// - `stmt` must be a valid prepared statement
/// - `index` must be a valid 0-based column index
pub unsafe fn column_name(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<String> {
    // SAFETY: caller upholds the statement contract
    unsafe {
        let ptr = ffi::sqlite3_column_name(stmt, index);
        if ptr.is_null() {
            None
        } else {
            Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
        }
    }
}

/// Canonical text form of a date: RFC 3339, UTC, nine fractional digits.
pub fn date_to_text(when: &DateTime<Utc>) -> String {
    when.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Date from fractional seconds since the Unix epoch, rounded to the
/// nearest microsecond.
pub fn date_from_unix_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let micros = (seconds * 1_000_000.0).round();
    if micros < i64::MIN as f64 || micros > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_micros(micros as i64)
}

/// Parse a date stored as text.
///
/// Accepts numeric seconds, RFC 3339, SQLite's own `YYYY-MM-DD HH:MM:SS[.fff]`
/// and a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_date_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(seconds) = text.parse::<f64>() {
        return date_from_unix_seconds(seconds);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Conversion from the current row of a statement into a Rust value.
///
/// NULL converts to the type's zero value (`0`, `0.0`, `false`, empty
/// string or bytes, the Unix epoch); use `Option<T>` to observe NULL.
pub trait FromColumn: Sized {
    /// Read column `index` of the statement's current row.
    ///
    /// Callers have already checked that the statement is on a row and
    /// that `index` is in range.
    fn from_column(stmt: &PreparedStatement, index: usize) -> Self;
}

impl FromColumn for i64 {
    fn from_column(stmt: &PreparedStatement, index: usize) -> Self {
        stmt.column_i64(index)
    }
}

impl FromColumn for i32 {
    fn from_column(stmt: &PreparedStatement, index: usize) -> Self {
        stmt.column_int(index)
    }
}

impl FromColumn for bool {
    fn from_column(stmt: &PreparedStatement, index: usize) -> Self {
        stmt.column_int(index) != 0
    }
}

impl FromColumn for f64 {
    fn from_column(stmt: &PreparedStatement, index: usize) -> Self {
        stmt.column_double(index)
    }
}

impl FromColumn for String {
    fn from_column(stmt: &PreparedStatement, index: usize) -> Self {
        stmt.column_text(index)
    }
}

impl FromColumn for Vec<u8> {
    fn from_column(stmt: &PreparedStatement, index: usize) -> Self {
        stmt.column_blob(index)
    }
}

impl FromColumn for Value {
    fn from_column(stmt: &PreparedStatement, index: usize) -> Self {
        stmt.column_value(index)
    }
}

impl FromColumn for DateTime<Utc> {
    fn from_column(stmt: &PreparedStatement, index: usize) -> Self {
        stmt.column_date(index).unwrap_or_default()
    }
}

impl<T: FromColumn> FromColumn for Option<T> {
    fn from_column(stmt: &PreparedStatement, index: usize) -> Self {
        if stmt.column_is_null(index) {
            None
        } else {
            Some(T::from_column(stmt, index))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_date_text_keeps_nanoseconds() {
        let when = Utc.with_ymd_and_hms(2024, 2, 29, 13, 45, 30).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let text = date_to_text(&when);
        assert_eq!(text, "2024-02-29T13:45:30.123456789Z");
        assert_eq!(parse_date_text(&text), Some(when));
    }

    #[test]
    fn test_unix_seconds_millis() {
        let when = Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap()
            + chrono::Duration::milliseconds(123);
        assert_eq!(date_from_unix_seconds(1_700_000_000.123), Some(when));
    }

    #[test]
    fn test_unix_seconds_rejects_non_finite() {
        assert_eq!(date_from_unix_seconds(f64::NAN), None);
        assert_eq!(date_from_unix_seconds(f64::INFINITY), None);
    }

    #[test]
    fn test_parse_date_text_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        assert_eq!(parse_date_text("2024-03-01 08:30:00"), Some(expected));
        assert_eq!(parse_date_text("2024-03-01T08:30:00"), Some(expected));
        assert_eq!(parse_date_text("2024-03-01T08:30:00Z"), Some(expected));
        assert_eq!(parse_date_text("2024-03-01T10:30:00+02:00"), Some(expected));
        assert_eq!(
            parse_date_text(&expected.timestamp().to_string()),
            Some(expected)
        );

        let midnight = parse_date_text("2024-03-01").unwrap();
        assert_eq!(midnight.hour(), 0);
        assert_eq!(midnight.date_naive(), expected.date_naive());
    }

    #[test]
    fn test_parse_date_text_fractional() {
        let parsed = parse_date_text("2024-03-01 08:30:00.250").unwrap();
        assert_eq!(parsed.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_parse_date_text_garbage() {
        assert_eq!(parse_date_text("not a date"), None);
        assert_eq!(parse_date_text(""), None);
    }
}
