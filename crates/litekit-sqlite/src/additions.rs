//! Single-value query helpers.
//!
//! Each helper runs a query, reads column 0 of the first row and closes
//! the cursor. `Ok(None)` means the query produced no rows.

use crate::connection::Connection;
use crate::types::FromColumn;
use chrono::{DateTime, Utc};
use litekit_core::{Params, Result};

impl Connection {
    /// First column of the first row, converted to `T`.
    pub fn value_for_query<T: FromColumn>(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<Option<T>> {
        let mut cursor = self.execute_query(sql, params)?;
        let value = if cursor.next()? {
            Some(cursor.get::<T>(0)?)
        } else {
            None
        };
        cursor.close();
        Ok(value)
    }

    pub fn int_for_query(&self, sql: &str, params: impl Into<Params>) -> Result<Option<i32>> {
        self.value_for_query(sql, params)
    }

    pub fn long_for_query(&self, sql: &str, params: impl Into<Params>) -> Result<Option<i64>> {
        self.value_for_query(sql, params)
    }

    pub fn bool_for_query(&self, sql: &str, params: impl Into<Params>) -> Result<Option<bool>> {
        self.value_for_query(sql, params)
    }

    pub fn double_for_query(&self, sql: &str, params: impl Into<Params>) -> Result<Option<f64>> {
        self.value_for_query(sql, params)
    }

    pub fn string_for_query(&self, sql: &str, params: impl Into<Params>) -> Result<Option<String>> {
        self.value_for_query(sql, params)
    }

    pub fn data_for_query(&self, sql: &str, params: impl Into<Params>) -> Result<Option<Vec<u8>>> {
        self.value_for_query(sql, params)
    }

    /// Date in the first column of the first row; NULL also yields `None`.
    pub fn date_for_query(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .value_for_query::<Option<DateTime<Utc>>>(sql, params)?
            .flatten())
    }

    /// Compile `sql` without running it.
    pub fn validate_sql(&self, sql: &str) -> Result<()> {
        self.prepare_only(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use litekit_core::params;

    fn setup() -> Connection {
        let conn = Connection::memory();
        conn.open().unwrap();
        conn.execute_update("CREATE TABLE kv (k TEXT, v)", ()).unwrap();
        conn
    }

    #[test]
    fn test_scalar_helpers() {
        let conn = setup();
        conn.execute_update("INSERT INTO kv VALUES ('n', 42), ('s', 'hello'), ('f', 1.25), ('b', x'00ff')", ())
            .unwrap();

        let q = "SELECT v FROM kv WHERE k = ?";
        assert_eq!(conn.int_for_query(q, params!["n"]).unwrap(), Some(42));
        assert_eq!(conn.long_for_query(q, params!["n"]).unwrap(), Some(42));
        assert_eq!(conn.bool_for_query(q, params!["n"]).unwrap(), Some(true));
        assert_eq!(conn.string_for_query(q, params!["s"]).unwrap().as_deref(), Some("hello"));
        assert_eq!(conn.double_for_query(q, params!["f"]).unwrap(), Some(1.25));
        assert_eq!(conn.data_for_query(q, params!["b"]).unwrap(), Some(vec![0x00, 0xff]));
        assert_eq!(conn.int_for_query(q, params!["missing"]).unwrap(), None);
        assert_eq!(conn.open_cursor_count(), 0);
    }

    #[test]
    fn test_date_for_query() {
        let conn = setup();
        let when = Utc.with_ymd_and_hms(2020, 5, 17, 6, 0, 0).unwrap();
        conn.execute_update("INSERT INTO kv VALUES ('d', ?), ('null', NULL)", params![when])
            .unwrap();
        assert_eq!(
            conn.date_for_query("SELECT v FROM kv WHERE k = 'd'", ()).unwrap(),
            Some(when)
        );
        assert_eq!(
            conn.date_for_query("SELECT v FROM kv WHERE k = 'null'", ()).unwrap(),
            None
        );
    }

    #[test]
    fn test_validate_sql() {
        let conn = setup();
        conn.validate_sql("SELECT k FROM kv").unwrap();
        // validation does not execute
        conn.validate_sql("DELETE FROM kv").unwrap();

        let err = conn.validate_sql("SELECT nope FROM kv").unwrap_err();
        assert!(err.message().contains("no such column"));
        assert!(conn.had_error());
    }
}
