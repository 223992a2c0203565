//! Scoped transactions.

use crate::connection::Connection;
use crate::cursor::ResultCursor;
use litekit_core::{Params, Result};

/// A transaction that rolls back when dropped unless committed.
///
/// ```
/// use litekit_sqlite::Connection;
///
/// let conn = Connection::memory();
/// conn.open().unwrap();
/// conn.execute_update("CREATE TABLE t (a)", ()).unwrap();
///
/// {
///     let tx = conn.transaction().unwrap();
///     tx.execute_update("INSERT INTO t VALUES (1)", ()).unwrap();
///     // dropped without commit
/// }
/// assert_eq!(conn.long_for_query("SELECT count(*) FROM t", ()).unwrap(), Some(0));
/// ```
pub struct Transaction<'conn> {
    conn: &'conn Connection,
    finished: bool,
}

impl<'conn> Transaction<'conn> {
    pub(crate) fn begin(conn: &'conn Connection, deferred: bool) -> Result<Self> {
        if deferred {
            conn.begin_deferred_transaction()?;
        } else {
            conn.begin_transaction()?;
        }
        Ok(Self {
            conn,
            finished: false,
        })
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    pub fn execute_update(&self, sql: &str, params: impl Into<Params>) -> Result<u64> {
        self.conn.execute_update(sql, params)
    }

    pub fn execute_query(&self, sql: &str, params: impl Into<Params>) -> Result<ResultCursor<'conn>> {
        self.conn.execute_query(sql, params)
    }

    /// Create a savepoint inside the transaction.
    pub fn savepoint(&self, name: &str) -> Result<()> {
        self.conn
            .execute_update(&format!("SAVEPOINT {}", quote_identifier(name)), ())
            .map(|_| ())
    }

    /// Release (merge) a savepoint.
    pub fn release(&self, name: &str) -> Result<()> {
        self.conn
            .execute_update(&format!("RELEASE SAVEPOINT {}", quote_identifier(name)), ())
            .map(|_| ())
    }

    /// Undo everything since a savepoint, keeping the savepoint.
    pub fn rollback_to(&self, name: &str) -> Result<()> {
        self.conn
            .execute_update(
                &format!("ROLLBACK TRANSACTION TO SAVEPOINT {}", quote_identifier(name)),
                (),
            )
            .map(|_| ())
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.conn.commit()
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn.rollback()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // Auto-rollback on drop if not committed
            if let Err(e) = self.conn.rollback() {
                tracing::warn!(error = %e, "rollback on drop failed");
            }
        }
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::memory();
        conn.open().unwrap();
        conn.execute_update("CREATE TABLE t (a INTEGER)", ()).unwrap();
        conn
    }

    fn count(conn: &Connection) -> i64 {
        conn.long_for_query("SELECT count(*) FROM t", ())
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_commit() {
        let conn = setup();
        let tx = conn.transaction().unwrap();
        assert!(conn.in_transaction());
        tx.execute_update("INSERT INTO t VALUES (1)", ()).unwrap();
        tx.commit().unwrap();
        assert!(!conn.in_transaction());
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_explicit_rollback() {
        let conn = setup();
        let tx = conn.deferred_transaction().unwrap();
        tx.execute_update("INSERT INTO t VALUES (1)", ()).unwrap();
        tx.rollback().unwrap();
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn test_drop_rolls_back() {
        let conn = setup();
        {
            let tx = conn.transaction().unwrap();
            tx.execute_update("INSERT INTO t VALUES (1)", ()).unwrap();
        }
        assert!(!conn.in_transaction());
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn test_savepoints() {
        let conn = setup();
        let tx = conn.transaction().unwrap();
        tx.execute_update("INSERT INTO t VALUES (1)", ()).unwrap();
        tx.savepoint("before \"two\"").unwrap();
        tx.execute_update("INSERT INTO t VALUES (2)", ()).unwrap();
        tx.rollback_to("before \"two\"").unwrap();
        tx.release("before \"two\"").unwrap();
        tx.commit().unwrap();
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("sp"), "\"sp\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
