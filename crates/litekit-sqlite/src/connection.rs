//! SQLite connection.
//!
//! A [`Connection`] owns one native database handle together with its
//! statement cache, the statements lent to open cursors, and the error state
//! of the most recent failure. All of it lives behind a mutex, so the
//! connection is `Send + Sync`, but it is meant to be driven by one thread at
//! a time: the in-use flag makes overlapping top-level calls fail instead of
//! queueing.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::borrow_as_ptr)] // FFI requires raw pointers

use crate::bind;
use crate::cache::{Lease, StatementCache};
use crate::config::{ConnectionConfig, OpenFlags};
use crate::cursor::ResultCursor;
use crate::ffi;
use crate::statement::PreparedStatement;
use crate::transaction::Transaction;
use litekit_core::error::{
    ConnectionError, ConnectionErrorKind, CursorError, CursorErrorKind, QueryError, QueryErrorKind,
};
use litekit_core::{Error, Params, Result};
use std::collections::HashMap;
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Pause between attempts while the database is busy.
const BUSY_RETRY_SLEEP: Duration = Duration::from_micros(20);

/// Identifies a cursor's statement slot on its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CursorId(u64);

/// Inner state of the connection, protected by a mutex.
struct Inner {
    db: *mut ffi::sqlite3,
    flags: OpenFlags,
    in_transaction: bool,
    busy_retry_timeout: Duration,
    logs_errors: bool,
    crash_on_errors: bool,
    trace_execution: bool,
    cache: StatementCache,
    cursors: HashMap<CursorId, Lease>,
    next_cursor_id: u64,
    last_error: Option<(i32, String)>,
}

// SAFETY: the handle is only used while the mutex is held. SQLite handles
// may move between threads as long as they are not used concurrently.
unsafe impl Send for Inner {}

impl Inner {
    /// Record a failure as the connection's last error, log it, and hand
    /// it back for propagation.
    fn fail(&mut self, err: Error) -> Error {
        self.last_error = Some((err.code(), err.message().to_string()));
        if self.logs_errors {
            tracing::error!(
                code = err.code(),
                sql = err.sql().unwrap_or_default(),
                error = %err,
                "database operation failed"
            );
        } else {
            tracing::debug!(code = err.code(), error = %err, "database operation failed");
        }
        if self.crash_on_errors {
            tracing::error!(code = err.code(), "crash_on_errors is set; aborting");
            std::process::abort();
        }
        err
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.db.is_null() {
            return Err(self.fail(connection_error(
                ConnectionErrorKind::NotOpen,
                ffi::SQLITE_MISUSE,
                "database is not open".to_string(),
            )));
        }
        Ok(())
    }

    fn checkout(&mut self, sql: &str) -> Result<Lease> {
        let db = self.db;
        let timeout = self.busy_retry_timeout;
        match self
            .cache
            .checkout(sql, || prepare_with_retry(db, sql, timeout))
        {
            Ok(lease) => Ok(lease),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Check out and bind, returning the lease only if both succeed.
    fn prepare_bound(&mut self, sql: &str, params: &Params) -> Result<Lease> {
        let lease = self.checkout(sql)?;
        let bound = match self.cache.statement(&lease) {
            Some(stmt) => bind::bind_params(stmt, params).map_err(Error::from),
            None => Err(stale_statement(sql)),
        };
        match bound {
            Ok(()) => Ok(lease),
            Err(e) => {
                self.cache.checkin(lease);
                Err(self.fail(e))
            }
        }
    }

    /// Return every cursor's statement. Returns how many were open.
    fn close_cursors(&mut self) -> usize {
        let count = self.cursors.len();
        for (_, lease) in self.cursors.drain() {
            self.cache.checkin(lease);
        }
        count
    }

    /// Remove a cursor slot, returning its statement.
    fn release_cursor(&mut self, id: CursorId) {
        if let Some(lease) = self.cursors.remove(&id) {
            self.cache.checkin(lease);
        }
    }

    fn next_cursor_id(&mut self) -> CursorId {
        let id = CursorId(self.next_cursor_id);
        self.next_cursor_id += 1;
        id
    }
}

/// Clears the in-use flag when a top-level operation ends.
struct InUseGuard<'a>(&'a AtomicBool);

impl Drop for InUseGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A connection to a SQLite database.
pub struct Connection {
    inner: Mutex<Inner>,
    in_use: AtomicBool,
    path: String,
}

impl Connection {
    /// Create a closed connection to the database at `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_config(ConnectionConfig::file(path))
    }

    /// Create a closed connection to a private in-memory database.
    pub fn memory() -> Self {
        Self::with_config(ConnectionConfig::memory())
    }

    /// Create a closed connection from a config.
    pub fn with_config(config: ConnectionConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                db: ptr::null_mut(),
                flags: config.flags,
                in_transaction: false,
                busy_retry_timeout: config.busy_retry_duration(),
                logs_errors: config.logs_errors,
                crash_on_errors: config.crash_on_errors,
                trace_execution: config.trace_execution,
                cache: StatementCache::new(config.cache_statements),
                cursors: HashMap::new(),
                next_cursor_id: 1,
                last_error: None,
            }),
            in_use: AtomicBool::new(false),
            path: config.path,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the start of a top-level operation.
    fn enter(&self) -> Result<InUseGuard<'_>> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let err = connection_error(
                ConnectionErrorKind::InUse,
                ffi::SQLITE_MISUSE,
                "connection is already in use".to_string(),
            );
            return Err(self.lock().fail(err));
        }
        Ok(InUseGuard(&self.in_use))
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Open the database with the configured flags.
    ///
    /// Opening an already open connection does nothing.
    pub fn open(&self) -> Result<()> {
        let flags = self.lock().flags;
        self.open_with_flags(flags)
    }

    /// Open the database with explicit flags.
    pub fn open_with_flags(&self, flags: OpenFlags) -> Result<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if !inner.db.is_null() {
            return Ok(());
        }
        inner.last_error = None;

        let Ok(c_path) = CString::new(self.path.as_str()) else {
            return Err(inner.fail(connection_error(
                ConnectionErrorKind::Open,
                ffi::SQLITE_CANTOPEN,
                "Invalid path: contains null byte".to_string(),
            )));
        };

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe {
            ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags.to_sqlite_flags(), ptr::null())
        };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is valid even though open failed, and must be closed
                unsafe {
                    let msg = ffi::errmsg(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            return Err(inner.fail(connection_error(
                ConnectionErrorKind::Open,
                rc,
                format!("Failed to open database: {}", msg),
            )));
        }

        inner.db = db;
        inner.flags = flags;
        inner.in_transaction = false;
        tracing::debug!(path = %self.path, "opened database");
        Ok(())
    }

    /// Close the database.
    ///
    /// Open cursors are force-closed and every cached statement is
    /// finalized first. Closing a closed connection does nothing.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.db.is_null() {
            return Ok(());
        }

        let forced = inner.close_cursors();
        if forced > 0 {
            tracing::debug!(count = forced, "force-closed open cursors");
        }
        inner.cache.clear();

        let db = inner.db;
        // SAFETY: db is valid; every statement we own has been finalized
        let mut rc = unsafe { ffi::sqlite3_close(db) };
        if ffi::is_busy_code(rc) {
            tracing::debug!("close reported busy; finalizing leftover statements");
            // SAFETY: db is still open; next_stmt walks statements SQLite
            // still tracks, none of which are referenced elsewhere
            unsafe {
                loop {
                    let stmt = ffi::sqlite3_next_stmt(db, ptr::null_mut());
                    if stmt.is_null() {
                        break;
                    }
                    ffi::sqlite3_finalize(stmt);
                }
                rc = ffi::sqlite3_close(db);
            }
        }

        if rc != ffi::SQLITE_OK {
            // SAFETY: close failed, so db is still valid
            let msg = unsafe { ffi::errmsg(db) };
            return Err(inner.fail(connection_error(
                ConnectionErrorKind::Close,
                rc,
                format!("Failed to close database: {}", msg),
            )));
        }

        inner.db = ptr::null_mut();
        inner.in_transaction = false;
        tracing::debug!(path = %self.path, "closed database");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        !self.lock().db.is_null()
    }

    /// Is the connection open and able to answer a trivial query?
    pub fn good_connection(&self) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.execute_query("SELECT name FROM sqlite_master WHERE type = 'table'", ()) {
            Ok(mut cursor) => {
                cursor.close();
                true
            }
            Err(_) => false,
        }
    }

    /// Execute a statement that returns no rows we care about.
    ///
    /// Steps the statement to completion and returns the number of rows it
    /// changed. `sql` must hold a single statement; use
    /// [`execute_batch`](Self::execute_batch) for several.
    pub fn execute_update(&self, sql: &str, params: impl Into<Params>) -> Result<u64> {
        let params = params.into();
        let _in_use = self.enter()?;
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.last_error = None;
        inner.ensure_open()?;

        if inner.trace_execution {
            tracing::info!(sql, params = params.len(), "execute update");
        }

        let lease = inner.prepare_bound(sql, &params)?;
        let outcome = match inner.cache.statement(&lease) {
            Some(stmt) => run_to_completion(inner.db, stmt, inner.busy_retry_timeout),
            None => Err(stale_statement(sql)),
        };
        inner.cache.checkin(lease);
        outcome.map_err(|e| inner.fail(e))?;

        // SAFETY: db is open
        let changes = unsafe { ffi::sqlite3_changes(inner.db) };
        Ok(u64::try_from(changes).unwrap_or(0))
    }

    /// Execute a query and return a cursor positioned before the first row.
    ///
    /// The statement stays lent to the cursor until it is exhausted or
    /// closed.
    pub fn execute_query(&self, sql: &str, params: impl Into<Params>) -> Result<ResultCursor<'_>> {
        let params = params.into();
        let _in_use = self.enter()?;
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.last_error = None;
        inner.ensure_open()?;

        if inner.trace_execution {
            tracing::info!(sql, params = params.len(), "execute query");
        }

        let lease = inner.prepare_bound(sql, &params)?;
        let id = inner.next_cursor_id();
        inner.cursors.insert(id, lease);
        drop(guard);

        Ok(ResultCursor::new(self, id, sql))
    }

    /// Execute one or more semicolon-separated statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let _in_use = self.enter()?;
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.last_error = None;
        inner.ensure_open()?;

        if inner.trace_execution {
            tracing::info!(sql, "execute batch");
        }

        let Ok(c_sql) = CString::new(sql) else {
            return Err(inner.fail(query_error(
                QueryErrorKind::Prepare,
                ffi::SQLITE_MISUSE,
                sql,
                "SQL contains null byte".to_string(),
            )));
        };

        let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_exec(inner.db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg)
        };

        if rc != ffi::SQLITE_OK {
            let msg = if errmsg.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: errmsg was allocated by SQLite and must be freed by it
                unsafe {
                    let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                    ffi::sqlite3_free(errmsg.cast());
                    msg
                }
            };
            return Err(inner.fail(query_error(QueryErrorKind::Step, rc, sql, msg)));
        }

        Ok(())
    }

    /// Compile `sql` and finalize it straight away.
    pub(crate) fn prepare_only(&self, sql: &str) -> Result<()> {
        let _in_use = self.enter()?;
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.last_error = None;
        inner.ensure_open()?;
        match prepare_with_retry(inner.db, sql, inner.busy_retry_timeout) {
            Ok(mut stmt) => {
                stmt.finalize();
                Ok(())
            }
            Err(e) => Err(inner.fail(e)),
        }
    }

    /// Begin an exclusive transaction.
    pub fn begin_transaction(&self) -> Result<()> {
        self.execute_update("BEGIN EXCLUSIVE TRANSACTION", ())?;
        self.lock().in_transaction = true;
        Ok(())
    }

    /// Begin a deferred transaction.
    pub fn begin_deferred_transaction(&self) -> Result<()> {
        self.execute_update("BEGIN DEFERRED TRANSACTION", ())?;
        self.lock().in_transaction = true;
        Ok(())
    }

    /// Commit the current transaction.
    pub fn commit(&self) -> Result<()> {
        self.execute_update("COMMIT TRANSACTION", ())?;
        self.lock().in_transaction = false;
        Ok(())
    }

    /// Roll back the current transaction.
    pub fn rollback(&self) -> Result<()> {
        self.execute_update("ROLLBACK TRANSACTION", ())?;
        self.lock().in_transaction = false;
        Ok(())
    }

    /// Begin an exclusive transaction that rolls back unless committed.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        Transaction::begin(self, false)
    }

    /// Begin a deferred transaction that rolls back unless committed.
    pub fn deferred_transaction(&self) -> Result<Transaction<'_>> {
        Transaction::begin(self, true)
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().in_transaction
    }

    /// Result code of the most recent failure, or 0 if the last operation
    /// succeeded.
    pub fn last_error_code(&self) -> i32 {
        self.lock().last_error.as_ref().map_or(ffi::SQLITE_OK, |(code, _)| *code)
    }

    /// Message of the most recent failure.
    pub fn last_error_message(&self) -> String {
        self.lock().last_error.as_ref().map_or_else(
            || ffi::error_string(ffi::SQLITE_OK).to_string(),
            |(_, message)| message.clone(),
        )
    }

    pub fn had_error(&self) -> bool {
        self.lock().last_error.is_some()
    }

    /// Get the last insert rowid.
    pub fn last_insert_rowid(&self) -> i64 {
        let inner = self.lock();
        if inner.db.is_null() {
            return 0;
        }
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_last_insert_rowid(inner.db) }
    }

    /// Get the number of rows changed by the last statement.
    pub fn changes(&self) -> u64 {
        let inner = self.lock();
        if inner.db.is_null() {
            return 0;
        }
        // SAFETY: db is valid
        let n = unsafe { ffi::sqlite3_changes(inner.db) };
        u64::try_from(n).unwrap_or(0)
    }

    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Set or clear the in-use flag by hand.
    ///
    /// While set, top-level operations fail with
    /// [`ConnectionErrorKind::InUse`].
    pub fn set_in_use(&self, in_use: bool) {
        self.in_use.store(in_use, Ordering::Release);
    }

    pub fn should_cache_statements(&self) -> bool {
        self.lock().cache.is_enabled()
    }

    /// Turn statement caching on or off. Turning it off finalizes every
    /// cached statement, including those lent to open cursors.
    pub fn set_should_cache_statements(&self, enabled: bool) {
        self.lock().cache.set_enabled(enabled);
    }

    pub fn crash_on_errors(&self) -> bool {
        self.lock().crash_on_errors
    }

    pub fn set_crash_on_errors(&self, enabled: bool) {
        self.lock().crash_on_errors = enabled;
    }

    pub fn logs_errors(&self) -> bool {
        self.lock().logs_errors
    }

    pub fn set_logs_errors(&self, enabled: bool) {
        self.lock().logs_errors = enabled;
    }

    pub fn trace_execution(&self) -> bool {
        self.lock().trace_execution
    }

    pub fn set_trace_execution(&self, enabled: bool) {
        self.lock().trace_execution = enabled;
    }

    pub fn busy_retry_timeout(&self) -> Duration {
        self.lock().busy_retry_timeout
    }

    pub fn set_busy_retry_timeout(&self, timeout: Duration) {
        self.lock().busy_retry_timeout = timeout;
    }

    /// Finalize every cached statement.
    pub fn clear_cached_statements(&self) {
        self.lock().cache.clear();
    }

    /// Force-close every open cursor on this connection.
    pub fn close_open_cursors(&self) {
        let forced = self.lock().close_cursors();
        if forced > 0 {
            tracing::debug!(count = forced, "force-closed open cursors");
        }
    }

    pub fn open_cursor_count(&self) -> usize {
        self.lock().cursors.len()
    }

    pub fn cached_statement_count(&self) -> usize {
        self.lock().cache.len()
    }

    /// How many times the cached statement for `sql` has been used.
    pub fn statement_use_count(&self, sql: &str) -> Option<u64> {
        self.lock().cache.use_count(sql)
    }

    /// Version string of the linked SQLite library.
    pub fn sqlite_lib_version() -> &'static str {
        ffi::version()
    }

    /// Was the linked SQLite library built thread-safe?
    pub fn is_thread_safe() -> bool {
        ffi::is_thread_safe()
    }

    // Cursor support. Each call locks the connection for its own duration.

    /// Advance a cursor's statement. `Ok(false)` means the rows are
    /// exhausted and the statement has been returned.
    pub(crate) fn step_cursor(&self, id: CursorId, sql: &str) -> Result<bool> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let timeout = inner.busy_retry_timeout;
        let stepped = inner.cursors.get(&id).map(|lease| {
            inner
                .cache
                .statement(lease)
                .map(|stmt| step_with_retry(stmt, timeout))
        });

        match stepped {
            None => Err(inner.fail(cursor_closed())),
            Some(None) => {
                inner.release_cursor(id);
                Err(inner.fail(cursor_reclaimed()))
            }
            Some(Some(ffi::SQLITE_ROW)) => Ok(true),
            Some(Some(ffi::SQLITE_DONE)) => {
                inner.release_cursor(id);
                Ok(false)
            }
            Some(Some(rc)) => {
                // SAFETY: db is open while the cursor slot exists
                let msg = unsafe { ffi::errmsg(inner.db) };
                inner.release_cursor(id);
                Err(inner.fail(query_error(QueryErrorKind::Step, rc, sql, msg)))
            }
        }
    }

    /// Run `f` against a cursor's statement while the connection is locked.
    ///
    /// `f` must not call back into this connection.
    pub(crate) fn with_cursor_statement<R>(
        &self,
        id: CursorId,
        f: impl FnOnce(&PreparedStatement) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let result = inner
            .cursors
            .get(&id)
            .map(|lease| inner.cache.statement(lease).map(f));

        match result {
            Some(Some(Ok(value))) => Ok(value),
            Some(Some(Err(e))) => Err(inner.fail(e)),
            Some(None) => {
                inner.release_cursor(id);
                Err(inner.fail(cursor_reclaimed()))
            }
            None => Err(inner.fail(cursor_closed())),
        }
    }

    /// Return a cursor's statement. Does nothing if already returned.
    pub(crate) fn release_cursor(&self, id: CursorId) {
        self.lock().release_cursor(id);
    }

    /// Record a failure detected outside the connection (cursor misuse).
    pub(crate) fn report(&self, err: Error) -> Error {
        self.lock().fail(err)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close database on drop");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Connection")
            .field("path", &self.path)
            .field("open", &!inner.db.is_null())
            .field("in_transaction", &inner.in_transaction)
            .field("cached_statements", &inner.cache.len())
            .field("open_cursors", &inner.cursors.len())
            .finish_non_exhaustive()
    }
}

// Helper functions

fn prepare_with_retry(
    db: *mut ffi::sqlite3,
    sql: &str,
    timeout: Duration,
) -> Result<PreparedStatement> {
    let start = Instant::now();
    loop {
        match PreparedStatement::prepare(db, sql) {
            Err(e) if e.is_busy() => {
                if start.elapsed() < timeout {
                    std::thread::sleep(BUSY_RETRY_SLEEP);
                    continue;
                }
                tracing::warn!(
                    sql,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "database busy; giving up on prepare"
                );
                return Err(e);
            }
            other => return other,
        }
    }
}

fn step_with_retry(stmt: &PreparedStatement, timeout: Duration) -> c_int {
    let start = Instant::now();
    loop {
        let rc = stmt.step();
        if !ffi::is_busy_code(rc) {
            return rc;
        }
        if start.elapsed() >= timeout {
            tracing::warn!(
                sql = stmt.sql(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "database busy; giving up on step"
            );
            return rc;
        }
        std::thread::sleep(BUSY_RETRY_SLEEP);
    }
}

fn run_to_completion(
    db: *mut ffi::sqlite3,
    stmt: &PreparedStatement,
    timeout: Duration,
) -> Result<()> {
    loop {
        match step_with_retry(stmt, timeout) {
            ffi::SQLITE_ROW => {}
            ffi::SQLITE_DONE => return Ok(()),
            rc => {
                // SAFETY: db is open
                let msg = unsafe { ffi::errmsg(db) };
                return Err(query_error(QueryErrorKind::Step, rc, stmt.sql(), msg));
            }
        }
    }
}

fn connection_error(kind: ConnectionErrorKind, code: c_int, message: String) -> Error {
    Error::Connection(ConnectionError {
        kind,
        code,
        message,
        source: None,
    })
}

fn query_error(kind: QueryErrorKind, code: c_int, sql: &str, message: String) -> Error {
    Error::Query(QueryError {
        kind,
        code,
        sql: Some(sql.to_string()),
        message,
    })
}

fn stale_statement(sql: &str) -> Error {
    query_error(
        QueryErrorKind::Step,
        ffi::SQLITE_MISUSE,
        sql,
        "statement was finalized while checked out".to_string(),
    )
}

fn cursor_closed() -> Error {
    Error::Cursor(CursorError {
        kind: CursorErrorKind::Closed,
        code: ffi::SQLITE_MISUSE,
        message: "cursor is closed".to_string(),
    })
}

fn cursor_reclaimed() -> Error {
    Error::Cursor(CursorError {
        kind: CursorErrorKind::Closed,
        code: ffi::SQLITE_MISUSE,
        message: "cursor statement was finalized by its connection".to_string(),
    })
}
