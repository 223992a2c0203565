use litekit::prelude::*;
use litekit::{QueryError, QueryErrorKind};
use std::time::{Duration, Instant};

const INSERT: &str = "INSERT INTO jobs (name) VALUES (?)";

fn shared_db() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("shared.db").to_string_lossy().into_owned();
    (dir, path)
}

#[test]
fn exclusive_lock_times_out_then_succeeds() {
    let (_dir, path) = shared_db();

    let writer = Connection::with_config(
        ConnectionConfig::file(&path)
            .cache_statements(true)
            .busy_retry_timeout(Duration::from_millis(50)),
    );
    writer.open().unwrap();
    writer
        .execute_update("CREATE TABLE jobs (id INTEGER PRIMARY KEY, name TEXT)", ())
        .unwrap();
    // compiled once so the later attempt fails while stepping
    writer.execute_update(INSERT, params!["first"]).unwrap();

    let holder = Connection::new(&path);
    holder.open().unwrap();
    holder.begin_transaction().unwrap();

    let started = Instant::now();
    let err = writer.execute_update(INSERT, params!["second"]).unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(err.is_busy());
    assert!(matches!(
        err,
        Error::Query(QueryError {
            kind: QueryErrorKind::Step,
            ..
        })
    ));
    assert_eq!(writer.last_error_code(), 5);
    assert!(writer.last_error_message().contains("locked"));

    holder.commit().unwrap();

    writer.execute_update(INSERT, params!["second"]).unwrap();
    assert!(!writer.had_error());
    assert_eq!(
        writer.long_for_query("SELECT count(*) FROM jobs", ()).unwrap(),
        Some(2)
    );
}

#[test]
fn lock_released_within_the_window_is_waited_out() {
    let (_dir, path) = shared_db();

    let setup = Connection::new(&path);
    setup.open().unwrap();
    setup
        .execute_update("CREATE TABLE jobs (id INTEGER PRIMARY KEY, name TEXT)", ())
        .unwrap();
    setup.close().unwrap();

    let holder = Connection::new(&path);
    holder.open().unwrap();
    holder.begin_transaction().unwrap();

    let writer = Connection::with_config(
        ConnectionConfig::file(&path).busy_retry_timeout(Duration::from_secs(10)),
    );
    writer.open().unwrap();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            std::thread::sleep(Duration::from_millis(50));
            holder.commit().unwrap();
        });
        writer.execute_update(INSERT, params!["waited"]).unwrap();
    });

    assert_eq!(
        writer.string_for_query("SELECT name FROM jobs", ()).unwrap(),
        Some("waited".to_string())
    );
}

#[test]
fn in_use_flag_rejects_overlapping_calls() {
    let conn = Connection::memory();
    conn.open().unwrap();

    std::thread::scope(|scope| {
        scope
            .spawn(|| conn.set_in_use(true))
            .join()
            .unwrap();
    });

    assert!(conn.in_use());
    let err = conn.execute_query("SELECT 1", ()).unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    assert_eq!(conn.last_error_code(), 21);

    conn.set_in_use(false);
    assert_eq!(conn.int_for_query("SELECT 1", ()).unwrap(), Some(1));
    assert!(!conn.in_use());
}
