use litekit::prelude::*;
use std::process::Command;
use std::time::Duration;

/// Set in a re-executed copy of this test binary to run the failing side.
const CRASH_CHILD_ENV: &str = "LITEKIT_CRASH_CHILD";

#[test]
fn connection_from_json_config() {
    let config = ConnectionConfig::from_json(
        r#"{
            "cache_statements": true,
            "busy_retry_timeout_ms": 250,
            "trace_execution": true
        }"#,
    )
    .unwrap();
    assert_eq!(config.path, ":memory:");

    let conn = Connection::with_config(config);
    assert!(conn.should_cache_statements());
    assert!(conn.trace_execution());
    assert!(conn.logs_errors());
    assert_eq!(conn.busy_retry_timeout(), Duration::from_millis(250));

    conn.open().unwrap();
    assert_eq!(conn.int_for_query("SELECT 1", ()).unwrap(), Some(1));
    assert_eq!(conn.cached_statement_count(), 1);
}

#[test]
fn malformed_json_is_a_config_error() {
    let err = ConnectionConfig::from_json(r#"{"cache_statements": "yes"}"#).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.message().contains("invalid connection config"));
}

#[test]
fn config_round_trips_through_json() {
    let config = ConnectionConfig::file("app.db")
        .cache_statements(true)
        .crash_on_errors(false)
        .busy_retry_timeout(Duration::from_secs(1));
    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(ConnectionConfig::from_json(&json).unwrap(), config);
}

#[test]
fn read_only_connection_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ro.db").to_string_lossy().into_owned();

    let setup = Connection::new(&path);
    setup.open().unwrap();
    setup.execute_update("CREATE TABLE t (a)", ()).unwrap();
    setup.close().unwrap();

    let conn = Connection::with_config(ConnectionConfig::file(&path).flags(OpenFlags::read_only()));
    conn.open().unwrap();
    assert_eq!(conn.long_for_query("SELECT count(*) FROM t", ()).unwrap(), Some(0));

    let err = conn.execute_update("INSERT INTO t VALUES (1)", ()).unwrap_err();
    assert!(err.message().contains("readonly"));
    assert_eq!(conn.last_error_code() & 0xff, 8);
}

fn run_crash_child(crash_on_errors: bool) -> std::process::Output {
    let exe = std::env::current_exe().expect("locate test binary");
    Command::new(exe)
        .args(["crash_on_errors_aborts_the_process", "--exact", "--test-threads=1"])
        .env(CRASH_CHILD_ENV, if crash_on_errors { "1" } else { "0" })
        .output()
        .expect("spawn test binary")
}

#[test]
fn crash_on_errors_aborts_the_process() {
    if let Some(mode) = std::env::var_os(CRASH_CHILD_ENV) {
        let conn = Connection::memory();
        conn.open().unwrap();
        conn.set_crash_on_errors(mode == "1");
        let _ = conn.execute_update("SELEKT 1", ());
        // reached only when the failure did not abort
        std::process::exit(0);
    }

    let survived = run_crash_child(false);
    assert!(survived.status.success(), "{survived:?}");

    let crashed = run_crash_child(true);
    assert!(!crashed.status.success(), "{crashed:?}");
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(crashed.status.signal(), Some(6));
    }
}
