//! Parameter binding.

use crate::ffi;
use crate::statement::PreparedStatement;
use litekit_core::error::{BindError, BindErrorKind};
use litekit_core::{Params, Value};
use std::collections::HashSet;

/// Bind every argument in `params` to `stmt`.
///
/// The number of arguments must equal the statement's parameter count.
/// Named arguments may carry their sigil or be bare, in which case `:`, `@`
/// and `$` are tried in that order.
pub fn bind_params(stmt: &PreparedStatement, params: &Params) -> Result<(), BindError> {
    let expected = stmt.parameter_count();
    let actual = params.len();
    if expected != actual {
        return Err(BindError {
            kind: BindErrorKind::CountMismatch { expected, actual },
            code: ffi::SQLITE_RANGE,
            sql: Some(stmt.sql().to_string()),
            message: format!(
                "statement expects {} argument{}, got {}",
                expected,
                if expected == 1 { "" } else { "s" },
                actual
            ),
        });
    }

    match params {
        Params::Positional(values) => {
            for (i, value) in values.iter().enumerate() {
                bind_one(stmt, i + 1, value, || format!("parameter {}", i + 1))?;
            }
        }
        Params::Named(pairs) => {
            let mut bound = HashSet::with_capacity(pairs.len());
            for (name, value) in pairs {
                let Some(index) = resolve_name(stmt, name) else {
                    return Err(BindError {
                        kind: BindErrorKind::UnknownParameter,
                        code: ffi::SQLITE_RANGE,
                        sql: Some(stmt.sql().to_string()),
                        message: format!("no parameter named {:?}", name),
                    });
                };
                if !bound.insert(index) {
                    return Err(BindError {
                        kind: BindErrorKind::DuplicateParameter,
                        code: ffi::SQLITE_RANGE,
                        sql: Some(stmt.sql().to_string()),
                        message: format!(
                            "{:?} names parameter {} a second time",
                            name, index
                        ),
                    });
                }
                bind_one(stmt, index, value, || format!("parameter {:?}", name))?;
            }
        }
    }

    tracing::trace!(sql = stmt.sql(), count = actual, "bound parameters");
    Ok(())
}

fn bind_one(
    stmt: &PreparedStatement,
    index: usize,
    value: &Value,
    describe: impl FnOnce() -> String,
) -> Result<(), BindError> {
    let rc = stmt.bind(index, value);
    if rc == ffi::SQLITE_OK {
        return Ok(());
    }
    Err(BindError {
        kind: BindErrorKind::Native,
        code: rc,
        sql: Some(stmt.sql().to_string()),
        message: format!(
            "failed to bind {} ({}): {}",
            describe(),
            value.type_name(),
            ffi::error_string(rc)
        ),
    })
}

fn resolve_name(stmt: &PreparedStatement, name: &str) -> Option<usize> {
    if name.starts_with([':', '@', '$', '?']) {
        return stmt.parameter_index(name);
    }
    [':', '@', '$']
        .iter()
        .find_map(|sigil| stmt.parameter_index(&format!("{sigil}{name}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::testing::MemoryDb;
    use litekit_core::{named_params, params};

    #[test]
    fn test_exact_count_binds() {
        let db = MemoryDb::open();
        let stmt = db.prepare("SELECT ?, ?, ?").unwrap();
        bind_params(&stmt, &params![1, "two", 3.0]).unwrap();
        assert_eq!(stmt.step(), ffi::SQLITE_ROW);
        assert_eq!(stmt.column_i64(0), 1);
        assert_eq!(stmt.column_text(1), "two");
        assert!((stmt.column_double(2) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_too_few_and_too_many() {
        let db = MemoryDb::open();
        let stmt = db.prepare("SELECT ?, ?").unwrap();

        let err = bind_params(&stmt, &params![1]).unwrap_err();
        assert_eq!(
            err.kind,
            BindErrorKind::CountMismatch {
                expected: 2,
                actual: 1
            }
        );
        assert_eq!(err.code, ffi::SQLITE_RANGE);

        let err = bind_params(&stmt, &params![1, 2, 3]).unwrap_err();
        assert_eq!(
            err.kind,
            BindErrorKind::CountMismatch {
                expected: 2,
                actual: 3
            }
        );
        assert_eq!(err.sql.as_deref(), Some("SELECT ?, ?"));
    }

    #[test]
    fn test_no_parameters() {
        let db = MemoryDb::open();
        let stmt = db.prepare("SELECT 1").unwrap();
        bind_params(&stmt, &Params::none()).unwrap();
        assert!(bind_params(&stmt, &params![1]).is_err());
    }

    #[test]
    fn test_named_with_and_without_sigil() {
        let db = MemoryDb::open();
        let stmt = db.prepare("SELECT :a, @b, $c").unwrap();
        bind_params(&stmt, &named_params! { "c" => 3, ":a" => 1, "b" => 2 }).unwrap();
        assert_eq!(stmt.step(), ffi::SQLITE_ROW);
        assert_eq!(stmt.column_i64(0), 1);
        assert_eq!(stmt.column_i64(1), 2);
        assert_eq!(stmt.column_i64(2), 3);
    }

    #[test]
    fn test_unknown_name() {
        let db = MemoryDb::open();
        let stmt = db.prepare("SELECT :a").unwrap();
        let err = bind_params(&stmt, &named_params! { "nope" => 1 }).unwrap_err();
        assert_eq!(err.kind, BindErrorKind::UnknownParameter);
        assert!(err.message.contains("nope"));
    }

    #[test]
    fn test_same_parameter_named_twice() {
        let db = MemoryDb::open();
        let stmt = db.prepare("SELECT :a, :b").unwrap();
        let err = bind_params(&stmt, &named_params! { "a" => 1, ":a" => 2 }).unwrap_err();
        assert_eq!(err.kind, BindErrorKind::DuplicateParameter);
        assert_eq!(err.code, ffi::SQLITE_RANGE);
        assert!(err.message.contains(":a"));
    }

    #[test]
    fn test_repeated_placeholder_binds_once() {
        let db = MemoryDb::open();
        let stmt = db.prepare("SELECT :a, :a + 1").unwrap();
        bind_params(&stmt, &named_params! { "a" => 41 }).unwrap();
        assert_eq!(stmt.step(), ffi::SQLITE_ROW);
        assert_eq!(stmt.column_i64(0), 41);
        assert_eq!(stmt.column_i64(1), 42);
    }

    #[test]
    fn test_null_and_blob() {
        let db = MemoryDb::open();
        let stmt = db.prepare("SELECT ?, ?").unwrap();
        bind_params(&stmt, &params![Option::<i64>::None, vec![9u8, 8]]).unwrap();
        assert_eq!(stmt.step(), ffi::SQLITE_ROW);
        assert!(stmt.column_is_null(0));
        assert_eq!(stmt.column_blob(1), vec![9, 8]);
    }
}
