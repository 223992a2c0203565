//! Statement arguments.
//!
//! A statement is bound either entirely by position (`?`, `?NNN`) or
//! entirely by name (`:name`, `@name`, `$name`). `Params` makes the two
//! styles mutually exclusive per call.

use crate::value::Value;
use std::collections::{BTreeMap, HashMap};

/// Arguments for one statement execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    /// Values bound to parameters 1..=N in order.
    Positional(Vec<Value>),
    /// Values bound by parameter name.
    ///
    /// Names may carry their sigil (`":id"`) or be bare (`"id"`).
    Named(Vec<(String, Value)>),
}

impl Params {
    /// No arguments.
    pub fn none() -> Self {
        Params::Positional(Vec::new())
    }

    /// Number of supplied arguments.
    pub fn len(&self) -> usize {
        match self {
            Params::Positional(values) => values.len(),
            Params::Named(pairs) => pairs.len(),
        }
    }

    /// Check if no arguments were supplied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if these are named arguments.
    pub fn is_named(&self) -> bool {
        matches!(self, Params::Named(_))
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::none()
    }
}

impl From<()> for Params {
    fn from((): ()) -> Self {
        Self::none()
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

impl From<&[Value]> for Params {
    fn from(values: &[Value]) -> Self {
        Params::Positional(values.to_vec())
    }
}

impl<const N: usize> From<[Value; N]> for Params {
    fn from(values: [Value; N]) -> Self {
        Params::Positional(values.into())
    }
}

impl From<Vec<(String, Value)>> for Params {
    fn from(pairs: Vec<(String, Value)>) -> Self {
        Params::Named(pairs)
    }
}

impl<S: std::hash::BuildHasher> From<HashMap<String, Value, S>> for Params {
    fn from(map: HashMap<String, Value, S>) -> Self {
        Params::Named(map.into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for Params {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Params::Named(map.into_iter().collect())
    }
}

/// Build positional [`Params`] from expressions convertible into `Value`.
///
/// ```
/// use litekit_core::{params, Params};
///
/// let p = params![1, "two", 3.0];
/// assert_eq!(p.len(), 3);
/// assert_eq!(params![], Params::none());
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::Positional(::std::vec::Vec::new())
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Params::Positional(::std::vec![$($crate::Value::from($value)),+])
    };
}

/// Build named [`Params`] from `name => value` pairs.
///
/// ```
/// use litekit_core::named_params;
///
/// let p = named_params! { "id" => 7, ":name" => "Alice" };
/// assert!(p.is_named());
/// assert_eq!(p.len(), 2);
/// ```
#[macro_export]
macro_rules! named_params {
    () => {
        $crate::Params::Named(::std::vec::Vec::new())
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::Params::Named(::std::vec![
            $((::std::string::String::from($name), $crate::Value::from($value))),+
        ])
    };
}
