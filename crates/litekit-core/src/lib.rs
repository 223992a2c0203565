//! Core types for litekit.
//!
//! This crate holds the engine-agnostic pieces shared by the SQLite driver:
//!
//! - `Value` for everything that crosses the binding boundary, in both
//!   directions
//! - `Params` for positional or named argument lists
//! - `Error` and the per-failure detail structs

pub mod error;
pub mod params;
pub mod value;

pub use error::{
    BindError, BindErrorKind, ConfigError, ConnectionError, ConnectionErrorKind, CursorError,
    CursorErrorKind, Error, QueryError, QueryErrorKind, Result,
};
pub use params::Params;
pub use value::Value;
