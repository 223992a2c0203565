//! Connection configuration.

use crate::ffi;
use litekit_core::error::ConfigError;
use litekit_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ffi::c_int;
use std::time::Duration;

/// Default window during which busy/locked results are retried.
pub const DEFAULT_BUSY_RETRY_TIMEOUT_MS: u64 = 2000;

/// Configuration for a [`Connection`](crate::Connection).
///
/// Every field can also be changed on a live connection; the config only
/// supplies the starting values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Path to the database file, or ":memory:" for an in-memory database.
    /// An empty path asks SQLite for a private temporary database.
    pub path: String,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// How long to keep retrying busy/locked results, in milliseconds.
    pub busy_retry_timeout_ms: u64,
    /// Keep compiled statements for reuse.
    pub cache_statements: bool,
    /// Emit failures at error level.
    pub logs_errors: bool,
    /// Abort the process on the first failure.
    pub crash_on_errors: bool,
    /// Emit every executed statement at info level.
    pub trace_execution: bool,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
    /// Open an in-memory database regardless of the path.
    pub memory: bool,
    /// Open in multi-thread mode.
    pub no_mutex: bool,
    /// Open in serialized mode.
    pub full_mutex: bool,
    /// Enable shared cache mode.
    pub shared_cache: bool,
    /// Disable shared cache mode.
    pub private_cache: bool,
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access (database must exist).
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    pub(crate) fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if self.memory {
            flags |= ffi::SQLITE_OPEN_MEMORY;
        }
        if self.no_mutex {
            flags |= ffi::SQLITE_OPEN_NOMUTEX;
        }
        if self.full_mutex {
            flags |= ffi::SQLITE_OPEN_FULLMUTEX;
        }
        if self.shared_cache {
            flags |= ffi::SQLITE_OPEN_SHAREDCACHE;
        }
        if self.private_cache {
            flags |= ffi::SQLITE_OPEN_PRIVATECACHE;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_retry_timeout_ms: DEFAULT_BUSY_RETRY_TIMEOUT_MS,
            cache_statements: false,
            logs_errors: true,
            crash_on_errors: false,
            trace_execution: false,
        }
    }
}

impl ConnectionConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Parse a config from JSON. Missing fields take their default values.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid connection config: {}", e),
                source: Some(Box::new(e)),
            })
        })
    }

    /// Set open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the busy retry window.
    pub fn busy_retry_timeout(mut self, timeout: Duration) -> Self {
        self.busy_retry_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn cache_statements(mut self, enabled: bool) -> Self {
        self.cache_statements = enabled;
        self
    }

    pub fn logs_errors(mut self, enabled: bool) -> Self {
        self.logs_errors = enabled;
        self
    }

    pub fn crash_on_errors(mut self, enabled: bool) -> Self {
        self.crash_on_errors = enabled;
        self
    }

    pub fn trace_execution(mut self, enabled: bool) -> Self {
        self.trace_execution = enabled;
        self
    }

    pub(crate) fn busy_retry_duration(&self) -> Duration {
        Duration::from_millis(self.busy_retry_timeout_ms)
    }
}
