//! Per-connection cache of compiled statements.
//!
//! Entries are keyed by the exact SQL text. A cached statement is lent to at
//! most one user at a time; a second checkout of the same SQL while the first
//! is still out compiles a private, uncached statement instead.

use crate::statement::{PreparedStatement, StatementId};
use litekit_core::Result;
use std::collections::HashMap;

/// A checked-out statement.
///
/// Cached leases only name their entry; the statement itself stays in the
/// cache so that a flush can finalize it even while the lease is out.
#[derive(Debug)]
pub enum Lease {
    Cached { sql: String, id: StatementId },
    Uncached(PreparedStatement),
}

impl Lease {
    pub fn is_cached(&self) -> bool {
        matches!(self, Lease::Cached { .. })
    }
}

#[derive(Debug)]
struct CacheEntry {
    statement: PreparedStatement,
    checked_out: bool,
}

/// Compiled statements keyed by SQL text.
#[derive(Debug, Default)]
pub struct StatementCache {
    enabled: bool,
    entries: HashMap<String, CacheEntry>,
}

impl StatementCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turn caching on or off. Turning it off finalizes every entry.
    pub fn set_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.clear();
        }
        self.enabled = enabled;
    }

    /// Hand out a statement for `sql`.
    ///
    /// `compile` is only called on a miss, when caching is disabled, or when
    /// the cached statement is already checked out.
    pub fn checkout(
        &mut self,
        sql: &str,
        compile: impl FnOnce() -> Result<PreparedStatement>,
    ) -> Result<Lease> {
        if !self.enabled {
            return compile().map(Lease::Uncached);
        }

        if let Some(entry) = self.entries.get_mut(sql) {
            if entry.checked_out {
                tracing::trace!(sql, "cached statement busy; compiling a private copy");
                return compile().map(Lease::Uncached);
            }
            entry.statement.reset();
            entry.statement.mark_used();
            entry.checked_out = true;
            tracing::trace!(
                sql,
                use_count = entry.statement.use_count(),
                "statement cache hit"
            );
            return Ok(Lease::Cached {
                sql: sql.to_string(),
                id: entry.statement.id(),
            });
        }

        tracing::trace!(sql, "statement cache miss");
        let statement = compile()?;
        let id = statement.id();
        self.entries.insert(
            sql.to_string(),
            CacheEntry {
                statement,
                checked_out: true,
            },
        );
        Ok(Lease::Cached {
            sql: sql.to_string(),
            id,
        })
    }

    /// Return a lease. Stale cached leases are ignored.
    pub fn checkin(&mut self, lease: Lease) {
        match lease {
            Lease::Cached { sql, id } => {
                if let Some(entry) = self.entries.get_mut(&sql) {
                    if entry.statement.id() == id {
                        entry.statement.reset();
                        entry.checked_out = false;
                    }
                }
            }
            Lease::Uncached(mut statement) => statement.finalize(),
        }
    }

    /// Resolve a lease to its statement, or `None` if the entry was flushed.
    pub fn statement<'a>(&'a self, lease: &'a Lease) -> Option<&'a PreparedStatement> {
        match lease {
            Lease::Cached { sql, id } => self
                .entries
                .get(sql)
                .map(|entry| &entry.statement)
                .filter(|statement| statement.id() == *id),
            Lease::Uncached(statement) => Some(statement),
        }
    }

    /// Finalize and drop every entry, including checked-out ones.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            tracing::debug!(count = self.entries.len(), "clearing statement cache");
        }
        for (_, mut entry) in self.entries.drain() {
            entry.statement.finalize();
        }
    }

    pub fn contains(&self, sql: &str) -> bool {
        self.entries.contains_key(sql)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Use count of the cached statement for `sql`, if any.
    pub fn use_count(&self, sql: &str) -> Option<u64> {
        self.entries.get(sql).map(|entry| entry.statement.use_count())
    }

    pub fn is_checked_out(&self, sql: &str) -> bool {
        self.entries.get(sql).is_some_and(|entry| entry.checked_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::testing::MemoryDb;
    use std::cell::Cell;

    const SQL: &str = "SELECT 1";

    #[test]
    fn test_disabled_always_compiles() {
        let db = MemoryDb::open();
        let mut cache = StatementCache::new(false);
        let lease = cache.checkout(SQL, || db.prepare(SQL)).unwrap();
        assert!(!lease.is_cached());
        assert!(cache.is_empty());
        cache.checkin(lease);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hit_reuses_statement() {
        let db = MemoryDb::open();
        let mut cache = StatementCache::new(true);

        let lease = cache.checkout(SQL, || db.prepare(SQL)).unwrap();
        let first_id = cache.statement(&lease).unwrap().id();
        assert!(cache.is_checked_out(SQL));
        cache.checkin(lease);
        assert!(!cache.is_checked_out(SQL));

        let compiled = Cell::new(false);
        let lease = cache
            .checkout(SQL, || {
                compiled.set(true);
                db.prepare(SQL)
            })
            .unwrap();
        assert!(!compiled.get());
        assert_eq!(cache.statement(&lease).unwrap().id(), first_id);
        assert_eq!(cache.use_count(SQL), Some(2));
        cache.checkin(lease);
    }

    #[test]
    fn test_checked_out_entry_compiles_private_copy() {
        let db = MemoryDb::open();
        let mut cache = StatementCache::new(true);

        let held = cache.checkout(SQL, || db.prepare(SQL)).unwrap();
        let second = cache.checkout(SQL, || db.prepare(SQL)).unwrap();
        assert!(held.is_cached());
        assert!(!second.is_cached());
        assert_ne!(
            cache.statement(&held).unwrap().id(),
            cache.statement(&second).unwrap().id()
        );
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.use_count(SQL), Some(1));

        cache.checkin(second);
        cache.checkin(held);
        assert!(!cache.is_checked_out(SQL));
    }

    #[test]
    fn test_clear_makes_leases_stale() {
        let db = MemoryDb::open();
        let mut cache = StatementCache::new(true);

        let lease = cache.checkout(SQL, || db.prepare(SQL)).unwrap();
        cache.clear();
        assert!(cache.statement(&lease).is_none());

        // A new entry under the same SQL is not matched by the old lease
        let fresh = cache.checkout(SQL, || db.prepare(SQL)).unwrap();
        assert!(cache.statement(&lease).is_none());
        cache.checkin(lease);
        assert!(cache.is_checked_out(SQL));
        cache.checkin(fresh);
        assert!(!cache.is_checked_out(SQL));
    }

    #[test]
    fn test_disable_clears() {
        let db = MemoryDb::open();
        let mut cache = StatementCache::new(true);
        let lease = cache.checkout(SQL, || db.prepare(SQL)).unwrap();
        cache.checkin(lease);
        assert_eq!(cache.len(), 1);

        cache.set_enabled(false);
        assert!(!cache.is_enabled());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_compile_failure_leaves_cache_untouched() {
        let db = MemoryDb::open();
        let mut cache = StatementCache::new(true);
        let err = cache
            .checkout("SELEKT", || db.prepare("SELEKT"))
            .unwrap_err();
        assert_eq!(err.sql(), Some("SELEKT"));
        assert!(cache.is_empty());
    }
}
