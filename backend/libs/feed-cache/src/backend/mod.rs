//! Cache backend abstraction
//!
//! The feed components only need a handful of Redis primitives: string values
//! with TTL, lists, sets, counters, SCAN, and MULTI/EXEC batches. They are
//! expressed here as a trait so the same components run against Redis in
//! production and against `MemoryBackend` (behind the `test-util` feature)
//! in tests.

#[cfg(any(test, feature = "test-util"))]
mod memory;
mod redis_backend;

#[cfg(any(test, feature = "test-util"))]
pub use self::memory::MemoryBackend;
pub use self::redis_backend::RedisBackend;

use crate::CacheResult;
use std::sync::Arc;

/// Backend handle shared by every component
pub type SharedBackend = Arc<dyn CacheBackend>;

/// One command inside an atomic batch.
///
/// A batch runs without interleaving from other clients but has no rollback:
/// it is MULTI/EXEC, not a transaction. Batches holding a conditional op
/// (`RPushMissing`, `SeedSet`, `CountMembers`) run as a single server-side
/// script instead, with the same guarantees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    LPush { key: String, value: String },
    /// Append at the tail unless the list already holds `value`
    RPushMissing { key: String, value: String },
    LTrim { key: String, start: isize, stop: isize },
    /// Removes every occurrence of `value`
    LRem { key: String, value: String },
    SetEx { key: String, value: String, ttl_secs: u64 },
    Del { key: String },
    SAdd { key: String, member: String },
    SRem { key: String, member: String },
    /// Fill a set only if it does not exist yet
    SeedSet { key: String, members: Vec<String> },
    /// Overwrite `key` with the cardinality of `set`
    CountMembers { key: String, set: String },
}

impl BatchOp {
    pub fn key(&self) -> &str {
        match self {
            BatchOp::LPush { key, .. }
            | BatchOp::RPushMissing { key, .. }
            | BatchOp::LTrim { key, .. }
            | BatchOp::LRem { key, .. }
            | BatchOp::SetEx { key, .. }
            | BatchOp::Del { key }
            | BatchOp::SAdd { key, .. }
            | BatchOp::SRem { key, .. }
            | BatchOp::SeedSet { key, .. }
            | BatchOp::CountMembers { key, .. } => key,
        }
    }

    /// Whether the op reads state before writing, so MULTI/EXEC cannot express it
    pub fn is_conditional(&self) -> bool {
        matches!(
            self,
            BatchOp::RPushMissing { .. } | BatchOp::SeedSet { .. } | BatchOp::CountMembers { .. }
        )
    }
}

#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// One value per key, in key order
    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> CacheResult<()>;

    /// Returns the number of keys removed
    async fn del(&self, keys: &[String]) -> CacheResult<usize>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Inclusive range with Redis index semantics (negative counts from the tail)
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>>;

    async fn llen(&self, key: &str) -> CacheResult<usize>;

    async fn incr(&self, key: &str) -> CacheResult<i64>;

    async fn expire(&self, key: &str, ttl_secs: u64) -> CacheResult<()>;

    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool>;

    /// One SCAN step. A returned cursor of 0 means the iteration is complete.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize)
        -> CacheResult<(u64, Vec<String>)>;

    /// Execute all ops indivisibly
    async fn atomic(&self, ops: &[BatchOp]) -> CacheResult<()>;

    /// Execute ops in one round trip without the atomicity guarantee
    async fn pipeline(&self, ops: &[BatchOp]) -> CacheResult<()> {
        self.atomic(ops).await
    }
}

/// Lazy, restartable walk over the keys matching a pattern.
///
/// Each call to [`KeyScan::next_batch`] issues one SCAN step. When a step
/// fails the scan keeps its cursor, so the caller may retry or stop; keys
/// already yielded stay yielded.
pub struct KeyScan<'a> {
    backend: &'a dyn CacheBackend,
    pattern: String,
    count: usize,
    cursor: u64,
    finished: bool,
}

impl<'a> KeyScan<'a> {
    pub fn new(backend: &'a dyn CacheBackend, pattern: impl Into<String>, count: usize) -> Self {
        Self {
            backend,
            pattern: pattern.into(),
            count: count.max(1),
            cursor: 0,
            finished: false,
        }
    }

    /// Resume a scan from a cursor returned by an earlier [`KeyScan::cursor`]
    pub fn resume(mut self, cursor: u64) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// `Ok(None)` once the walk is complete. A batch may be empty while the
    /// walk is still in progress.
    pub async fn next_batch(&mut self) -> CacheResult<Option<Vec<String>>> {
        if self.finished {
            return Ok(None);
        }

        let (next, keys) = self
            .backend
            .scan(self.cursor, &self.pattern, self.count)
            .await?;

        self.cursor = next;
        if next == 0 {
            self.finished = true;
        }
        Ok(Some(keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_op_key() {
        let op = BatchOp::LTrim {
            key: "global:feed".into(),
            start: 0,
            stop: 199,
        };
        assert_eq!(op.key(), "global:feed");
        assert_eq!(BatchOp::Del { key: "thread:1".into() }.key(), "thread:1");
        assert!(!op.is_conditional());
        assert!(BatchOp::CountMembers {
            key: "graph:followers_count:u1".into(),
            set: "graph:followers:u1".into(),
        }
        .is_conditional());
    }

    #[tokio::test]
    async fn test_key_scan_visits_every_match_once() {
        let backend = MemoryBackend::new();
        for i in 0..25 {
            backend
                .set_ex(&format!("feed:user:u1:limit:{}:cursor:none", i), "{}", 60)
                .await
                .unwrap();
        }
        backend.set_ex("feed:user:u2:limit:1:cursor:none", "{}", 60).await.unwrap();

        let mut scan = KeyScan::new(&backend, "feed:user:u1:limit:*", 10);
        let mut seen = Vec::new();
        while let Some(batch) = scan.next_batch().await.unwrap() {
            seen.extend(batch);
        }

        assert!(scan.is_finished());
        assert_eq!(seen.len(), 25);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 25);
    }
}
