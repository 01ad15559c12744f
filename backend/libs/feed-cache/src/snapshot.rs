//! Thread snapshot caching
//!
//! One pre-rendered thread per `thread:{id}` key, cache-aside on reads and
//! write-through on mutations. Entries are always replaced whole.

use crate::backend::{BatchOp, SharedBackend};
use crate::guard::soften;
use crate::store::SnapshotStore;
use crate::{ttl, CacheError, CacheKey, CacheMetrics, CacheResult, FeedError, FeedResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostType {
    #[default]
    Normal,
    Debatable,
    Claim,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSummary {
    pub id: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub likes: i64,
    pub comments: i64,
}

/// Denormalized projection of one thread, safe to serve as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSnapshot {
    pub id: String,
    pub content: String,
    pub post_type: PostType,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub author: AuthorSummary,
    pub stats: SnapshotStats,
}

impl ContentSnapshot {
    /// Snapshot of a freshly created thread (no likes or comments yet)
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        post_type: PostType,
        media_url: Option<String>,
        created_at: DateTime<Utc>,
        author: AuthorSummary,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            post_type,
            media_url,
            created_at,
            author,
            stats: SnapshotStats::default(),
        }
    }

    /// Feed order: newest first, id descending as the tie-break
    pub fn recency_cmp(&self, other: &Self) -> Ordering {
        other
            .created_at
            .cmp(&self.created_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Snapshot cache operations
#[derive(Clone)]
pub struct ThreadSnapshotCache {
    backend: SharedBackend,
    ttl_secs: u64,
    metrics: CacheMetrics,
}

impl ThreadSnapshotCache {
    pub fn new(backend: SharedBackend) -> Self {
        Self::with_ttl(backend, ttl::SNAPSHOT)
    }

    pub fn with_ttl(backend: SharedBackend, ttl_secs: u64) -> Self {
        Self {
            backend,
            ttl_secs,
            metrics: CacheMetrics::new(),
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// SETEX op for use inside a larger atomic batch
    pub(crate) fn set_op(&self, snapshot: &ContentSnapshot) -> CacheResult<BatchOp> {
        Ok(BatchOp::SetEx {
            key: CacheKey::thread(&snapshot.id),
            value: serde_json::to_string(snapshot)?,
            ttl_secs: self.ttl_secs,
        })
    }

    /// Cached snapshot, `None` on miss or when the cache is unreachable
    pub async fn get(&self, thread_id: &str) -> Option<ContentSnapshot> {
        let key = CacheKey::thread(thread_id);
        let raw = match soften("get", &key, self.backend.get(&key)).await? {
            Some(raw) => raw,
            None => {
                debug!(key = %key, "Cache miss");
                self.metrics.record_miss(&key);
                return None;
            }
        };

        match serde_json::from_str::<ContentSnapshot>(&raw) {
            Ok(snapshot) => {
                debug!(key = %key, "Cache hit");
                self.metrics.record_hit(&key);
                Some(snapshot)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache deserialization failed");
                self.metrics.record_error(&key, "deserialize");
                // Corrupt entry: drop it so the next read repopulates
                let _ = self.backend.del(&[key]).await;
                None
            }
        }
    }

    /// Batch lookup in id order. Undecodable entries count as misses.
    /// Backend errors are returned so the caller can pick its own fallback.
    pub async fn try_get_many(&self, thread_ids: &[String]) -> CacheResult<Vec<Option<ContentSnapshot>>> {
        if thread_ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = thread_ids.iter().map(|id| CacheKey::thread(id)).collect();
        let values = self.backend.mget(&keys).await?;
        if values.len() != keys.len() {
            return Err(CacheError::Unavailable(format!(
                "MGET returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }

        let snapshots: Vec<Option<ContentSnapshot>> = values
            .into_iter()
            .zip(keys.iter())
            .map(|(value, key)| {
                value.and_then(|raw| match serde_json::from_str(&raw) {
                    Ok(snapshot) => Some(snapshot),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Cache deserialization failed");
                        None
                    }
                })
            })
            .collect();

        let hits = snapshots.iter().filter(|s| s.is_some()).count();
        self.metrics.record_hits("thread", hits);
        self.metrics.record_misses("thread", snapshots.len() - hits);
        Ok(snapshots)
    }

    /// Batch lookup where an unreachable cache reads as all misses
    pub async fn get_many(&self, thread_ids: &[String]) -> Vec<Option<ContentSnapshot>> {
        soften("mget", "thread:*", self.try_get_many(thread_ids))
            .await
            .unwrap_or_else(|| vec![None; thread_ids.len()])
    }

    /// Overwrite with the configured TTL. Returns whether the write landed.
    pub async fn put(&self, thread_id: &str, snapshot: &ContentSnapshot) -> bool {
        self.put_with_ttl(thread_id, snapshot, self.ttl_secs).await
    }

    pub async fn put_with_ttl(&self, thread_id: &str, snapshot: &ContentSnapshot, ttl_secs: u64) -> bool {
        let key = CacheKey::thread(thread_id);
        let data = match serde_json::to_string(snapshot) {
            Ok(data) => data,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache serialization failed");
                return false;
            }
        };

        let written = soften("set", &key, self.backend.set_ex(&key, &data, ttl_secs))
            .await
            .is_some();
        if written {
            debug!(key = %key, ttl = ttl_secs, "Cache set");
            self.metrics.record_write(&key);
        }
        written
    }

    /// Pipelined write-back of several snapshots
    pub async fn put_many(&self, snapshots: &[ContentSnapshot]) -> bool {
        if snapshots.is_empty() {
            return true;
        }

        let ops = match snapshots
            .iter()
            .map(|s| self.set_op(s))
            .collect::<CacheResult<Vec<_>>>()
        {
            Ok(ops) => ops,
            Err(e) => {
                warn!(error = %e, "Cache serialization failed");
                return false;
            }
        };

        let written = soften("pipeline_set", "thread:*", self.backend.pipeline(&ops))
            .await
            .is_some();
        if written {
            debug!(count = snapshots.len(), "Cache pipeline set");
            for op in &ops {
                self.metrics.record_write(op.key());
            }
        }
        written
    }

    /// Delete; the next `get` is a miss. Returns whether the delete landed.
    pub async fn invalidate(&self, thread_id: &str) -> bool {
        let key = CacheKey::thread(thread_id);
        let deleted = soften("del", &key, self.backend.del(&[key.clone()]))
            .await
            .is_some();
        if deleted {
            debug!(key = %key, "Cache delete");
            self.metrics.record_invalidation(&key);
        }
        deleted
    }

    /// Cache-aside single read: cache, then store, then populate.
    pub async fn get_or_load(
        &self,
        thread_id: &str,
        store: &dyn SnapshotStore,
    ) -> FeedResult<ContentSnapshot> {
        if let Some(snapshot) = self.get(thread_id).await {
            return Ok(snapshot);
        }

        let snapshot = store
            .fetch_one(thread_id)
            .await?
            .ok_or_else(|| FeedError::NotFound(thread_id.to_string()))?;

        self.put(thread_id, &snapshot).await;
        Ok(snapshot)
    }
}
