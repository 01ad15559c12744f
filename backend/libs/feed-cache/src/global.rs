//! Global recency index
//!
//! `global:feed` is a Redis list of thread ids, newest first, capped at
//! [`crate::MAX_GLOBAL_FEED`]. Only the write path mutates it. Every mutation
//! is a single MULTI/EXEC batch, so readers never see an untrimmed list or a
//! push without its snapshot.

use crate::backend::{BatchOp, SharedBackend};
use crate::guard::soften;
use crate::snapshot::{ContentSnapshot, ThreadSnapshotCache};
use crate::store::{SnapshotStore, ThreadFilter};
use crate::{CacheKey, CacheMetrics, CacheResult, StoreResult, MAX_GLOBAL_FEED};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct GlobalFeedIndex {
    backend: SharedBackend,
    snapshots: ThreadSnapshotCache,
    max_len: usize,
    metrics: CacheMetrics,
}

impl GlobalFeedIndex {
    pub fn new(backend: SharedBackend, snapshots: ThreadSnapshotCache) -> Self {
        Self::with_max_len(backend, snapshots, MAX_GLOBAL_FEED)
    }

    pub fn with_max_len(backend: SharedBackend, snapshots: ThreadSnapshotCache, max_len: usize) -> Self {
        Self {
            backend,
            snapshots,
            max_len: max_len.max(1),
            metrics: CacheMetrics::new(),
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    fn trim_op(&self) -> BatchOp {
        BatchOp::LTrim {
            key: CacheKey::global_feed().to_string(),
            start: 0,
            stop: self.max_len as isize - 1,
        }
    }

    /// Cold-start fill from the store.
    ///
    /// No-op when the index key already exists. Otherwise the newest
    /// `max_len` threads are appended at the tail, newest first, skipping ids
    /// already listed, and their snapshots written in the same batch. An
    /// append that lands while the store is being read stays at the head, and
    /// two racing preloads converge on one copy of each id.
    ///
    /// Returns the number of ids loaded. Store faults propagate; cache faults
    /// are swallowed and reported as 0.
    pub async fn preload(&self, store: &dyn SnapshotStore) -> StoreResult<usize> {
        let key = CacheKey::global_feed();

        match soften("exists", key, self.backend.exists(key)).await {
            Some(false) => {}
            Some(true) => {
                debug!(key = %key, "Global feed already warm, skipping preload");
                return Ok(0);
            }
            None => return Ok(0),
        }

        let total = store.count(&ThreadFilter::all()).await?;
        let recent = store.recent(0, self.max_len).await?;
        if recent.is_empty() {
            info!(total = total, "Snapshot store empty, nothing to preload");
            return Ok(0);
        }

        let mut ops = Vec::with_capacity(recent.len() * 2 + 1);
        for snapshot in &recent {
            ops.push(BatchOp::RPushMissing {
                key: key.to_string(),
                value: snapshot.id.clone(),
            });
            match self.snapshots.set_op(snapshot) {
                Ok(op) => ops.push(op),
                Err(e) => warn!(thread_id = %snapshot.id, error = %e, "Snapshot serialization failed"),
            }
        }
        ops.push(self.trim_op());

        if soften("preload", key, self.backend.atomic(&ops)).await.is_none() {
            return Ok(0);
        }

        info!(
            loaded = recent.len(),
            total = total,
            "Preloaded global feed index"
        );
        self.metrics.record_write(key);
        Ok(recent.len())
    }

    /// Push an id to the front and trim. Returns whether the batch landed.
    pub async fn append(&self, thread_id: &str) -> bool {
        let key = CacheKey::global_feed();
        let ops = [
            BatchOp::LPush {
                key: key.to_string(),
                value: thread_id.to_string(),
            },
            self.trim_op(),
        ];
        self.run("append", &ops).await
    }

    /// Append plus snapshot write-through in one batch
    pub async fn append_with_snapshot(&self, snapshot: &ContentSnapshot) -> bool {
        let key = CacheKey::global_feed();
        let set = match self.snapshots.set_op(snapshot) {
            Ok(op) => op,
            Err(e) => {
                warn!(thread_id = %snapshot.id, error = %e, "Snapshot serialization failed");
                return self.append(&snapshot.id).await;
            }
        };

        let ops = [
            BatchOp::LPush {
                key: key.to_string(),
                value: snapshot.id.clone(),
            },
            self.trim_op(),
            set,
        ];
        self.run("append", &ops).await
    }

    /// Drop every occurrence of the id and its snapshot
    pub async fn remove(&self, thread_id: &str) -> bool {
        let ops = [
            BatchOp::LRem {
                key: CacheKey::global_feed().to_string(),
                value: thread_id.to_string(),
            },
            BatchOp::Del {
                key: CacheKey::thread(thread_id),
            },
        ];
        let removed = self.run("remove", &ops).await;
        if removed {
            self.metrics.record_invalidation(&CacheKey::thread(thread_id));
        }
        removed
    }

    /// Ids in `[offset, offset + count)` and the current index length.
    ///
    /// Errors are returned as-is: the reconciler decides how to degrade.
    pub async fn window(&self, offset: usize, count: usize) -> CacheResult<(Vec<String>, usize)> {
        let key = CacheKey::global_feed();
        if count == 0 {
            let total = self.backend.llen(key).await?;
            return Ok((Vec::new(), total));
        }

        let stop = offset + count - 1;
        let ids = self
            .backend
            .lrange(key, offset as isize, stop as isize)
            .await?;
        let total = self.backend.llen(key).await?;
        Ok((ids, total))
    }

    async fn run(&self, op: &'static str, ops: &[BatchOp]) -> bool {
        let key = CacheKey::global_feed();
        let landed = soften(op, key, self.backend.atomic(ops)).await.is_some();
        if landed {
            debug!(key = %key, op = op, "Global feed updated");
            self.metrics.record_write(key);
        }
        landed
    }
}
