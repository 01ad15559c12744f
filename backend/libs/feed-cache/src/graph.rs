//! Follow graph counters
//!
//! Each follow or unfollow moves four keys together in one atomic batch: the
//! followee's follower set and count, and the follower's following set and
//! count. Counts are never incremented; the batch recomputes each one from
//! its set's cardinality, so replayed or out-of-order triggers cannot drift.
//!
//! A set the cache has never held is seeded from the store in the same batch
//! before the edge is applied. Triggers run after the store commit, so the
//! seed already reflects the edge and applying it again is a no-op.

use crate::backend::{BatchOp, SharedBackend};
use crate::guard::soften;
use crate::store::SnapshotStore;
use crate::{CacheKey, CacheMetrics, StoreResult};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct FollowCounters {
    backend: SharedBackend,
    store: Arc<dyn SnapshotStore>,
    metrics: CacheMetrics,
}

impl FollowCounters {
    pub fn new(backend: SharedBackend, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            backend,
            store,
            metrics: CacheMetrics::new(),
        }
    }

    pub async fn follow(&self, follower_id: &str, followee_id: &str) -> bool {
        self.apply("follow", follower_id, followee_id, true).await
    }

    pub async fn unfollow(&self, follower_id: &str, followee_id: &str) -> bool {
        self.apply("unfollow", follower_id, followee_id, false).await
    }

    /// Cached follower count, `None` when absent or unreadable
    pub async fn followers_count(&self, user_id: &str) -> Option<i64> {
        self.read_count(&CacheKey::followers_count(user_id)).await
    }

    pub async fn following_count(&self, user_id: &str) -> Option<i64> {
        self.read_count(&CacheKey::following_count(user_id)).await
    }

    /// `None` when the cache cannot answer
    pub async fn is_following(&self, follower_id: &str, followee_id: &str) -> Option<bool> {
        let key = CacheKey::following(follower_id);
        soften("sismember", &key, self.backend.sismember(&key, followee_id)).await
    }

    async fn read_count(&self, key: &str) -> Option<i64> {
        let raw = soften("get", key, self.backend.get(key)).await??;
        raw.parse().ok()
    }

    async fn apply(&self, op: &'static str, follower_id: &str, followee_id: &str, add: bool) -> bool {
        let followers = CacheKey::followers(followee_id);
        let following = CacheKey::following(follower_id);

        let mut ops = Vec::with_capacity(6);
        for (key, members) in [
            (&followers, self.store.follower_ids(followee_id)),
            (&following, self.store.following_ids(follower_id)),
        ] {
            match self.seed(key, members).await {
                Some(seed) => ops.extend(seed),
                None => {
                    self.forget(follower_id, followee_id).await;
                    return false;
                }
            }
        }

        for (key, member) in [(&followers, follower_id), (&following, followee_id)] {
            let (key, member) = (key.clone(), member.to_string());
            ops.push(if add {
                BatchOp::SAdd { key, member }
            } else {
                BatchOp::SRem { key, member }
            });
        }
        ops.push(BatchOp::CountMembers {
            key: CacheKey::followers_count(followee_id),
            set: followers,
        });
        ops.push(BatchOp::CountMembers {
            key: CacheKey::following_count(follower_id),
            set: following.clone(),
        });

        let landed = soften(op, &following, self.backend.atomic(&ops)).await.is_some();
        if landed {
            debug!(op = op, follower = %follower_id, followee = %followee_id, "Follow counters updated");
            for batch_op in &ops {
                self.metrics.record_write(batch_op.key());
            }
        }
        landed
    }

    /// Seed op for a set the cache does not hold yet, empty when it does.
    /// `None` when the cache or the store cannot answer.
    async fn seed(
        &self,
        key: &str,
        members: impl Future<Output = StoreResult<Vec<String>>>,
    ) -> Option<Vec<BatchOp>> {
        if soften("exists", key, self.backend.exists(key)).await? {
            return Some(Vec::new());
        }
        match members.await {
            Ok(members) => Some(vec![BatchOp::SeedSet {
                key: key.to_string(),
                members,
            }]),
            Err(e) => {
                warn!(key = %key, error = %e, "Follow set seed failed");
                None
            }
        }
    }

    /// Drop all four keys so the next trigger reseeds them
    async fn forget(&self, follower_id: &str, followee_id: &str) {
        let keys = [
            CacheKey::followers(followee_id),
            CacheKey::followers_count(followee_id),
            CacheKey::following(follower_id),
            CacheKey::following_count(follower_id),
        ];
        if soften("del", &keys[0], self.backend.del(&keys)).await.is_some() {
            for key in &keys {
                self.metrics.record_invalidation(key);
            }
        }
    }
}
