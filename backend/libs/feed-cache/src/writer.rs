//! Cache side of thread and follow mutations
//!
//! Called after the store write has committed. Every step is best-effort:
//! a Redis fault leaves the caches stale until expiry or the next write,
//! and never fails the mutation.

use crate::global::GlobalFeedIndex;
use crate::graph::FollowCounters;
use crate::home::HomeFeedCache;
use crate::snapshot::{ContentSnapshot, ThreadSnapshotCache};
use tracing::{debug, warn};

/// What a trigger managed to apply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Index, snapshot or counter batch landed
    pub applied: bool,
    pub pages_invalidated: usize,
}

#[derive(Clone)]
pub struct FeedWriter {
    index: GlobalFeedIndex,
    snapshots: ThreadSnapshotCache,
    home: HomeFeedCache,
    counters: FollowCounters,
}

impl FeedWriter {
    pub fn new(
        index: GlobalFeedIndex,
        snapshots: ThreadSnapshotCache,
        home: HomeFeedCache,
        counters: FollowCounters,
    ) -> Self {
        Self {
            index,
            snapshots,
            home,
            counters,
        }
    }

    /// New thread: index append and snapshot write-through in one batch,
    /// then the author's own pages are dropped.
    pub async fn on_created(&self, snapshot: &ContentSnapshot) -> WriteReport {
        let applied = self.index.append_with_snapshot(snapshot).await;
        let pages_invalidated = self.home.invalidate_actor(&snapshot.author.id).await;
        self.report("created", &snapshot.id, applied, pages_invalidated)
    }

    /// Edited thread: the old snapshot goes first so a failed write-through
    /// still leaves a miss rather than stale content.
    pub async fn on_updated(&self, snapshot: &ContentSnapshot) -> WriteReport {
        self.snapshots.invalidate(&snapshot.id).await;
        let applied = self.snapshots.put(&snapshot.id, snapshot).await;
        let pages_invalidated = self.home.invalidate_actor(&snapshot.author.id).await;
        self.report("updated", &snapshot.id, applied, pages_invalidated)
    }

    pub async fn on_deleted(&self, thread_id: &str, actor_id: &str) -> WriteReport {
        let applied = self.index.remove(thread_id).await;
        let pages_invalidated = self.home.invalidate_actor(actor_id).await;
        self.report("deleted", thread_id, applied, pages_invalidated)
    }

    /// The follower's timeline changes shape, so only their pages are dropped
    pub async fn on_followed(&self, follower_id: &str, followee_id: &str) -> WriteReport {
        let applied = self.counters.follow(follower_id, followee_id).await;
        let pages_invalidated = self.home.invalidate_actor(follower_id).await;
        self.report("followed", followee_id, applied, pages_invalidated)
    }

    pub async fn on_unfollowed(&self, follower_id: &str, followee_id: &str) -> WriteReport {
        let applied = self.counters.unfollow(follower_id, followee_id).await;
        let pages_invalidated = self.home.invalidate_actor(follower_id).await;
        self.report("unfollowed", followee_id, applied, pages_invalidated)
    }

    fn report(&self, event: &str, id: &str, applied: bool, pages_invalidated: usize) -> WriteReport {
        if applied {
            debug!(event = event, id = %id, pages_invalidated = pages_invalidated, "Feed caches updated");
        } else {
            warn!(event = event, id = %id, "Feed caches left stale after write");
        }
        WriteReport {
            applied,
            pages_invalidated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CacheBackend, MemoryBackend};
    use crate::snapshot::{AuthorSummary, PostType};
    use crate::store::InMemorySnapshotStore;
    use crate::CacheKey;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn writer(backend: Arc<MemoryBackend>) -> FeedWriter {
        let snapshots = ThreadSnapshotCache::new(backend.clone());
        FeedWriter::new(
            GlobalFeedIndex::new(backend.clone(), snapshots.clone()),
            snapshots,
            HomeFeedCache::new(backend.clone()),
            FollowCounters::new(backend, Arc::new(InMemorySnapshotStore::new())),
        )
    }

    fn snapshot(id: &str, content: &str) -> ContentSnapshot {
        ContentSnapshot::new(
            id,
            content,
            PostType::Normal,
            None,
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            AuthorSummary {
                id: "u1".into(),
                username: "ada".into(),
                avatar_url: None,
            },
        )
    }

    #[tokio::test]
    async fn test_update_replaces_snapshot_and_author_pages() {
        let backend = Arc::new(MemoryBackend::new());
        let writer = writer(backend.clone());
        writer.on_created(&snapshot("t1", "first")).await;
        backend
            .set_ex(&CacheKey::home_page("u1", 20, None), "{}", 60)
            .await
            .unwrap();

        let report = writer.on_updated(&snapshot("t1", "edited")).await;
        assert!(report.applied);
        assert_eq!(report.pages_invalidated, 1);

        let cached = ThreadSnapshotCache::new(backend).get("t1").await.unwrap();
        assert_eq!(cached.content, "edited");
    }

    #[tokio::test]
    async fn test_follow_drops_follower_pages_only() {
        let backend = Arc::new(MemoryBackend::new());
        let writer = writer(backend.clone());
        backend.set_ex(&CacheKey::home_page("a", 20, None), "{}", 60).await.unwrap();
        backend.set_ex(&CacheKey::home_page("b", 20, None), "{}", 60).await.unwrap();

        let report = writer.on_followed("a", "b").await;
        assert!(report.applied);
        assert_eq!(report.pages_invalidated, 1);
        assert!(backend.exists(&CacheKey::home_page("b", 20, None)).await.unwrap());
    }

    #[tokio::test]
    async fn test_triggers_succeed_during_outage() {
        let backend = Arc::new(MemoryBackend::new());
        let writer = writer(backend.clone());
        backend.set_available(false);

        assert_eq!(writer.on_created(&snapshot("t1", "x")).await, WriteReport::default());
        assert_eq!(writer.on_deleted("t1", "u1").await, WriteReport::default());
        assert_eq!(writer.on_unfollowed("a", "b").await, WriteReport::default());
    }
}
