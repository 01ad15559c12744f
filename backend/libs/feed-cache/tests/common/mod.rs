//! Shared fixtures: every component wired to one in-memory backend and store

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use feed_cache::{
    AuthorSummary, ContentSnapshot, FeedWriter, FollowCounters, GlobalFeedIndex, HomeFeedCache,
    HomeFeedReader, InMemorySnapshotStore, MemoryBackend, PostType, Reconciler,
    ThreadSnapshotCache,
};
use std::sync::Arc;

pub struct Harness {
    pub backend: Arc<MemoryBackend>,
    pub store: Arc<InMemorySnapshotStore>,
    pub snapshots: ThreadSnapshotCache,
    pub index: GlobalFeedIndex,
    pub reconciler: Reconciler,
    pub home: HomeFeedReader,
    pub writer: FeedWriter,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_max_len(feed_cache::MAX_GLOBAL_FEED)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(InMemorySnapshotStore::new());
        let snapshots = ThreadSnapshotCache::new(backend.clone());
        let index = GlobalFeedIndex::with_max_len(backend.clone(), snapshots.clone(), max_len);
        let home_cache = HomeFeedCache::new(backend.clone());

        Self {
            reconciler: Reconciler::new(index.clone(), snapshots.clone(), store.clone()),
            home: HomeFeedReader::new(home_cache.clone(), store.clone()),
            writer: FeedWriter::new(
                index.clone(),
                snapshots.clone(),
                home_cache,
                FollowCounters::new(backend.clone(), store.clone()),
            ),
            backend,
            store,
            snapshots,
            index,
        }
    }

    /// Store-side create followed by the cache trigger
    pub async fn create(&self, snapshot: ContentSnapshot) {
        self.store.insert(snapshot.clone());
        self.writer.on_created(&snapshot).await;
    }

    pub async fn delete(&self, thread_id: &str) {
        if let Some(removed) = self.store.remove(thread_id) {
            self.writer.on_deleted(thread_id, &removed.author.id).await;
        }
    }

    pub async fn index_ids(&self) -> Vec<String> {
        self.index.window(0, 10_000).await.unwrap().0
    }
}

pub fn author(id: &str) -> AuthorSummary {
    AuthorSummary {
        id: id.to_string(),
        username: format!("{}-name", id),
        avatar_url: None,
    }
}

/// Thread `id` by `author_id`, created `secs` after a fixed epoch
pub fn thread(id: &str, author_id: &str, secs: i64) -> ContentSnapshot {
    ContentSnapshot::new(
        id,
        format!("content of {}", id),
        PostType::Normal,
        None,
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        author(author_id),
    )
}

pub fn ids<'a>(items: impl IntoIterator<Item = &'a ContentSnapshot>) -> Vec<String> {
    items.into_iter().map(|s| s.id.clone()).collect()
}
