//! Feed facade
//!
//! Wires every feed-cache component to one backend and one store, and puts
//! the rate limiters in front of the read paths. Transport layers call this
//! and nothing below it.

use crate::config::FeedConfig;
use feed_cache::{
    ContentSnapshot, CursorRequest, FeedResult, FeedWriter, FollowCounters, GlobalFeedIndex,
    GlobalFeedPage, HomeFeedCache, HomeFeedPage, HomeFeedReader, PageRequest, RateLimiter,
    RateSubject, Reconciler, SharedBackend, SnapshotStore, StoreResult, ThreadSnapshotCache,
    WriteReport,
};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct FeedService {
    store: Arc<dyn SnapshotStore>,
    snapshots: ThreadSnapshotCache,
    index: GlobalFeedIndex,
    reconciler: Reconciler,
    home: HomeFeedReader,
    writer: FeedWriter,
    global_limiter: RateLimiter,
    home_limiter: RateLimiter,
}

impl FeedService {
    pub fn new(backend: SharedBackend, store: Arc<dyn SnapshotStore>, config: &FeedConfig) -> Self {
        let cache = config.cache();
        let snapshots = ThreadSnapshotCache::with_ttl(backend.clone(), cache.snapshot_ttl_secs);
        let index = GlobalFeedIndex::with_max_len(backend.clone(), snapshots.clone(), cache.global_feed_max);
        let home_cache = HomeFeedCache::with_ttl(backend.clone(), cache.home_page_ttl_secs);

        Self {
            reconciler: Reconciler::new(index.clone(), snapshots.clone(), store.clone()),
            home: HomeFeedReader::new(home_cache.clone(), store.clone()),
            writer: FeedWriter::new(
                index.clone(),
                snapshots.clone(),
                home_cache,
                FollowCounters::new(backend.clone(), store.clone()),
            ),
            global_limiter: RateLimiter::new(backend.clone(), config.global_limiter()),
            home_limiter: RateLimiter::new(backend, config.home_limiter()),
            store,
            snapshots,
            index,
        }
    }

    pub fn index(&self) -> &GlobalFeedIndex {
        &self.index
    }

    pub fn store(&self) -> Arc<dyn SnapshotStore> {
        self.store.clone()
    }

    /// Cold-start fill of the global index
    pub async fn preload(&self) -> StoreResult<usize> {
        let loaded = self.index.preload(self.store.as_ref()).await?;
        info!(loaded = loaded, "Global feed preload finished");
        Ok(loaded)
    }

    // ============= Reads =============

    pub async fn global_feed(&self, subject: &RateSubject, request: PageRequest) -> FeedResult<GlobalFeedPage> {
        self.global_limiter.enforce(subject).await?;
        let page = self.reconciler.page(request).await?;
        debug!(
            page = page.current_page,
            items = page.items.len(),
            provenance = page.provenance.as_str(),
            "Served global feed"
        );
        Ok(page)
    }

    pub async fn home_feed(&self, actor_id: &str, request: CursorRequest) -> FeedResult<HomeFeedPage> {
        self.home_limiter
            .enforce(&RateSubject::User(actor_id.to_string()))
            .await?;
        let page = self.home.page(actor_id, &request).await?;
        debug!(actor = %actor_id, items = page.items.len(), "Served home feed");
        Ok(page)
    }

    pub async fn thread(&self, thread_id: &str) -> FeedResult<ContentSnapshot> {
        self.snapshots.get_or_load(thread_id, self.store.as_ref()).await
    }

    // ============= Write triggers =============

    /// Call after the thread row is committed
    pub async fn thread_created(&self, snapshot: &ContentSnapshot) -> WriteReport {
        self.writer.on_created(snapshot).await
    }

    pub async fn thread_updated(&self, snapshot: &ContentSnapshot) -> WriteReport {
        self.writer.on_updated(snapshot).await
    }

    pub async fn thread_deleted(&self, thread_id: &str, actor_id: &str) -> WriteReport {
        self.writer.on_deleted(thread_id, actor_id).await
    }

    pub async fn user_followed(&self, follower_id: &str, followee_id: &str) -> WriteReport {
        self.writer.on_followed(follower_id, followee_id).await
    }

    pub async fn user_unfollowed(&self, follower_id: &str, followee_id: &str) -> WriteReport {
        self.writer.on_unfollowed(follower_id, followee_id).await
    }
}
