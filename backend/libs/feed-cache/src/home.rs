//! Personalized home feed
//!
//! Pages are memoized for a short TTL under
//! `feed:user:{actor}:limit:{limit}:cursor:{cursor|none}`. A mutation by an
//! actor clears that actor's pages only; followers' pages heal by expiry.

use crate::backend::{KeyScan, SharedBackend};
use crate::guard::soften;
use crate::pagination::CursorRequest;
use crate::snapshot::ContentSnapshot;
use crate::store::SnapshotStore;
use crate::{ttl, CacheKey, CacheMetrics, StoreResult, SCAN_BATCH};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeFeedItem {
    #[serde(flatten)]
    pub snapshot: ContentSnapshot,
    pub liked_by_me: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeFeedPage {
    pub items: Vec<HomeFeedItem>,
    pub next_cursor: Option<String>,
}

/// Memoized personalized pages
#[derive(Clone)]
pub struct HomeFeedCache {
    backend: SharedBackend,
    ttl_secs: u64,
    metrics: CacheMetrics,
}

impl HomeFeedCache {
    pub fn new(backend: SharedBackend) -> Self {
        Self::with_ttl(backend, ttl::HOME_PAGE)
    }

    pub fn with_ttl(backend: SharedBackend, ttl_secs: u64) -> Self {
        Self {
            backend,
            ttl_secs,
            metrics: CacheMetrics::new(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<HomeFeedPage> {
        let raw = match soften("get", key, self.backend.get(key)).await? {
            Some(raw) => raw,
            None => {
                debug!(key = %key, "Cache miss");
                self.metrics.record_miss(key);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(page) => {
                debug!(key = %key, "Cache hit");
                self.metrics.record_hit(key);
                Some(page)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache deserialization failed");
                self.metrics.record_error(key, "deserialize");
                let _ = self.backend.del(&[key.to_string()]).await;
                None
            }
        }
    }

    pub async fn set(&self, key: &str, page: &HomeFeedPage) -> bool {
        self.set_with_ttl(key, page, self.ttl_secs).await
    }

    pub async fn set_with_ttl(&self, key: &str, page: &HomeFeedPage, ttl_secs: u64) -> bool {
        let data = match serde_json::to_string(page) {
            Ok(data) => data,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache serialization failed");
                return false;
            }
        };

        let written = soften("set", key, self.backend.set_ex(key, &data, ttl_secs))
            .await
            .is_some();
        if written {
            debug!(key = %key, ttl = ttl_secs, "Cache set");
            self.metrics.record_write(key);
        }
        written
    }

    /// Delete every cached page owned by `actor_id`.
    ///
    /// Walks the keyspace with SCAN and deletes batch by batch. A failing step
    /// ends the walk; pages already deleted stay deleted. Returns the number
    /// of keys removed.
    pub async fn invalidate_actor(&self, actor_id: &str) -> usize {
        let pattern = CacheKey::home_page_pattern(actor_id);
        let mut scan = KeyScan::new(self.backend.as_ref(), pattern.clone(), SCAN_BATCH);
        let mut deleted = 0;

        loop {
            let keys = match scan.next_batch().await {
                Ok(Some(keys)) => keys,
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        pattern = %pattern,
                        cursor = scan.cursor(),
                        error = %e,
                        "Home feed invalidation stopped early"
                    );
                    self.metrics.record_error(&pattern, "scan");
                    break;
                }
            };
            if keys.is_empty() {
                continue;
            }

            match soften("del", &pattern, self.backend.del(&keys)).await {
                Some(removed) => {
                    deleted += removed;
                    for key in &keys {
                        self.metrics.record_invalidation(key);
                    }
                }
                None => break,
            }
        }

        debug!(pattern = %pattern, deleted = deleted, "Cache scan delete");
        deleted
    }
}

/// Cache-aside reader for the personalized feed
#[derive(Clone)]
pub struct HomeFeedReader {
    cache: HomeFeedCache,
    store: Arc<dyn SnapshotStore>,
    metrics: CacheMetrics,
}

impl HomeFeedReader {
    pub fn new(cache: HomeFeedCache, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            cache,
            store,
            metrics: CacheMetrics::new(),
        }
    }

    pub fn cache(&self) -> &HomeFeedCache {
        &self.cache
    }

    /// Threads by the actor and everyone they follow, newest first
    pub async fn page(&self, actor_id: &str, request: &CursorRequest) -> StoreResult<HomeFeedPage> {
        let key = CacheKey::home_page(actor_id, request.limit, request.cursor.as_deref());
        if let Some(page) = self.cache.get(&key).await {
            self.metrics.record_feed_read("home", "cache");
            return Ok(page);
        }

        let mut authors = self.store.following_ids(actor_id).await?;
        if !authors.iter().any(|id| id == actor_id) {
            authors.push(actor_id.to_string());
        }

        let threads = self
            .store
            .recent_by_authors(&authors, request.cursor.as_deref(), request.limit)
            .await?;
        let ids: Vec<String> = threads.iter().map(|t| t.id.clone()).collect();
        let liked = self.store.liked_ids(actor_id, &ids).await?;

        let next_cursor = threads.last().map(|t| t.id.clone());
        let items = threads
            .into_iter()
            .map(|snapshot| HomeFeedItem {
                liked_by_me: liked.contains(&snapshot.id),
                snapshot,
            })
            .collect();
        let page = HomeFeedPage { items, next_cursor };

        self.cache.set(&key, &page).await;
        self.metrics.record_feed_read("home", "store");
        Ok(page)
    }
}
