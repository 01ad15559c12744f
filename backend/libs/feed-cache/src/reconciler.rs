//! Cache-aware pagination over the global feed
//!
//! A page is cut from the global index, resolved through the snapshot cache,
//! and any misses are repaired from the store in one batched query. The
//! result is reassembled in index order. If anything on the cache path
//! fails, the page is recomputed straight from the store.

use crate::global::GlobalFeedIndex;
use crate::pagination::PageRequest;
use crate::snapshot::{ContentSnapshot, ThreadSnapshotCache};
use crate::store::SnapshotStore;
use crate::{CacheError, CacheMetrics, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Where a page was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Cache,
    Store,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Cache => "cache",
            Provenance::Store => "store",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalFeedPage {
    pub items: Vec<ContentSnapshot>,
    pub next_page: Option<u32>,
    pub current_page: u32,
    pub limit: usize,
    pub provenance: Provenance,
}

/// Failure anywhere on the cache path; always answered with the store fallback
#[derive(Debug, Error)]
enum CachePathError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct Reconciler {
    index: GlobalFeedIndex,
    snapshots: ThreadSnapshotCache,
    store: Arc<dyn SnapshotStore>,
    metrics: CacheMetrics,
}

impl Reconciler {
    pub fn new(
        index: GlobalFeedIndex,
        snapshots: ThreadSnapshotCache,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            index,
            snapshots,
            store,
            metrics: CacheMetrics::new(),
        }
    }

    /// One page of the global feed. Only store faults surface.
    pub async fn page(&self, request: PageRequest) -> StoreResult<GlobalFeedPage> {
        let page = match self.from_cache(request).await {
            Ok(Some(page)) => page,
            Ok(None) => {
                debug!(page = request.page, limit = request.limit, "Global feed window empty, using store");
                self.from_store(request).await?
            }
            Err(e) => {
                warn!(
                    page = request.page,
                    limit = request.limit,
                    error = %e,
                    "Global feed cache path failed, using store"
                );
                self.from_store(request).await?
            }
        };

        self.metrics
            .record_feed_read("global", page.provenance.as_str());
        Ok(page)
    }

    /// `Ok(None)` when the index has nothing for this window
    async fn from_cache(&self, request: PageRequest) -> Result<Option<GlobalFeedPage>, CachePathError> {
        let (start, end) = (request.start(), request.end());

        let (ids, total) = self.index.window(start, request.limit).await?;
        if ids.is_empty() {
            return Ok(None);
        }

        let cached = self.snapshots.try_get_many(&ids).await?;

        let missing: Vec<String> = ids
            .iter()
            .zip(cached.iter())
            .filter(|(_, hit)| hit.is_none())
            .map(|(id, _)| id.clone())
            .collect();

        let mut repaired: HashMap<String, ContentSnapshot> = HashMap::new();
        if !missing.is_empty() {
            let fetched = self.store.fetch_by_ids(&missing).await?;
            debug!(
                missing = missing.len(),
                repaired = fetched.len(),
                "Repairing snapshot misses from store"
            );
            // Write-back failure never fails the read
            self.snapshots.put_many(&fetched).await;
            repaired = fetched.into_iter().map(|s| (s.id.clone(), s)).collect();
        }

        // Index order, not cache-response order; ids resolving nowhere are tombstones
        let items: Vec<ContentSnapshot> = ids
            .iter()
            .zip(cached)
            .filter_map(|(id, hit)| hit.or_else(|| repaired.remove(id)))
            .collect();

        let has_more = end + 1 < total;
        Ok(Some(GlobalFeedPage {
            items,
            next_page: has_more.then(|| request.page + 1),
            current_page: request.page,
            limit: request.limit,
            provenance: Provenance::Cache,
        }))
    }

    /// Pure store path: one extra row tells whether another page exists
    async fn from_store(&self, request: PageRequest) -> StoreResult<GlobalFeedPage> {
        let mut items = self.store.recent(request.start(), request.limit + 1).await?;
        let has_more = items.len() > request.limit;
        items.truncate(request.limit);

        Ok(GlobalFeedPage {
            items,
            next_page: has_more.then(|| request.page + 1),
            current_page: request.page,
            limit: request.limit,
            provenance: Provenance::Store,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CacheBackend, MemoryBackend};
    use crate::snapshot::{AuthorSummary, PostType};
    use crate::store::InMemorySnapshotStore;
    use chrono::{TimeZone, Utc};

    fn snapshot(id: &str, secs: i64) -> ContentSnapshot {
        ContentSnapshot::new(
            id,
            "hi",
            PostType::Claim,
            None,
            Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            AuthorSummary {
                id: "u1".into(),
                username: "ada".into(),
                avatar_url: None,
            },
        )
    }

    async fn setup(n: i64) -> (Arc<MemoryBackend>, Arc<InMemorySnapshotStore>, Reconciler) {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(InMemorySnapshotStore::new());
        for i in 1..=n {
            store.insert(snapshot(&format!("t{}", i), i));
        }
        let snapshots = ThreadSnapshotCache::new(backend.clone());
        let index = GlobalFeedIndex::new(backend.clone(), snapshots.clone());
        index.preload(store.as_ref()).await.unwrap();
        let reconciler = Reconciler::new(index, snapshots, store.clone());
        (backend, store, reconciler)
    }

    fn ids(page: &GlobalFeedPage) -> Vec<&str> {
        page.items.iter().map(|s| s.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_full_hit_is_served_from_cache() {
        let (_, _, reconciler) = setup(5).await;
        let page = reconciler.page(PageRequest { page: 1, limit: 2 }).await.unwrap();

        assert_eq!(ids(&page), vec!["t5", "t4"]);
        assert_eq!(page.next_page, Some(2));
        assert_eq!(page.provenance, Provenance::Cache);
    }

    #[tokio::test]
    async fn test_last_page_has_no_next() {
        let (_, _, reconciler) = setup(5).await;
        let page = reconciler.page(PageRequest { page: 3, limit: 2 }).await.unwrap();

        assert_eq!(ids(&page), vec!["t1"]);
        assert_eq!(page.next_page, None);
    }

    #[tokio::test]
    async fn test_tombstones_are_dropped() {
        let (backend, store, reconciler) = setup(3).await;
        store.remove("t2");
        backend.del(&["thread:t2".to_string()]).await.unwrap();

        let page = reconciler.page(PageRequest { page: 1, limit: 3 }).await.unwrap();
        assert_eq!(ids(&page), vec!["t3", "t1"]);
        assert_eq!(page.provenance, Provenance::Cache);
    }

    #[tokio::test]
    async fn test_window_past_index_uses_store() {
        let (_, _, reconciler) = setup(3).await;
        let page = reconciler.page(PageRequest { page: 5, limit: 2 }).await.unwrap();

        assert!(page.items.is_empty());
        assert_eq!(page.provenance, Provenance::Store);
    }

    #[tokio::test]
    async fn test_cache_outage_falls_back_to_store() {
        let (backend, _, reconciler) = setup(5).await;
        backend.set_available(false);

        let page = reconciler.page(PageRequest { page: 2, limit: 2 }).await.unwrap();
        assert_eq!(ids(&page), vec!["t3", "t2"]);
        assert_eq!(page.next_page, Some(3));
        assert_eq!(page.provenance, Provenance::Store);
    }

    #[tokio::test]
    async fn test_store_fault_surfaces_when_cache_cannot_answer() {
        let (backend, store, reconciler) = setup(2).await;
        backend.set_available(false);
        store.set_available(false);

        assert!(reconciler.page(PageRequest::default()).await.is_err());
    }

    #[test]
    fn test_page_json_shape() {
        let page = GlobalFeedPage {
            items: vec![],
            next_page: None,
            current_page: 1,
            limit: 20,
            provenance: Provenance::Store,
        };
        let value = serde_json::to_value(&page).unwrap();
        assert_eq!(value["nextPage"], serde_json::Value::Null);
        assert_eq!(value["currentPage"], 1);
        assert_eq!(value["provenance"], "store");
    }
}
