//! Snapshot store contract
//!
//! The durable store is the source of truth; the cache layer only reads from
//! it. Every listing is ordered newest first with the id as tie-break.

use crate::snapshot::ContentSnapshot;
use crate::StoreResult;
use async_trait::async_trait;
use std::collections::HashSet;

#[cfg(any(test, feature = "test-util"))]
mod memory;

#[cfg(any(test, feature = "test-util"))]
pub use self::memory::InMemorySnapshotStore;

/// Filter for [`SnapshotStore::count`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadFilter {
    pub author_ids: Option<Vec<String>>,
}

impl ThreadFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_authors(author_ids: Vec<String>) -> Self {
        Self {
            author_ids: Some(author_ids),
        }
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Most recent threads, skipping `offset`
    async fn recent(&self, offset: usize, limit: usize) -> StoreResult<Vec<ContentSnapshot>>;

    /// Threads by a set of authors, strictly after the `cursor` thread in feed order
    async fn recent_by_authors(
        &self,
        author_ids: &[String],
        cursor: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<ContentSnapshot>>;

    /// Unordered lookup; unknown ids are simply absent from the result
    async fn fetch_by_ids(&self, ids: &[String]) -> StoreResult<Vec<ContentSnapshot>>;

    async fn fetch_one(&self, id: &str) -> StoreResult<Option<ContentSnapshot>>;

    async fn count(&self, filter: &ThreadFilter) -> StoreResult<u64>;

    /// Ids of the users `actor_id` follows
    async fn following_ids(&self, actor_id: &str) -> StoreResult<Vec<String>>;

    /// Ids of the users following `user_id`
    async fn follower_ids(&self, user_id: &str) -> StoreResult<Vec<String>>;

    /// Subset of `thread_ids` liked by `actor_id`
    async fn liked_ids(&self, actor_id: &str, thread_ids: &[String]) -> StoreResult<HashSet<String>>;
}
