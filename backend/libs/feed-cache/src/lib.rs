//! Threads feed caching and consistency layer
//!
//! Keeps a bounded, ordered view of recent threads in Redis while PostgreSQL
//! stays the source of truth:
//! - Global recency index (`global:feed`) with per-thread snapshots
//! - Cache-aware pagination that repairs misses from the store
//! - Short-lived personalized feed pages with SCAN-based invalidation
//! - Fixed-window rate limiting
//! - Write triggers for thread and follow mutations
//!
//! Every cache call degrades softly: a Redis fault is logged and counted,
//! never returned to the caller.

mod error;
mod keys;
mod metrics;

pub(crate) mod guard;

pub mod backend;
pub mod global;
pub mod graph;
pub mod home;
pub mod pagination;
pub mod rate_limit;
pub mod reconciler;
pub mod snapshot;
pub mod store;
pub mod writer;

pub use backend::{BatchOp, CacheBackend, KeyScan, RedisBackend, SharedBackend};
pub use error::{CacheError, CacheResult, FeedError, FeedResult, StoreError, StoreResult};
pub use global::GlobalFeedIndex;
pub use graph::FollowCounters;
pub use home::{HomeFeedCache, HomeFeedItem, HomeFeedPage, HomeFeedReader};
pub use keys::{escape_glob, CacheKey, GLOBAL_FEED_KEY};
pub use metrics::CacheMetrics;
pub use pagination::{CursorRequest, PageRequest};
pub use rate_limit::{RateDecision, RateLimitConfig, RateLimiter, RateSubject};
pub use reconciler::{GlobalFeedPage, Provenance, Reconciler};
pub use snapshot::{AuthorSummary, ContentSnapshot, PostType, SnapshotStats, ThreadSnapshotCache};
pub use store::{SnapshotStore, ThreadFilter};
pub use writer::{FeedWriter, WriteReport};

#[cfg(any(test, feature = "test-util"))]
pub use backend::MemoryBackend;
#[cfg(any(test, feature = "test-util"))]
pub use store::InMemorySnapshotStore;

/// Default TTL values (seconds)
pub mod ttl {
    pub const SNAPSHOT: u64 = 600; // 10 minutes
    pub const HOME_PAGE: u64 = 60; // 1 minute
}

/// Maximum length of the global recency index
pub const MAX_GLOBAL_FEED: usize = 200;

/// COUNT hint for SCAN-based invalidation
pub const SCAN_BATCH: usize = 100;

/// Tunables shared by the feed components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedCacheConfig {
    pub global_feed_max: usize,
    pub snapshot_ttl_secs: u64,
    pub home_page_ttl_secs: u64,
}

impl Default for FeedCacheConfig {
    fn default() -> Self {
        Self {
            global_feed_max: MAX_GLOBAL_FEED,
            snapshot_ttl_secs: ttl::SNAPSHOT,
            home_page_ttl_secs: ttl::HOME_PAGE,
        }
    }
}
