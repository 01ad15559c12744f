//! Service layer for feed-service
//!
//! - feed: read paths behind rate limiters, and the cache triggers for writes

pub mod feed;

pub use feed::FeedService;
