//! Error types for the feed cache layer
//!
//! `CacheError` never crosses a component boundary: every call site wraps it
//! through [`crate::guard`]. `StoreError` and `FeedError` are the ones callers see.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Wrong value type at key {0}")]
    WrongType(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Failure of the durable store. These are failures of the operation itself
/// and always propagate.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Snapshot store unavailable: {0}")]
    Unavailable(String),

    #[error("Snapshot store error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced to callers of the feed layer.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Thread not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Too many requests on {limiter}, retry in {retry_after_secs}s")]
    RateLimited {
        limiter: String,
        retry_after_secs: u64,
    },
}

pub type FeedResult<T> = Result<T, FeedError>;
