//! Cache key schema
//!
//! These formats are shared with other deployments reading the same Redis,
//! so they must not change shape:
//!
//! - `global:feed`
//! - `thread:{id}`
//! - `feed:user:{actor}:limit:{limit}:cursor:{cursor|none}`
//! - `rl:{limiter}:{actor-or-ip}:{window}`

/// Key of the bounded global recency list
pub const GLOBAL_FEED_KEY: &str = "global:feed";

const THREAD_PREFIX: &str = "thread:";
const NO_CURSOR: &str = "none";

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    // ============= Global Feed Keys =============

    pub fn global_feed() -> &'static str {
        GLOBAL_FEED_KEY
    }

    /// Snapshot of one thread
    /// Format: thread:{id}
    pub fn thread(thread_id: &str) -> String {
        format!("{}{}", THREAD_PREFIX, thread_id)
    }

    // ============= Home Feed Keys =============

    /// One memoized page of a personalized feed
    /// Format: feed:user:{actor}:limit:{limit}:cursor:{cursor|none}
    pub fn home_page(actor_id: &str, limit: usize, cursor: Option<&str>) -> String {
        format!(
            "feed:user:{}:limit:{}:cursor:{}",
            actor_id,
            limit,
            cursor.unwrap_or(NO_CURSOR)
        )
    }

    /// SCAN pattern matching every page owned by an actor
    pub fn home_page_pattern(actor_id: &str) -> String {
        format!("feed:user:{}:limit:*", escape_glob(actor_id))
    }

    // ============= Rate Limit Keys =============

    /// Format: rl:{limiter}:{subject}:{window}
    pub fn rate_window(limiter: &str, subject: &str, window: u64) -> String {
        format!("rl:{}:{}:{}", limiter, subject, window)
    }

    // ============= Graph Keys =============

    pub fn followers(user_id: &str) -> String {
        format!("graph:followers:{}", user_id)
    }

    pub fn following(user_id: &str) -> String {
        format!("graph:following:{}", user_id)
    }

    pub fn followers_count(user_id: &str) -> String {
        format!("graph:followers_count:{}", user_id)
    }

    pub fn following_count(user_id: &str) -> String {
        format!("graph:following_count:{}", user_id)
    }

    // ============= Utility =============

    /// First segment of a key, used as the metrics label
    pub fn entity_type(key: &str) -> &str {
        key.split(':').next().filter(|s| !s.is_empty()).unwrap_or("unknown")
    }
}

/// Escape Redis glob metacharacters so an id is matched literally.
pub fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
