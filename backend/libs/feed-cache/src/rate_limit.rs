//! Fixed-window rate limiting
//!
//! One counter per `rl:{limiter}:{subject}:{window}`. The first request of a
//! window sets the expiry, so stale windows clean themselves up. INCR and
//! EXPIRE are separate calls: two first requests racing in the same window
//! both set the same TTL, which is harmless.
//!
//! If Redis is unreachable the request is allowed rather than blocked.

use crate::backend::SharedBackend;
use crate::guard::soften;
use crate::{CacheKey, CacheMetrics, FeedError, FeedResult};
use serde::Deserialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateLimitConfig {
    pub name: String,
    pub window_seconds: u64,
    pub max_requests: u64,
}

impl RateLimitConfig {
    pub fn new(name: impl Into<String>, window_seconds: u64, max_requests: u64) -> Self {
        Self {
            name: name.into(),
            window_seconds: window_seconds.max(1),
            max_requests,
        }
    }

    /// 60 requests per 15 seconds
    pub fn global_feed() -> Self {
        Self::new("global-feed", 15, 60)
    }

    /// 40 requests per 10 seconds
    pub fn home_feed() -> Self {
        Self::new("home-feed", 10, 40)
    }
}

/// Whose requests a counter tracks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateSubject {
    User(String),
    Ip(String),
    Anonymous,
}

impl RateSubject {
    /// User id when authenticated, else client IP, else anonymous
    pub fn resolve(user_id: Option<&str>, ip: Option<&str>) -> Self {
        match (user_id, ip) {
            (Some(user), _) if !user.is_empty() => RateSubject::User(user.to_string()),
            (_, Some(ip)) if !ip.is_empty() => RateSubject::Ip(ip.to_string()),
            _ => RateSubject::Anonymous,
        }
    }

    pub fn key_part(&self) -> &str {
        match self {
            RateSubject::User(id) => id,
            RateSubject::Ip(ip) => ip,
            RateSubject::Anonymous => "anonymous",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests seen in the current window, 0 when the backend failed
    pub count: u64,
    pub limit: u64,
    /// Seconds until the window rolls over
    pub retry_after_secs: u64,
}

#[derive(Clone)]
pub struct RateLimiter {
    backend: SharedBackend,
    config: RateLimitConfig,
    metrics: CacheMetrics,
}

impl RateLimiter {
    pub fn new(backend: SharedBackend, config: RateLimitConfig) -> Self {
        Self {
            backend,
            config,
            metrics: CacheMetrics::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub async fn check(&self, subject: &RateSubject) -> RateDecision {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.check_at(subject, now).await
    }

    /// Count one request at `now_secs` (unix seconds)
    pub async fn check_at(&self, subject: &RateSubject, now_secs: u64) -> RateDecision {
        let window_seconds = self.config.window_seconds;
        let window = now_secs / window_seconds;
        let retry_after_secs = (window + 1) * window_seconds - now_secs;
        let key = CacheKey::rate_window(&self.config.name, subject.key_part(), window);

        let count = match soften("incr", &key, self.backend.incr(&key)).await {
            Some(count) => count.max(0) as u64,
            None => {
                warn!(limiter = %self.config.name, key = %key, "Rate limiter backend failed, allowing request");
                self.metrics.record_rate_limit_fail_open(&self.config.name);
                return RateDecision {
                    allowed: true,
                    count: 0,
                    limit: self.config.max_requests,
                    retry_after_secs: 0,
                };
            }
        };

        if count == 1 {
            soften("expire", &key, self.backend.expire(&key, window_seconds)).await;
        }

        let allowed = count <= self.config.max_requests;
        if !allowed {
            debug!(limiter = %self.config.name, key = %key, count = count, "Rate limit exceeded");
            self.metrics.record_rate_limited(&self.config.name);
        }

        RateDecision {
            allowed,
            count,
            limit: self.config.max_requests,
            retry_after_secs,
        }
    }

    /// Like [`RateLimiter::check`], with rejection as an error
    pub async fn enforce(&self, subject: &RateSubject) -> FeedResult<RateDecision> {
        let decision = self.check(subject).await;
        self.reject_if_exceeded(decision)
    }

    pub async fn enforce_at(&self, subject: &RateSubject, now_secs: u64) -> FeedResult<RateDecision> {
        let decision = self.check_at(subject, now_secs).await;
        self.reject_if_exceeded(decision)
    }

    fn reject_if_exceeded(&self, decision: RateDecision) -> FeedResult<RateDecision> {
        if decision.allowed {
            Ok(decision)
        } else {
            Err(FeedError::RateLimited {
                limiter: self.config.name.clone(),
                retry_after_secs: decision.retry_after_secs,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::sync::Arc;

    #[test]
    fn test_standard_limiters() {
        let global = RateLimitConfig::global_feed();
        assert_eq!((global.name.as_str(), global.window_seconds, global.max_requests), ("global-feed", 15, 60));
        let home = RateLimitConfig::home_feed();
        assert_eq!((home.name.as_str(), home.window_seconds, home.max_requests), ("home-feed", 10, 40));
    }

    #[test]
    fn test_subject_resolution() {
        assert_eq!(RateSubject::resolve(Some("u1"), Some("1.2.3.4")).key_part(), "u1");
        assert_eq!(RateSubject::resolve(None, Some("1.2.3.4")).key_part(), "1.2.3.4");
        assert_eq!(RateSubject::resolve(Some(""), None), RateSubject::Anonymous);
        assert_eq!(RateSubject::Anonymous.key_part(), "anonymous");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_sets_window_ttl() {
        let backend = Arc::new(MemoryBackend::new());
        let limiter = RateLimiter::new(backend.clone(), RateLimitConfig::new("t", 15, 2));
        let subject = RateSubject::Ip("10.0.0.1".into());

        let decision = limiter.check_at(&subject, 1_500).await;
        assert!(decision.allowed);
        assert_eq!(decision.count, 1);
        assert_eq!(decision.retry_after_secs, 15);
        assert_eq!(
            backend.ttl("rl:t:10.0.0.1:100"),
            Some(std::time::Duration::from_secs(15))
        );
    }

    #[tokio::test]
    async fn test_over_limit_is_rejected_until_next_window() {
        let backend = Arc::new(MemoryBackend::new());
        let limiter = RateLimiter::new(backend, RateLimitConfig::new("t", 10, 2));
        let subject = RateSubject::User("u1".into());

        assert!(limiter.check_at(&subject, 100).await.allowed);
        assert!(limiter.check_at(&subject, 104).await.allowed);
        let rejected = limiter.enforce_at(&subject, 107).await.unwrap_err();
        assert!(matches!(
            rejected,
            FeedError::RateLimited { retry_after_secs: 3, .. }
        ));
        assert!(limiter.check_at(&subject, 110).await.allowed);
    }

    #[tokio::test]
    async fn test_fails_open_when_backend_down() {
        let backend = Arc::new(MemoryBackend::new());
        let limiter = RateLimiter::new(backend.clone(), RateLimitConfig::new("t", 10, 0));
        backend.set_available(false);

        let decision = limiter.enforce(&RateSubject::Anonymous).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.count, 0);
    }
}
