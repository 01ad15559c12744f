//! Cache metrics for observability

use crate::keys::CacheKey;
use prometheus::{CounterVec, Opts, Registry};
use std::sync::OnceLock;

static METRICS: OnceLock<CacheMetricsInner> = OnceLock::new();

struct CacheMetricsInner {
    hits: CounterVec,
    misses: CounterVec,
    writes: CounterVec,
    invalidations: CounterVec,
    errors: CounterVec,
    feed_reads: CounterVec,
    rate_limited: CounterVec,
    rate_limit_fail_open: CounterVec,
}

fn counter(name: &str, help: &str, labels: &[&str]) -> CounterVec {
    CounterVec::new(Opts::new(name, help), labels).expect("valid metric definition")
}

impl CacheMetricsInner {
    fn new() -> Self {
        Self {
            hits: counter("feed_cache_hits_total", "Total cache hits", &["entity"]),
            misses: counter("feed_cache_misses_total", "Total cache misses", &["entity"]),
            writes: counter("feed_cache_writes_total", "Total cache writes", &["entity"]),
            invalidations: counter(
                "feed_cache_invalidations_total",
                "Total cache invalidations",
                &["entity"],
            ),
            errors: counter(
                "feed_cache_errors_total",
                "Cache backend faults swallowed at a component boundary",
                &["entity", "op"],
            ),
            feed_reads: counter(
                "feed_reads_total",
                "Feed pages served, by provenance",
                &["feed", "provenance"],
            ),
            rate_limited: counter(
                "feed_rate_limited_total",
                "Requests rejected by a rate limiter",
                &["limiter"],
            ),
            rate_limit_fail_open: counter(
                "feed_rate_limit_fail_open_total",
                "Requests allowed because the limiter backend failed",
                &["limiter"],
            ),
        }
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.hits.clone()))?;
        registry.register(Box::new(self.misses.clone()))?;
        registry.register(Box::new(self.writes.clone()))?;
        registry.register(Box::new(self.invalidations.clone()))?;
        registry.register(Box::new(self.errors.clone()))?;
        registry.register(Box::new(self.feed_reads.clone()))?;
        registry.register(Box::new(self.rate_limited.clone()))?;
        registry.register(Box::new(self.rate_limit_fail_open.clone()))?;
        Ok(())
    }
}

fn get_metrics() -> &'static CacheMetricsInner {
    METRICS.get_or_init(CacheMetricsInner::new)
}

/// Cache metrics handle
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheMetrics;

impl CacheMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Register metrics with a Prometheus registry
    pub fn register(registry: &Registry) -> Result<(), prometheus::Error> {
        get_metrics().register(registry)
    }

    pub fn record_hit(&self, key: &str) {
        let entity = CacheKey::entity_type(key);
        get_metrics().hits.with_label_values(&[entity]).inc();
    }

    pub fn record_miss(&self, key: &str) {
        let entity = CacheKey::entity_type(key);
        get_metrics().misses.with_label_values(&[entity]).inc();
    }

    pub fn record_hits(&self, entity: &str, count: usize) {
        get_metrics()
            .hits
            .with_label_values(&[entity])
            .inc_by(count as f64);
    }

    pub fn record_misses(&self, entity: &str, count: usize) {
        get_metrics()
            .misses
            .with_label_values(&[entity])
            .inc_by(count as f64);
    }

    pub fn record_write(&self, key: &str) {
        let entity = CacheKey::entity_type(key);
        get_metrics().writes.with_label_values(&[entity]).inc();
    }

    pub fn record_invalidation(&self, key: &str) {
        let entity = CacheKey::entity_type(key);
        get_metrics()
            .invalidations
            .with_label_values(&[entity])
            .inc();
    }

    pub fn record_error(&self, key: &str, op: &str) {
        let entity = CacheKey::entity_type(key);
        get_metrics().errors.with_label_values(&[entity, op]).inc();
    }

    pub fn record_feed_read(&self, feed: &str, provenance: &str) {
        get_metrics()
            .feed_reads
            .with_label_values(&[feed, provenance])
            .inc();
    }

    pub fn record_rate_limited(&self, limiter: &str) {
        get_metrics()
            .rate_limited
            .with_label_values(&[limiter])
            .inc();
    }

    pub fn record_rate_limit_fail_open(&self, limiter: &str) {
        get_metrics()
            .rate_limit_fail_open
            .with_label_values(&[limiter])
            .inc();
    }
}

#[cfg(test)]
pub(crate) fn misses(entity: &str) -> f64 {
    get_metrics().misses.with_label_values(&[entity]).get()
}
