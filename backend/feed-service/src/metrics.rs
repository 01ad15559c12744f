//! Prometheus registry for the service

use anyhow::{Context, Result};
use feed_cache::CacheMetrics;
use prometheus::{Encoder, Registry, TextEncoder};

/// Registry with the feed cache counters and process metrics
pub fn init_registry() -> Result<Registry> {
    let registry = Registry::new_custom(Some("threads".to_string()), None)
        .context("failed to create metrics registry")?;
    CacheMetrics::register(&registry).context("failed to register cache metrics")?;

    #[cfg(target_os = "linux")]
    registry
        .register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))
        .context("failed to register process metrics")?;

    Ok(registry)
}

/// Text exposition format
pub fn render(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("failed to encode metrics")?;
    String::from_utf8(buffer).context("metrics output is not UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_feed_counters() {
        let registry = init_registry().unwrap();
        CacheMetrics::new().record_feed_read("global", "cache");

        let text = render(&registry).unwrap();
        assert!(text.contains("threads_feed_reads_total"));
    }
}
