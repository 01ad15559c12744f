//! Index Warmer Background Job
//!
//! Re-runs the global feed preload on a fixed interval. Preload is a no-op
//! while `global:feed` exists, so in steady state each cycle costs one
//! EXISTS. After a Redis restart or eviction the next cycle rebuilds the
//! index from PostgreSQL without a service restart.

use feed_cache::{GlobalFeedIndex, SnapshotStore, StoreResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};

/// How often to check the index (every 5 minutes)
const WARM_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone)]
pub struct IndexWarmerConfig {
    pub enabled: bool,
    pub warm_interval: Duration,
}

impl Default for IndexWarmerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warm_interval: WARM_INTERVAL,
        }
    }
}

/// Start the index warmer background job
pub async fn start_index_warmer(
    index: GlobalFeedIndex,
    store: Arc<dyn SnapshotStore>,
    config: IndexWarmerConfig,
) {
    if !config.enabled {
        tracing::info!("Index warmer disabled by configuration");
        return;
    }

    tracing::info!(
        interval_secs = config.warm_interval.as_secs(),
        "Starting index warmer background job"
    );

    let mut ticker = interval(config.warm_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; startup already ran a preload
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let cycle_start = Instant::now();

        match run_warm_cycle(&index, store.as_ref()).await {
            Ok(0) => {
                tracing::debug!("Global feed index already warm");
            }
            Ok(loaded) => {
                tracing::info!(
                    loaded = loaded,
                    duration_ms = cycle_start.elapsed().as_millis(),
                    "Global feed index rebuilt"
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    duration_ms = cycle_start.elapsed().as_millis(),
                    "Index warm cycle failed"
                );
            }
        }
    }
}

/// Run a single warm cycle; returns the number of ids loaded
pub async fn run_warm_cycle(index: &GlobalFeedIndex, store: &dyn SnapshotStore) -> StoreResult<usize> {
    index.preload(store).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use feed_cache::{
        AuthorSummary, CacheBackend, CacheKey, ContentSnapshot, InMemorySnapshotStore,
        MemoryBackend, PostType, ThreadSnapshotCache,
    };

    fn seeded_store() -> InMemorySnapshotStore {
        let store = InMemorySnapshotStore::new();
        for i in 0..3 {
            store.insert(ContentSnapshot::new(
                format!("t{}", i),
                "hi",
                PostType::Normal,
                None,
                Utc.timestamp_opt(1_700_000_000 + i, 0).unwrap(),
                AuthorSummary {
                    id: "u1".into(),
                    username: "ada".into(),
                    avatar_url: None,
                },
            ));
        }
        store
    }

    #[test]
    fn test_default_config() {
        let config = IndexWarmerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.warm_interval, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_cycle_rebuilds_lost_index() {
        let backend = Arc::new(MemoryBackend::new());
        let index = GlobalFeedIndex::new(backend.clone(), ThreadSnapshotCache::new(backend.clone()));
        let store = seeded_store();

        assert_eq!(run_warm_cycle(&index, &store).await.unwrap(), 3);
        assert_eq!(run_warm_cycle(&index, &store).await.unwrap(), 0);

        // Simulates a Redis flush
        backend.del(&[CacheKey::global_feed().to_string()]).await.unwrap();
        assert_eq!(run_warm_cycle(&index, &store).await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_heals_index_on_next_tick() {
        let backend = Arc::new(MemoryBackend::new());
        let index = GlobalFeedIndex::new(backend.clone(), ThreadSnapshotCache::new(backend.clone()));
        let store: Arc<dyn SnapshotStore> = Arc::new(seeded_store());

        let job = tokio::spawn(start_index_warmer(
            index.clone(),
            store,
            IndexWarmerConfig {
                enabled: true,
                warm_interval: Duration::from_secs(60),
            },
        ));

        tokio::time::sleep(Duration::from_secs(61)).await;
        let (ids, _) = index.window(0, 10).await.unwrap();
        assert_eq!(ids, vec!["t2", "t1", "t0"]);
        job.abort();
    }
}
