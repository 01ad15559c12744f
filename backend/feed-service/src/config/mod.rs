use anyhow::{Context, Result};
use feed_cache::{FeedCacheConfig, RateLimitConfig};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub log_level: String,
    pub http_host: String,
    pub http_port: u16,
}

impl AppConfig {
    /// Bind address of the operational HTTP endpoints
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub global_feed_max: usize,
    pub snapshot_ttl_secs: u64,
    pub home_feed_ttl_secs: u64,
    pub preload_on_start: bool,
    pub index_warm_interval_secs: u64,
    pub global_rate_limit: RateLimitSettings,
    pub home_rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub window_seconds: u64,
    pub max_requests: u64,
}

impl FeedConfig {
    pub fn cache(&self) -> FeedCacheConfig {
        FeedCacheConfig {
            global_feed_max: self.global_feed_max,
            snapshot_ttl_secs: self.snapshot_ttl_secs,
            home_page_ttl_secs: self.home_feed_ttl_secs,
        }
    }

    pub fn global_limiter(&self) -> RateLimitConfig {
        let defaults = RateLimitConfig::global_feed();
        RateLimitConfig::new(
            defaults.name,
            self.global_rate_limit.window_seconds,
            self.global_rate_limit.max_requests,
        )
    }

    pub fn home_limiter(&self) -> RateLimitConfig {
        let defaults = RateLimitConfig::home_feed();
        RateLimitConfig::new(
            defaults.name,
            self.home_rate_limit.window_seconds,
            self.home_rate_limit.max_requests,
        )
    }

    pub fn index_warm_interval(&self) -> Duration {
        Duration::from_secs(self.index_warm_interval_secs)
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        let cache = FeedCacheConfig::default();
        let global = RateLimitConfig::global_feed();
        let home = RateLimitConfig::home_feed();
        Self {
            global_feed_max: cache.global_feed_max,
            snapshot_ttl_secs: cache.snapshot_ttl_secs,
            home_feed_ttl_secs: cache.home_page_ttl_secs,
            preload_on_start: true,
            index_warm_interval_secs: default_index_warm_interval_secs(),
            global_rate_limit: RateLimitSettings {
                window_seconds: global.window_seconds,
                max_requests: global.max_requests,
            },
            home_rate_limit: RateLimitSettings {
                window_seconds: home.window_seconds,
                max_requests: home.max_requests,
            },
        }
    }
}

impl Config {
    /// Load from the process environment, reading `.env` first if present
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = FeedConfig::default();

        Ok(Config {
            app: AppConfig {
                env: lookup("APP_ENV").unwrap_or_else(|| "development".to_string()),
                log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
                http_host: lookup("HTTP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                http_port: parse_or(&lookup, "HTTP_PORT", 8080)?,
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
                run_migrations: parse_or(&lookup, "RUN_MIGRATIONS", false)?,
            },
            redis: RedisConfig {
                url: lookup("REDIS_URL").unwrap_or_else(default_redis_url),
            },
            feed: FeedConfig {
                global_feed_max: parse_or(&lookup, "GLOBAL_FEED_MAX", defaults.global_feed_max)?,
                snapshot_ttl_secs: parse_or(&lookup, "SNAPSHOT_TTL_SECS", defaults.snapshot_ttl_secs)?,
                home_feed_ttl_secs: parse_or(
                    &lookup,
                    "HOME_FEED_TTL_SECS",
                    defaults.home_feed_ttl_secs,
                )?,
                preload_on_start: parse_or(&lookup, "PRELOAD_ON_START", defaults.preload_on_start)?,
                index_warm_interval_secs: parse_or(
                    &lookup,
                    "INDEX_WARM_INTERVAL_SECS",
                    defaults.index_warm_interval_secs,
                )?,
                global_rate_limit: RateLimitSettings {
                    window_seconds: parse_or(
                        &lookup,
                        "GLOBAL_FEED_RL_WINDOW_SECS",
                        defaults.global_rate_limit.window_seconds,
                    )?,
                    max_requests: parse_or(
                        &lookup,
                        "GLOBAL_FEED_RL_MAX",
                        defaults.global_rate_limit.max_requests,
                    )?,
                },
                home_rate_limit: RateLimitSettings {
                    window_seconds: parse_or(
                        &lookup,
                        "HOME_FEED_RL_WINDOW_SECS",
                        defaults.home_rate_limit.window_seconds,
                    )?,
                    max_requests: parse_or(
                        &lookup,
                        "HOME_FEED_RL_MAX",
                        defaults.home_rate_limit.max_requests,
                    )?,
                },
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", name, raw)),
        None => Ok(default),
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_index_warm_interval_secs() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/threads")])).unwrap();

        assert_eq!(config.app.env, "development");
        assert_eq!(config.app.http_addr(), "0.0.0.0:8080");
        assert_eq!(config.database.max_connections, 10);
        assert!(!config.database.run_migrations);
        assert_eq!(config.redis.url, "redis://127.0.0.1:6379");
        assert_eq!(config.feed.global_feed_max, 200);
        assert_eq!(config.feed.snapshot_ttl_secs, 600);
        assert_eq!(config.feed.home_feed_ttl_secs, 60);
        assert!(config.feed.preload_on_start);
        assert_eq!(config.feed.index_warm_interval(), Duration::from_secs(300));

        let global = config.feed.global_limiter();
        assert_eq!((global.name.as_str(), global.window_seconds, global.max_requests), ("global-feed", 15, 60));
        let home = config.feed.home_limiter();
        assert_eq!((home.name.as_str(), home.window_seconds, home.max_requests), ("home-feed", 10, 40));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/threads"),
            ("RUN_MIGRATIONS", "true"),
            ("GLOBAL_FEED_MAX", "50"),
            ("HOME_FEED_TTL_SECS", "90"),
            ("GLOBAL_FEED_RL_MAX", "5"),
            ("HTTP_PORT", "9100"),
        ]))
        .unwrap();

        assert_eq!(config.app.http_port, 9100);
        assert!(config.database.run_migrations);
        assert_eq!(config.feed.cache().global_feed_max, 50);
        assert_eq!(config.feed.cache().home_page_ttl_secs, 90);
        assert_eq!(config.feed.global_limiter().max_requests, 5);
    }

    #[test]
    fn test_missing_database_url_is_an_error() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_unparsable_value_names_the_variable() {
        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/threads"),
            ("SNAPSHOT_TTL_SECS", "ten minutes"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("SNAPSHOT_TTL_SECS"));
    }
}
