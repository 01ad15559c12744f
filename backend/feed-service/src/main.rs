use actix_web::{middleware, web, App, HttpServer};
use anyhow::{Context, Result};
use feed_cache::SnapshotStore;
use feed_service::config::Config;
use feed_service::db::PgSnapshotStore;
use feed_service::jobs::index_warmer::{start_index_warmer, IndexWarmerConfig};
use feed_service::{cache, http, logging, metrics, FeedService};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[actix_web::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    logging::init_tracing(&config.app.log_level)?;

    info!("Starting feed-service v{}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.env);

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    if config.database.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations applied");
    }

    // Reads and writes degrade to PostgreSQL while Redis is down, so this is not fatal
    let (redis, backend) = cache::open_backend(&config.redis.url, Duration::from_secs(2)).await?;

    let registry = metrics::init_registry()?;

    let store: Arc<dyn SnapshotStore> = Arc::new(PgSnapshotStore::new(db_pool.clone()));
    let service = FeedService::new(backend, store.clone(), &config.feed);

    if config.feed.preload_on_start {
        if let Err(e) = service.preload().await {
            warn!(error = %e, "Global feed preload failed; reads fall back to PostgreSQL");
        }
    }

    let warmer = tokio::spawn(start_index_warmer(
        service.index().clone(),
        store,
        IndexWarmerConfig {
            enabled: config.feed.index_warm_interval_secs > 0,
            warm_interval: config.feed.index_warm_interval(),
        },
    ));

    let addr = config.app.http_addr();
    let registry = web::Data::new(registry);
    let redis_data = web::Data::new(redis);
    info!(addr = %addr, "feed-service ready");

    // Runs until SIGINT/SIGTERM, then drains in-flight requests
    HttpServer::new(move || {
        App::new()
            .app_data(registry.clone())
            .app_data(redis_data.clone())
            .wrap(middleware::Logger::default())
            .configure(http::configure)
    })
    .bind(&addr)
    .with_context(|| format!("Failed to bind {}", addr))?
    .run()
    .await
    .context("HTTP server failed")?;

    info!("Shutting down feed-service");
    warmer.abort();
    db_pool.close().await;
    Ok(())
}
