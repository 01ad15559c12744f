//! Operational HTTP endpoints: health and Prometheus scrape

use crate::metrics;
use actix_web::{web, HttpResponse};
use prometheus::{Encoder, Registry, TextEncoder};
use redis_utils::RedisPool;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    redis: &'static str,
}

/// Routes; expects `web::Data<Registry>` and `web::Data<RedisPool>` in app data
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(serve_metrics));
}

/// Always 200: a Redis outage degrades the feeds but does not take them down
async fn health(redis: web::Data<RedisPool>) -> HttpResponse {
    HttpResponse::Ok().json(Health {
        status: "ok",
        redis: if redis.is_connected() { "connected" } else { "degraded" },
    })
}

async fn serve_metrics(registry: web::Data<Registry>) -> HttpResponse {
    match metrics::render(&registry) {
        Ok(body) => HttpResponse::Ok()
            .content_type(TextEncoder::new().format_type())
            .body(body),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use feed_cache::CacheMetrics;

    fn app_data() -> (web::Data<Registry>, web::Data<RedisPool>) {
        let registry = metrics::init_registry().unwrap();
        let redis = RedisPool::open("redis://127.0.0.1:1").unwrap();
        (web::Data::new(registry), web::Data::new(redis))
    }

    #[actix_web::test]
    async fn test_metrics_endpoint_serves_feed_counters() {
        let (registry, redis) = app_data();
        CacheMetrics::new().record_feed_read("global", "store");
        let app = test::init_service(
            App::new()
                .app_data(registry)
                .app_data(redis)
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body = test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("threads_feed_reads_total"));
    }

    #[actix_web::test]
    async fn test_health_reports_degraded_redis() {
        let (registry, redis) = app_data();
        let app = test::init_service(
            App::new()
                .app_data(registry)
                .app_data(redis)
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body = test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(r#""redis":"degraded""#));
    }
}
