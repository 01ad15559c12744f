pub mod cache;
pub mod config;
pub mod db;
pub mod http;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod services;

pub use config::Config;
pub use services::FeedService;
