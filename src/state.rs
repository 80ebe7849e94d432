use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::{access::Viewer, config::AppConfig, db::build_pool};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<sqlx::PgPool>,
    pub http_client: reqwest::Client,
    /// Resolved viewer contexts keyed by auth user id.
    pub viewer_cache: Cache<String, Viewer>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = build_pool(&config)?;
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("hostgrowth-backend/1.0")
            .build()?;
        let viewer_cache = Cache::builder()
            .max_capacity(config.viewer_cache_max_entries)
            .time_to_live(Duration::from_secs(config.viewer_cache_ttl_seconds))
            .build();

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            http_client,
            viewer_cache,
        })
    }
}
