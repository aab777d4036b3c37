//! Configuration management

use std::path::PathBuf;

use anyhow::Result;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// Root directory for per-project plan artifacts
    pub data_dir: PathBuf,

    /// Directions provider base URL
    pub tmap_base_url: String,

    /// Directions provider application key
    pub tmap_app_key: String,

    /// Maximum provider calls in flight across all scenarios and projects
    pub max_inflight_routes: usize,

    /// Per-call provider timeout in seconds
    pub provider_timeout_secs: u64,

    /// Overall per-vehicle materialization timeout in seconds
    pub vehicle_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let nats_url = std::env::var("NATS_URL")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let data_dir = std::env::var("DATA_DIR")
            .unwrap_or_else(|_| "./data".to_string())
            .into();

        let tmap_base_url = std::env::var("TMAP_BASE_URL")
            .unwrap_or_else(|_| "https://apis.openapi.sk.com".to_string());

        let tmap_app_key = std::env::var("TMAP_APP_KEY").unwrap_or_default();

        let max_inflight_routes =
            env_parse("MAX_INFLIGHT_ROUTES", crate::defaults::DEFAULT_MAX_INFLIGHT_ROUTES)?;
        let provider_timeout_secs = env_parse("PROVIDER_TIMEOUT_SECS", 15)?;
        let vehicle_timeout_secs = env_parse("VEHICLE_TIMEOUT_SECS", 60)?;

        Ok(Self {
            nats_url,
            data_dir,
            tmap_base_url,
            tmap_app_key,
            max_inflight_routes,
            provider_timeout_secs,
            vehicle_timeout_secs,
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => Ok(raw.parse()?),
        Err(_) => Ok(default),
    }
}
