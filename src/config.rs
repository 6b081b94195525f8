//! Configuration for the HKJC scraper.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Scraper configuration: politeness delays, page timeouts, retry and
/// checkpoint behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Minimum inter-request delay, applied on every attempt regardless
    /// of failure rate.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    /// Maximum inter-request delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_page_load_timeout_ms")]
    pub page_load_timeout_ms: u64,
    #[serde(default = "default_selector_timeout_ms")]
    pub selector_timeout_ms: u64,
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    /// Total attempts per network operation.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Save the checkpoint every N completed horses.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_min_delay_ms() -> u64 {
    400
}

fn default_max_delay_ms() -> u64 {
    1200
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_page_load_timeout_ms() -> u64 {
    30_000
}

fn default_selector_timeout_ms() -> u64 {
    10_000
}

fn default_navigation_timeout_ms() -> u64 {
    20_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    5_000
}

fn default_checkpoint_interval() -> usize {
    1
}

fn default_checkpoint_dir() -> String {
    "data/checkpoints".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            requests_per_minute: default_requests_per_minute(),
            page_load_timeout_ms: default_page_load_timeout_ms(),
            selector_timeout_ms: default_selector_timeout_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            checkpoint_interval: default_checkpoint_interval(),
            checkpoint_dir: default_checkpoint_dir(),
            user_agent: default_user_agent(),
        }
    }
}

impl ScraperConfig {
    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_timeout_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
}

impl AppConfig {
    /// Load configuration from environment and config file
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // Add config file if exists
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables (HKJC_SCRAPER_MAX_RETRIES, etc.)
            .add_source(
                config::Environment::with_prefix("HKJC")
                    .separator("_")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScraperConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.checkpoint_interval, 1);
        assert!(config.min_delay_ms < config.max_delay_ms);
        assert!(config.retry_base_delay_ms < config.retry_max_delay_ms);
    }

    #[test]
    fn test_timeout_helpers() {
        let config = ScraperConfig::default();
        assert_eq!(config.page_load_timeout(), Duration::from_millis(30_000));
        assert_eq!(config.selector_timeout(), Duration::from_millis(10_000));
        assert_eq!(config.navigation_timeout(), Duration::from_millis(20_000));
    }
}
