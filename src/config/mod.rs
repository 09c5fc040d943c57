//! Configuration module for prompush.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Global scrape defaults (interval, timeout)
//! - Scrape jobs (static targets, file and HTTP discovery)
//! - Pushgateway endpoint and retry policy
//! - Status server settings (port, bind address)

mod app;
mod job;
mod validation;

pub use app::{AppConfig, GatewayConfig, ServerConfig, Settings};
pub use job::{FileSdConfig, GlobalConfig, HttpSdConfig, JobConfig, Scheme};
pub use validation::{ConfigError, expand_env_vars, validate_address, validate_label_name};

// Re-export constants
pub use app::{DEFAULT_GATEWAY_URL, DEFAULT_PORT, DEFAULT_PUSH_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT};
pub use job::{
    DEFAULT_FILE_SD_REFRESH, DEFAULT_HTTP_SD_REFRESH, DEFAULT_METRICS_PATH,
    DEFAULT_SCRAPE_INTERVAL, DEFAULT_SCRAPE_TIMEOUT, MIN_SCRAPE_INTERVAL,
};
