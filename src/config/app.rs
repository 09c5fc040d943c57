//! Application configuration structures.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::labels::LabelOverlay;
use crate::push::{PushMethod, RetryPolicy};

use super::job::{GlobalConfig, JobConfig};
use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default status server port.
pub const DEFAULT_PORT: u16 = 8082;

/// Default Pushgateway address.
pub const DEFAULT_GATEWAY_URL: &str = "localhost:9091";

/// Default push request timeout (10 seconds).
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

fn default_push_timeout() -> Duration {
    DEFAULT_PUSH_TIMEOUT
}

fn default_shutdown_timeout() -> Duration {
    DEFAULT_SHUTDOWN_TIMEOUT
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Status server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 8082).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

// =============================================================================
// Gateway Configuration
// =============================================================================

/// Pushgateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway base URL; `http://` is assumed when no scheme is given.
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Push method (default: POST).
    #[serde(default)]
    pub method: PushMethod,

    /// Per-attempt request timeout (default: 10s).
    #[serde(default = "default_push_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Retry policy for transport failures and 5xx responses.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            method: PushMethod::default(),
            timeout: DEFAULT_PUSH_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl GatewayConfig {
    /// Resolve the configured URL into the gateway base endpoint.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if the URL is empty, unparsable,
    /// or not http(s).
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let raw = self.url.trim();
        if raw.is_empty() {
            return Err(ConfigError::ValidationError(
                "gateway url cannot be empty".to_string(),
            ));
        }

        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{}", raw)
        };

        let url = Url::parse(&with_scheme).map_err(|e| {
            ConfigError::ValidationError(format!("invalid gateway url '{}': {}", raw, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(ConfigError::ValidationError(format!(
                "gateway url '{}' must be an http or https base URL",
                raw
            )));
        }

        Ok(url)
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration, as read from the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Defaults shared by all jobs.
    #[serde(default)]
    pub global: GlobalConfig,

    /// Pushgateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Status server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Deadline for stopping background work (default: 5s).
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Scrape jobs.
    #[serde(default)]
    pub scrape_configs: Vec<JobConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            gateway: GatewayConfig::default(),
            server: ServerConfig::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            scrape_configs: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// Environment variables referenced as `${VAR}` or `${VAR:-default}` are
    /// expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server bind address
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        // Validate server port
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be non-zero".to_string(),
            ));
        }

        self.gateway.endpoint()?;
        self.gateway
            .retry
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("gateway retry: {}", e)))?;

        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "shutdown_timeout must be positive".to_string(),
            ));
        }

        // Check for duplicate job names
        let mut seen_names = HashSet::new();
        for job in &self.scrape_configs {
            if job.job_name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "job_name cannot be empty".to_string(),
                ));
            }
            if !seen_names.insert(&job.job_name) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate job name: '{}'",
                    job.job_name
                )));
            }
            job.validate().map_err(|e| {
                ConfigError::ValidationError(format!("job '{}': {}", job.job_name, e))
            })?;
        }

        Ok(())
    }
}

// =============================================================================
// Runtime Settings
// =============================================================================

/// Immutable process-wide settings resolved once at startup.
///
/// Shared by reference with the target manager, scheduler and pusher. Config
/// reloads only replace jobs; nothing in here changes after startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Gateway base endpoint.
    pub gateway_url: Url,
    /// Push method.
    pub push_method: PushMethod,
    /// Per-attempt push timeout.
    pub push_timeout: Duration,
    /// Push retry policy.
    pub retry: RetryPolicy,
    /// Custom labels injected into every pushed sample.
    pub overlay: LabelOverlay,
    /// Status server settings.
    pub server: ServerConfig,
    /// Shutdown deadline.
    pub shutdown_timeout: Duration,
}

impl Settings {
    /// Build settings from a validated config and the CLI label overlay.
    pub fn from_config(config: &AppConfig, overlay: LabelOverlay) -> Result<Self, ConfigError> {
        Ok(Self {
            gateway_url: config.gateway.endpoint()?,
            push_method: config.gateway.method,
            push_timeout: config.gateway.timeout,
            retry: config.gateway.retry.clone(),
            overlay,
            server: config.server.clone(),
            shutdown_timeout: config.shutdown_timeout,
        })
    }
}
