//! Scrape job configuration structures.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::target::TargetGroup;

use super::validation::{validate_address, validate_label_name};

/// Default scrape interval (1 minute).
pub const DEFAULT_SCRAPE_INTERVAL: Duration = Duration::from_secs(60);

/// Default scrape timeout (10 seconds).
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum allowed scrape interval (1 second).
pub const MIN_SCRAPE_INTERVAL: Duration = Duration::from_secs(1);

/// Default metrics path.
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

/// Default refresh interval for file-based discovery (5 minutes).
pub const DEFAULT_FILE_SD_REFRESH: Duration = Duration::from_secs(300);

/// Default refresh interval for HTTP-based discovery (60 seconds).
pub const DEFAULT_HTTP_SD_REFRESH: Duration = Duration::from_secs(60);

fn default_scrape_interval() -> Duration {
    DEFAULT_SCRAPE_INTERVAL
}

fn default_scrape_timeout() -> Duration {
    DEFAULT_SCRAPE_TIMEOUT
}

fn default_metrics_path() -> String {
    DEFAULT_METRICS_PATH.to_string()
}

fn default_file_sd_refresh() -> Duration {
    DEFAULT_FILE_SD_REFRESH
}

fn default_http_sd_refresh() -> Duration {
    DEFAULT_HTTP_SD_REFRESH
}

/// URL scheme used to scrape a job's targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    /// Get the scheme as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defaults applied to every job that does not override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default scrape interval (default: 1m).
    #[serde(default = "default_scrape_interval", with = "humantime_serde")]
    pub scrape_interval: Duration,

    /// Default scrape timeout (default: 10s).
    #[serde(default = "default_scrape_timeout", with = "humantime_serde")]
    pub scrape_timeout: Duration,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            scrape_interval: DEFAULT_SCRAPE_INTERVAL,
            scrape_timeout: DEFAULT_SCRAPE_TIMEOUT,
        }
    }
}

/// File-based discovery: YAML or JSON files listing target groups.
///
/// Entries may name files or directories; directories contribute every
/// `.yml`, `.yaml` and `.json` file they contain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSdConfig {
    /// Files or directories to read.
    pub files: Vec<PathBuf>,

    /// Re-read interval (default: 5m).
    #[serde(default = "default_file_sd_refresh", with = "humantime_serde")]
    pub refresh_interval: Duration,
}

/// HTTP-based discovery: an endpoint returning a JSON list of target groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSdConfig {
    /// Discovery endpoint URL.
    pub url: String,

    /// Re-fetch interval (default: 60s).
    #[serde(default = "default_http_sd_refresh", with = "humantime_serde")]
    pub refresh_interval: Duration,
}

/// One scrape job: a named group of targets sharing scrape parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique job name.
    pub job_name: String,

    /// Scrape interval (falls back to `global.scrape_interval`).
    #[serde(default, with = "humantime_serde")]
    pub scrape_interval: Option<Duration>,

    /// Scrape timeout (falls back to `global.scrape_timeout`).
    #[serde(default, with = "humantime_serde")]
    pub scrape_timeout: Option<Duration>,

    /// HTTP path to scrape (default: "/metrics").
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// URL scheme (default: http).
    #[serde(default)]
    pub scheme: Scheme,

    /// Labels attached to every target of the job.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Fixed target lists.
    #[serde(default)]
    pub static_configs: Vec<TargetGroup>,

    /// File-based discovery sources.
    #[serde(default)]
    pub file_sd_configs: Vec<FileSdConfig>,

    /// HTTP-based discovery sources.
    #[serde(default)]
    pub http_sd_configs: Vec<HttpSdConfig>,
}

impl JobConfig {
    /// Create a job with a static target list and default parameters.
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            scrape_interval: None,
            scrape_timeout: None,
            metrics_path: default_metrics_path(),
            scheme: Scheme::default(),
            labels: BTreeMap::new(),
            static_configs: Vec::new(),
            file_sd_configs: Vec::new(),
            http_sd_configs: Vec::new(),
        }
    }

    /// Add a static target group.
    pub fn with_static_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_configs.push(TargetGroup {
            targets: targets.into_iter().map(Into::into).collect(),
            labels: BTreeMap::new(),
        });
        self
    }

    /// Set the scrape interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.scrape_interval = Some(interval);
        self
    }

    /// Set the scrape timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.scrape_timeout = Some(timeout);
        self
    }

    /// Set the metrics path.
    pub fn with_metrics_path(mut self, path: impl Into<String>) -> Self {
        self.metrics_path = path.into();
        self
    }

    /// Add a job label.
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    /// Add a file discovery source.
    pub fn with_file_sd(mut self, files: Vec<PathBuf>, refresh_interval: Duration) -> Self {
        self.file_sd_configs.push(FileSdConfig {
            files,
            refresh_interval,
        });
        self
    }

    /// Add an HTTP discovery source.
    pub fn with_http_sd(mut self, url: impl Into<String>, refresh_interval: Duration) -> Self {
        self.http_sd_configs.push(HttpSdConfig {
            url: url.into(),
            refresh_interval,
        });
        self
    }

    /// Interval after applying global defaults.
    ///
    /// Interval is clamped to a minimum of 1 second.
    pub fn effective_interval(&self, global: &GlobalConfig) -> Duration {
        let interval = self.scrape_interval.unwrap_or(global.scrape_interval);
        if interval < MIN_SCRAPE_INTERVAL {
            tracing::warn!(job = %self.job_name, min_interval = ?MIN_SCRAPE_INTERVAL,
                "Scrape interval is less than minimum allowed. Using minimum interval."
            );
            MIN_SCRAPE_INTERVAL
        } else {
            interval
        }
    }

    /// Timeout after applying global defaults, never longer than the interval.
    pub fn effective_timeout(&self, global: &GlobalConfig) -> Duration {
        let timeout = self.scrape_timeout.unwrap_or(global.scrape_timeout);
        timeout.min(self.effective_interval(global))
    }

    /// Whether any source needs periodic re-resolution.
    pub fn has_dynamic_discovery(&self) -> bool {
        !self.file_sd_configs.is_empty() || !self.http_sd_configs.is_empty()
    }

    /// Shortest refresh interval across the job's dynamic sources.
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.file_sd_configs
            .iter()
            .map(|c| c.refresh_interval)
            .chain(self.http_sd_configs.iter().map(|c| c.refresh_interval))
            .min()
    }

    /// Validate the job definition.
    pub fn validate(&self) -> Result<(), String> {
        if !self.metrics_path.starts_with('/') {
            return Err(format!(
                "metrics_path '{}' must start with '/'",
                self.metrics_path
            ));
        }

        for name in self.labels.keys() {
            validate_label_name(name)?;
        }

        for group in &self.static_configs {
            for name in group.labels.keys() {
                validate_label_name(name)?;
            }
            for address in &group.targets {
                validate_address(address)?;
            }
        }

        for file_sd in &self.file_sd_configs {
            if file_sd.files.is_empty() {
                return Err("file_sd_configs entry has no files".to_string());
            }
        }

        for http_sd in &self.http_sd_configs {
            let url = url::Url::parse(&http_sd.url)
                .map_err(|e| format!("invalid http_sd url '{}': {}", http_sd.url, e))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(format!(
                    "http_sd url '{}' must use http or https",
                    http_sd.url
                ));
            }
        }

        Ok(())
    }
}
