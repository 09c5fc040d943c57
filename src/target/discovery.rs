//! Target discovery sources.
//!
//! Each job resolves its targets from one or more [`Discoverer`]s:
//!
//! - [`StaticDiscovery`]: fixed groups from `static_configs`
//! - [`FileDiscovery`]: YAML/JSON files (or directories of them)
//! - [`HttpDiscovery`]: an endpoint returning a JSON list of groups

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use crate::config::JobConfig;

use super::types::TargetGroup;

/// Default timeout for a single discovery request (30 seconds).
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while resolving targets.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to read a discovery file or directory.
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A discovery payload could not be decoded.
    #[error("failed to parse '{source_name}': {reason}")]
    Parse { source_name: String, reason: String },

    /// HTTP request failed.
    #[error("discovery request to '{url}' failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Discovery endpoint answered with a non-success status.
    #[error("discovery endpoint '{url}' returned status {status}")]
    Status { url: String, status: u16 },

    /// Timeout elapsed.
    #[error("discovery timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP client could not be built.
    #[error("client error: {0}")]
    Client(String),
}

/// A source of target groups for one job.
#[async_trait::async_trait]
pub trait Discoverer: Send + Sync + 'static {
    /// Short source name for logs (e.g. "static", "file").
    fn kind(&self) -> &'static str;

    /// Resolve the current target groups.
    async fn discover(&self) -> Result<Vec<TargetGroup>, DiscoveryError>;
}

/// Fixed target groups.
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    groups: Vec<TargetGroup>,
}

impl StaticDiscovery {
    pub fn new(groups: Vec<TargetGroup>) -> Self {
        Self { groups }
    }
}

#[async_trait::async_trait]
impl Discoverer for StaticDiscovery {
    fn kind(&self) -> &'static str {
        "static"
    }

    async fn discover(&self) -> Result<Vec<TargetGroup>, DiscoveryError> {
        Ok(self.groups.clone())
    }
}

/// Target groups read from YAML or JSON files.
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    paths: Vec<PathBuf>,
}

impl FileDiscovery {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    async fn expand(&self) -> Result<Vec<PathBuf>, DiscoveryError> {
        let mut files = Vec::new();
        for path in &self.paths {
            let metadata = tokio::fs::metadata(path)
                .await
                .map_err(|source| DiscoveryError::Io {
                    path: path.clone(),
                    source,
                })?;

            if !metadata.is_dir() {
                files.push(path.clone());
                continue;
            }

            let mut entries = tokio::fs::read_dir(path)
                .await
                .map_err(|source| DiscoveryError::Io {
                    path: path.clone(),
                    source,
                })?;
            let mut found = Vec::new();
            while let Some(entry) =
                entries
                    .next_entry()
                    .await
                    .map_err(|source| DiscoveryError::Io {
                        path: path.clone(),
                        source,
                    })?
            {
                let entry_path = entry.path();
                if !is_sd_file(&entry_path) {
                    continue;
                }
                let file_type = entry.file_type().await.map_err(|source| DiscoveryError::Io {
                    path: entry_path.clone(),
                    source,
                })?;
                // Symlinks count when they resolve to a regular file.
                let is_file = if file_type.is_symlink() {
                    tokio::fs::metadata(&entry_path)
                        .await
                        .is_ok_and(|m| m.is_file())
                } else {
                    file_type.is_file()
                };
                if is_file {
                    found.push(entry_path);
                }
            }
            found.sort();
            files.extend(found);
        }
        Ok(files)
    }
}

fn is_sd_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml" | "yaml" | "json")
    )
}

/// Decode a discovery file by extension: `.json` as JSON, anything else as YAML.
pub fn parse_groups_file(path: &Path, content: &str) -> Result<Vec<TargetGroup>, DiscoveryError> {
    let parse_error = |reason: String| DiscoveryError::Parse {
        source_name: path.display().to_string(),
        reason,
    };

    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))
    } else if content.trim().is_empty() {
        Ok(Vec::new())
    } else {
        serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))
    }
}

#[async_trait::async_trait]
impl Discoverer for FileDiscovery {
    fn kind(&self) -> &'static str {
        "file"
    }

    async fn discover(&self) -> Result<Vec<TargetGroup>, DiscoveryError> {
        let mut groups = Vec::new();
        for file in self.expand().await? {
            tracing::debug!("Loading targets from: {}", file.display());
            let content =
                tokio::fs::read_to_string(&file)
                    .await
                    .map_err(|source| DiscoveryError::Io {
                        path: file.clone(),
                        source,
                    })?;
            groups.extend(parse_groups_file(&file, &content)?);
        }
        Ok(groups)
    }
}

/// Target groups fetched from an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpDiscovery {
    url: String,
    client: Client,
    timeout: Duration,
}

impl HttpDiscovery {
    pub fn new(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl Discoverer for HttpDiscovery {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn discover(&self) -> Result<Vec<TargetGroup>, DiscoveryError> {
        let http_error = |source: reqwest::Error| {
            if source.is_timeout() {
                DiscoveryError::Timeout(self.timeout)
            } else {
                DiscoveryError::Http {
                    url: self.url.clone(),
                    source,
                }
            }
        };

        let request = async {
            let response = self
                .client
                .get(&self.url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(http_error)?;

            let status = response.status();
            if !status.is_success() {
                return Err(DiscoveryError::Status {
                    url: self.url.clone(),
                    status: status.as_u16(),
                });
            }

            let body = response.text().await.map_err(http_error)?;
            serde_json::from_str::<Vec<TargetGroup>>(&body).map_err(|e| DiscoveryError::Parse {
                source_name: self.url.clone(),
                reason: e.to_string(),
            })
        };

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| DiscoveryError::Timeout(self.timeout))?
    }
}

/// Build the discoverers for a job's configured sources.
pub fn discoverers_for(job: &JobConfig, client: &Client) -> Vec<Box<dyn Discoverer>> {
    let mut discoverers: Vec<Box<dyn Discoverer>> = Vec::new();

    if !job.static_configs.is_empty() {
        discoverers.push(Box::new(StaticDiscovery::new(job.static_configs.clone())));
    }
    for file_sd in &job.file_sd_configs {
        discoverers.push(Box::new(FileDiscovery::new(file_sd.files.clone())));
    }
    for http_sd in &job.http_sd_configs {
        discoverers.push(Box::new(HttpDiscovery::new(&http_sd.url, client.clone())));
    }

    discoverers
}

/// Resolve all sources of a job; any failing source fails the whole job.
pub async fn discover_all(
    discoverers: &[Box<dyn Discoverer>],
) -> Result<Vec<TargetGroup>, DiscoveryError> {
    let mut groups = Vec::new();
    for discoverer in discoverers {
        let found = discoverer.discover().await?;
        tracing::trace!(kind = discoverer.kind(), groups = found.len(), "Discovered");
        groups.extend(found);
    }
    Ok(groups)
}
