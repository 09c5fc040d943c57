//! Scrape errors, loop state and per-target health.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::target::TargetKey;

use super::exposition::ExpositionError;

/// Errors that can occur during a single scrape.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Timeout elapsed.
    #[error("scrape timed out after {0:?}")]
    Timeout(Duration),

    /// Target answered with a non-success status.
    #[error("target returned status {status}")]
    Status { status: u16 },

    /// Response body is not valid text exposition.
    #[error("invalid exposition: {0}")]
    Parse(#[from] ExpositionError),

    /// Loop was retired or shut down mid-scrape.
    #[error("scrape cancelled")]
    Cancelled,

    /// HTTP client could not be built.
    #[error("client error: {0}")]
    Client(String),
}

/// Where a target loop currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeState {
    #[default]
    Idle,
    Scraping,
    Pushing,
    SkippedOnError,
    Cancelled,
}

/// Scrape and push health of one target, written only by its own loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TargetHealth {
    #[serde(skip)]
    pub(crate) loop_id: uuid::Uuid,
    pub state: ScrapeState,
    pub last_scrape: Option<DateTime<Utc>>,
    pub last_scrape_duration_ms: Option<u64>,
    pub last_error: Option<String>,
    pub last_samples: usize,
    pub last_push_attempts: u32,
    pub scrapes_ok: u64,
    pub scrapes_failed: u64,
    pub pushes_ok: u64,
    pub pushes_failed: u64,
}

/// Identity and schedule of a running target loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopInfo {
    /// Stable while the target definition is unchanged.
    pub id: uuid::Uuid,
    pub key: TargetKey,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub started_at: DateTime<Utc>,
}
