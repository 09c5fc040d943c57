//! Push trait and error types.

use thiserror::Error;

use crate::scrape::PushBatch;

/// Errors that can occur while pushing a batch.
#[derive(Debug, Error)]
pub enum PushError {
    /// Gateway refused the payload (4xx); not retried.
    #[error("gateway rejected push with status {status} after {attempts} attempt(s): {body}")]
    Rejected {
        status: u16,
        body: String,
        attempts: u32,
    },

    /// Every attempt failed with a transient error.
    #[error("push failed after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// Push URL could not be built.
    #[error("invalid push url: {0}")]
    InvalidUrl(String),

    /// HTTP client could not be built.
    #[error("client error: {0}")]
    Client(String),
}

impl PushError {
    /// Number of HTTP attempts made before failing.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Rejected { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
            Self::InvalidUrl(_) | Self::Client(_) => 0,
        }
    }
}

/// Outcome of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushReport {
    /// HTTP attempts made, including the successful one.
    pub attempts: u32,
}

/// Destination for labeled scrape batches.
#[async_trait::async_trait]
pub trait Push: Send + Sync + 'static {
    /// Push one batch under the `job`/`instance` grouping key.
    async fn push(
        &self,
        job: &str,
        instance: &str,
        batch: &PushBatch,
    ) -> Result<PushReport, PushError>;
}
