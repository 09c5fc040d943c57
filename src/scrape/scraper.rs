//! HTTP scraping of a single target.

use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::time::timeout;

use crate::target::Target;

use super::exposition::{self, Exposition};
use super::types::ScrapeError;

/// Accept header advertising the text exposition format.
pub const SCRAPE_ACCEPT: &str = "text/plain;version=0.0.4;q=1,*/*;q=0.1";

/// Header telling the target how long the scraper will wait.
pub const SCRAPE_TIMEOUT_HEADER: &str = "X-Prometheus-Scrape-Timeout-Seconds";

/// Result of one successful scrape.
#[derive(Debug)]
pub struct ScrapeOutput {
    pub exposition: Exposition,
    pub duration: Duration,
    pub samples: usize,
}

/// Fetches and parses metrics from targets.
#[derive(Debug, Clone)]
pub struct Scraper {
    client: Client,
}

impl Scraper {
    /// Create a scraper with its own HTTP client.
    ///
    /// # Errors
    /// Returns `ScrapeError::Client` if the HTTP client cannot be built.
    pub fn new() -> Result<Self, ScrapeError> {
        let client = Client::builder()
            .user_agent(concat!("prompush/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ScrapeError::Client(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Scrape `target` once, bounded by its timeout.
    pub async fn scrape(&self, target: &Target) -> Result<ScrapeOutput, ScrapeError> {
        let scrape_timeout = target.timeout;
        let started = Instant::now();

        let request = self
            .client
            .get(target.scrape_url())
            .header(reqwest::header::ACCEPT, SCRAPE_ACCEPT)
            .header(
                SCRAPE_TIMEOUT_HEADER,
                format!("{:.3}", scrape_timeout.as_secs_f64()),
            );

        let body = timeout(scrape_timeout, async {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ScrapeError::Status {
                    status: status.as_u16(),
                });
            }
            Ok::<_, ScrapeError>(response.text().await?)
        })
        .await
        .map_err(|_| ScrapeError::Timeout(scrape_timeout))??;

        let exposition = exposition::parse(&body)?;
        let samples = exposition.sample_count();

        Ok(ScrapeOutput {
            exposition,
            duration: started.elapsed(),
            samples,
        })
    }
}
