//! Scrape Layer
//!
//! Periodically fetches metrics from every registered target, stamps the
//! target, job and custom labels onto each sample and hands the batch to a
//! [`Push`](crate::push::Push) destination.
//!
//! # Architecture
//!
//! - [`exposition`]: Text format parser and encoder
//! - [`Scraper`]: One HTTP scrape of one target
//! - [`ScrapeScheduler`]: Supervised set of per-target loops, reconciled
//!   against each registry generation

pub mod exposition;
mod scheduler;
mod scraper;
mod types;

pub use exposition::{Exposition, ExpositionError, PushBatch};
pub use scheduler::{HealthView, ReconcileSummary, ScrapeScheduler};
pub use scraper::{SCRAPE_ACCEPT, SCRAPE_TIMEOUT_HEADER, ScrapeOutput, Scraper};
pub use types::{LoopInfo, ScrapeError, ScrapeState, TargetHealth};
