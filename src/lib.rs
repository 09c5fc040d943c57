//! prompush - Prometheus scrape-and-push bridge
//!
//! Scrapes Prometheus exposition endpoints on a schedule and forwards every
//! sample to a Prometheus Pushgateway, tagged with the target's labels and a
//! fixed set of custom labels. It can be used as a library, or run as the
//! standalone `prompush` binary.
//!
//! # Architecture
//!
//! - **Target**: Job configuration and discovery resolved into an atomically
//!   swapped registry of targets
//! - **Scrape**: One supervised loop per target, exposition text codec
//! - **Push**: Pushgateway client with bounded retry
//! - **Status**: `/targets`, `/healthz` and own `/metrics` over HTTP
//! - **Pipeline / Lifecycle**: Single wiring of the above, hosted in the
//!   foreground or under a service supervisor
//!
//! # Example
//!
//! ```rust,no_run
//! use prompush::{AppConfig, LabelOverlay, Pipeline, Settings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load("prometheus_pusher.yml")?;
//! let overlay = LabelOverlay::parse("env,region", "prod,eu-west-1")?;
//! let settings = Settings::from_config(&config, overlay)?;
//!
//! let pipeline = Pipeline::start(settings, &config).await?;
//! pipeline.serve_status().await?;
//! // ...
//! pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod labels;
pub mod lifecycle;
pub mod pipeline;
pub mod push;
pub mod scrape;
pub mod server;
pub mod status;
pub mod target;
pub mod telemetry;

pub use config::{AppConfig, ConfigError, JobConfig, Settings};
pub use labels::{LabelOverlay, LabelSet};
pub use lifecycle::{LifecycleMode, LifecycleSignal, SignalListener};
pub use pipeline::{Pipeline, PipelineError};
pub use push::{GatewayPusher, Push, PushError, PushMethod, RetryPolicy};
pub use scrape::{ScrapeError, ScrapeScheduler, Scraper};
pub use status::{StatusReporter, TargetsReport};
pub use target::{Target, TargetKey, TargetManager, TargetRegistry};
pub use telemetry::Telemetry;
