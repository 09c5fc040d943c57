//! Target Layer
//!
//! Turns scrape job configuration into a live, queryable set of targets.
//!
//! # Architecture
//!
//! - [`TargetRegistry`]: Immutable snapshot of targets grouped by job
//! - [`Discoverer`]: Pluggable target sources (static, file, HTTP)
//! - [`TargetManager`]: Applies configuration, refreshes discovery and
//!   publishes new snapshots atomically
//!
//! # Example
//!
//! ```rust,no_run
//! use prompush::{AppConfig, JobConfig, TargetManager, Telemetry};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = TargetManager::new(Telemetry::new()?, Duration::from_secs(5))?;
//! let config = AppConfig {
//!     scrape_configs: vec![JobConfig::new("node").with_static_targets(["localhost:9100"])],
//!     ..Default::default()
//! };
//! manager.apply_config(&config).await;
//! manager.run();
//! assert_eq!(manager.targets().len(), 1);
//! # Ok(())
//! # }
//! ```

mod discovery;
mod manager;
mod types;

pub use discovery::{
    DEFAULT_DISCOVERY_TIMEOUT, Discoverer, DiscoveryError, FileDiscovery, HttpDiscovery,
    StaticDiscovery, discover_all, discoverers_for, parse_groups_file,
};
pub use manager::{ApplySummary, RegistryHandle, TargetManager};
pub use types::{
    INSTANCE_LABEL, JOB_LABEL, JobSpec, Target, TargetGroup, TargetKey, TargetRegistry,
    resolve_targets,
};
