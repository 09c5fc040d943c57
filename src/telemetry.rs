//! Operational metrics of the bridge itself.
//!
//! All metrics use the `prompush_` prefix and live in a private registry
//! served on `/metrics`; they are never pushed to the gateway.

use std::sync::Arc;
use std::time::Duration;

use prometheus::{
    CounterVec, HistogramOpts, HistogramVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Outcome label for a successful scrape or push.
pub const OUTCOME_SUCCESS: &str = "success";

/// Outcome label for a failed scrape or push.
pub const OUTCOME_FAILURE: &str = "failure";

/// Process metrics for scraping, pushing and discovery.
#[derive(Clone)]
pub struct Telemetry {
    registry: Arc<Registry>,
    /// Scrapes by job and outcome
    pub scrapes_total: CounterVec,
    /// Scrape latency by job
    pub scrape_duration_seconds: HistogramVec,
    /// Push cycles by job and outcome
    pub pushes_total: CounterVec,
    /// Individual push HTTP attempts by job
    pub push_attempts_total: CounterVec,
    /// Failed discovery resolutions by job
    pub discovery_failures_total: CounterVec,
    /// Known targets by job
    pub targets: IntGaugeVec,
}

impl Telemetry {
    /// Create a telemetry instance with every metric registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let scrapes_total = CounterVec::new(
            Opts::new("prompush_scrapes_total", "Total scrapes by job and outcome"),
            &["job", "outcome"],
        )?;
        registry.register(Box::new(scrapes_total.clone()))?;

        let scrape_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "prompush_scrape_duration_seconds",
                "Scrape request latency in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["job"],
        )?;
        registry.register(Box::new(scrape_duration_seconds.clone()))?;

        let pushes_total = CounterVec::new(
            Opts::new("prompush_pushes_total", "Total pushes by job and outcome"),
            &["job", "outcome"],
        )?;
        registry.register(Box::new(pushes_total.clone()))?;

        let push_attempts_total = CounterVec::new(
            Opts::new(
                "prompush_push_attempts_total",
                "Total push HTTP attempts including retries",
            ),
            &["job"],
        )?;
        registry.register(Box::new(push_attempts_total.clone()))?;

        let discovery_failures_total = CounterVec::new(
            Opts::new(
                "prompush_discovery_failures_total",
                "Total failed target discovery resolutions",
            ),
            &["job"],
        )?;
        registry.register(Box::new(discovery_failures_total.clone()))?;

        let targets = IntGaugeVec::new(
            Opts::new("prompush_targets", "Number of known targets per job"),
            &["job"],
        )?;
        registry.register(Box::new(targets.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            scrapes_total,
            scrape_duration_seconds,
            pushes_total,
            push_attempts_total,
            discovery_failures_total,
            targets,
        })
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    /// Record one scrape.
    pub fn observe_scrape(&self, job: &str, ok: bool, duration: Duration) {
        self.scrapes_total
            .with_label_values(&[job, outcome(ok)])
            .inc();
        self.scrape_duration_seconds
            .with_label_values(&[job])
            .observe(duration.as_secs_f64());
    }

    /// Record one push cycle and the HTTP attempts it took.
    pub fn observe_push(&self, job: &str, ok: bool, attempts: u32) {
        self.pushes_total.with_label_values(&[job, outcome(ok)]).inc();
        self.push_attempts_total
            .with_label_values(&[job])
            .inc_by(f64::from(attempts));
    }

    /// Increment the discovery failure counter.
    pub fn inc_discovery_failures(&self, job: &str) {
        self.discovery_failures_total
            .with_label_values(&[job])
            .inc();
    }

    /// Replace the per-job target gauges.
    pub fn set_targets<'a>(&self, counts: impl IntoIterator<Item = (&'a str, usize)>) {
        self.targets.reset();
        for (job, count) in counts {
            self.targets
                .with_label_values(&[job])
                .set(i64::try_from(count).unwrap_or(i64::MAX));
        }
    }
}

fn outcome(ok: bool) -> &'static str {
    if ok { OUTCOME_SUCCESS } else { OUTCOME_FAILURE }
}
