//! Target manager: owns the registry and keeps it current.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::telemetry::Telemetry;

use super::discovery::{Discoverer, DiscoveryError, discover_all, discoverers_for};
use super::types::{JobSpec, Target, TargetRegistry, resolve_targets};

/// Result of applying a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    /// Number of configured jobs.
    pub jobs: usize,
    /// Number of targets in the resulting registry.
    pub targets: usize,
    /// Jobs whose discovery failed during this apply.
    pub failed_jobs: usize,
    /// Whether a new registry generation was published.
    pub changed: bool,
}

/// Read-only access to the live registry.
#[derive(Clone)]
pub struct RegistryHandle {
    registry: Arc<ArcSwap<TargetRegistry>>,
    updates: watch::Receiver<u64>,
}

impl RegistryHandle {
    /// Current point-in-time snapshot.
    pub fn snapshot(&self) -> Arc<TargetRegistry> {
        self.registry.load_full()
    }

    /// Receiver observing published generations.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.updates.clone()
    }
}

impl std::fmt::Debug for RegistryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryHandle")
            .field("generation", &self.registry.load().generation())
            .finish_non_exhaustive()
    }
}

struct JobEntry {
    spec: JobSpec,
    discoverers: Vec<Box<dyn Discoverer>>,
    next_refresh: Option<Instant>,
}

impl JobEntry {
    fn schedule_next(&mut self) {
        self.next_refresh = self.spec.refresh_interval.map(|every| Instant::now() + every);
    }
}

struct Shared {
    registry: Arc<ArcSwap<TargetRegistry>>,
    /// Writer lock: apply and refresh are serialized; readers never take it.
    jobs: tokio::sync::Mutex<Vec<JobEntry>>,
    updates: watch::Sender<u64>,
    config_changed: Notify,
    client: Client,
    telemetry: Telemetry,
}

/// Owns the target registry's lifecycle.
///
/// Applies configuration, re-resolves discovery-based jobs on their refresh
/// interval and publishes every change as a new immutable snapshot.
pub struct TargetManager {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl TargetManager {
    /// Create a manager with an empty registry (generation 0).
    pub fn new(telemetry: Telemetry, shutdown_timeout: Duration) -> Result<Self, DiscoveryError> {
        let client = Client::builder()
            .build()
            .map_err(|e| DiscoveryError::Client(e.to_string()))?;
        let (updates, _) = watch::channel(0);

        Ok(Self {
            shared: Arc::new(Shared {
                registry: Arc::new(ArcSwap::from_pointee(TargetRegistry::default())),
                jobs: tokio::sync::Mutex::new(Vec::new()),
                updates,
                config_changed: Notify::new(),
                client,
                telemetry,
            }),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            shutdown_timeout,
        })
    }

    /// Resolve every job of `config` and atomically replace the registry.
    ///
    /// Jobs whose discovery fails keep their previous targets; jobs no longer
    /// configured are dropped.
    pub async fn apply_config(&self, config: &AppConfig) -> ApplySummary {
        self.shared.apply(config).await
    }

    /// Start the background reconciliation task. Calling it twice is a no-op.
    pub fn run(&self) {
        let mut task = self.task.lock();
        if task.is_some() || self.cancel.is_cancelled() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(async move { shared.reconcile(cancel).await }));
        tracing::info!("Target manager started");
    }

    /// Stop reconciliation, waiting at most the shutdown deadline.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let Some(mut handle) = self.task.lock().take() else {
            return;
        };

        match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
            Ok(Ok(())) => tracing::info!("Target manager stopped"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Target manager task failed"),
            Err(_) => {
                tracing::warn!("Target manager shutdown timed out");
                handle.abort();
            }
        }
    }

    /// Current point-in-time snapshot.
    pub fn targets(&self) -> Arc<TargetRegistry> {
        self.shared.registry.load_full()
    }

    /// Receiver observing published generations.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.updates.subscribe()
    }

    /// Read-only handle for consumers.
    pub fn registry(&self) -> RegistryHandle {
        RegistryHandle {
            registry: Arc::clone(&self.shared.registry),
            updates: self.shared.updates.subscribe(),
        }
    }
}

impl std::fmt::Debug for TargetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetManager")
            .field("generation", &self.shared.registry.load().generation())
            .field("running", &self.task.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl Shared {
    async fn apply(&self, config: &AppConfig) -> ApplySummary {
        let mut jobs = self.jobs.lock().await;
        let previous = self.registry.load_full();

        let mut entries = Vec::with_capacity(config.scrape_configs.len());
        let mut resolved = BTreeMap::new();
        let mut failed_jobs = 0;

        for job in &config.scrape_configs {
            let spec = JobSpec::from_config(job, &config.global);
            let discoverers = discoverers_for(job, &self.client);

            let targets = match discover_all(&discoverers).await {
                Ok(groups) => resolve_targets(&spec, &groups),
                Err(e) => {
                    failed_jobs += 1;
                    self.discovery_failed(&spec.name, &e);
                    carry_over(&spec, previous.job(&spec.name))
                }
            };
            resolved.insert(spec.name.clone(), targets);

            let mut entry = JobEntry {
                spec,
                discoverers,
                next_refresh: None,
            };
            entry.schedule_next();
            entries.push(entry);
        }

        let changed = self.publish(resolved);
        *jobs = entries;
        self.config_changed.notify_one();

        let registry = self.registry.load();
        let summary = ApplySummary {
            jobs: config.scrape_configs.len(),
            targets: registry.len(),
            failed_jobs,
            changed,
        };
        tracing::info!(
            jobs = summary.jobs,
            targets = summary.targets,
            failed_jobs,
            generation = registry.generation(),
            "Configuration applied"
        );
        summary
    }

    async fn reconcile(&self, cancel: CancellationToken) {
        loop {
            let wake_at = self.next_wake().await;
            let sleep = async {
                match wake_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.config_changed.notified() => continue,
                _ = sleep => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.refresh_due() => {}
                    }
                }
            }
        }
        tracing::debug!("Target reconciliation exited");
    }

    async fn next_wake(&self) -> Option<Instant> {
        self.jobs
            .lock()
            .await
            .iter()
            .filter_map(|entry| entry.next_refresh)
            .min()
    }

    /// Re-resolve the jobs whose refresh interval elapsed.
    async fn refresh_due(&self) {
        let mut jobs = self.jobs.lock().await;
        let now = Instant::now();
        let mut resolved = TargetRegistry::clone(&self.registry.load_full()).into_jobs();
        let mut refreshed = 0usize;

        for entry in jobs.iter_mut() {
            if !entry.next_refresh.is_some_and(|due| due <= now) {
                continue;
            }
            refreshed += 1;

            match discover_all(&entry.discoverers).await {
                Ok(groups) => {
                    resolved.insert(entry.spec.name.clone(), resolve_targets(&entry.spec, &groups));
                }
                Err(e) => self.discovery_failed(&entry.spec.name, &e),
            }
            entry.schedule_next();
        }

        if refreshed > 0 && self.publish(resolved) {
            tracing::debug!(jobs = refreshed, "Discovery refresh changed targets");
        }
    }

    /// Install a new snapshot if the contents differ. Returns whether it did.
    fn publish(&self, jobs: BTreeMap<String, Vec<Arc<Target>>>) -> bool {
        let current = self.registry.load_full();
        let candidate = TargetRegistry::new(current.generation(), jobs);
        if current.same_contents(&candidate) {
            return false;
        }

        let generation = current.generation() + 1;
        let next = Arc::new(TargetRegistry::new(generation, candidate.into_jobs()));
        self.telemetry
            .set_targets(next.jobs().map(|(job, targets)| (job, targets.len())));
        self.registry.store(next);
        self.updates.send_replace(generation);
        true
    }

    fn discovery_failed(&self, job: &str, error: &DiscoveryError) {
        tracing::warn!(job = %job, error = %error, "Discovery failed, keeping previous targets");
        self.telemetry.inc_discovery_failures(job);
    }
}

/// Rebase a job's last-known-good targets onto its current definition.
fn carry_over(spec: &JobSpec, previous: Option<&[Arc<Target>]>) -> Vec<Arc<Target>> {
    previous
        .unwrap_or_default()
        .iter()
        .map(|t| Arc::new(Target::new(spec, &t.address, t.discovered_labels.clone())))
        .collect()
}
