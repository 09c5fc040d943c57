//! Core target types: jobs, targets, and the registry snapshot.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{GlobalConfig, JobConfig, Scheme, validate_address, validate_label_name};
use crate::labels::{LabelOverlay, LabelSet};

/// Label carrying the job name.
pub const JOB_LABEL: &str = "job";

/// Label carrying the target address.
pub const INSTANCE_LABEL: &str = "instance";

/// A group of addresses sharing labels.
///
/// Same shape for `static_configs` entries and for file/HTTP discovery payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    /// Addresses in `host:port` form.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Labels attached to every address in the group.
    #[serde(default)]
    pub labels: LabelSet,
}

/// Target identity: job name plus endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TargetKey {
    pub job: String,
    pub address: String,
}

impl TargetKey {
    pub fn new(job: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            address: address.into(),
        }
    }
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.job, self.address)
    }
}

/// Resolved job parameters with global defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub metrics_path: String,
    pub scheme: Scheme,
    pub labels: LabelSet,
    /// Re-resolution interval; `None` for purely static jobs.
    pub refresh_interval: Option<Duration>,
}

impl JobSpec {
    /// Resolve a job config against the global defaults.
    pub fn from_config(job: &JobConfig, global: &GlobalConfig) -> Self {
        Self {
            name: job.job_name.clone(),
            interval: job.effective_interval(global),
            timeout: job.effective_timeout(global),
            metrics_path: job.metrics_path.clone(),
            scheme: job.scheme,
            labels: job.labels.clone(),
            refresh_interval: job.refresh_interval(),
        }
    }
}

/// One scrapeable endpoint belonging to exactly one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Owning job name.
    pub job: String,
    /// Endpoint address (`host:port`).
    pub address: String,
    pub scheme: Scheme,
    pub metrics_path: String,
    pub interval: Duration,
    pub timeout: Duration,
    /// Labels attached by the discovery group this target came from.
    pub discovered_labels: LabelSet,
    /// Labels configured on the job.
    pub job_labels: LabelSet,
}

impl Target {
    /// Build a target for `address` under `job`.
    pub fn new(job: &JobSpec, address: impl Into<String>, discovered_labels: LabelSet) -> Self {
        Self {
            job: job.name.clone(),
            address: address.into(),
            scheme: job.scheme,
            metrics_path: job.metrics_path.clone(),
            interval: job.interval,
            timeout: job.timeout,
            discovered_labels,
            job_labels: job.labels.clone(),
        }
    }

    /// Target identity.
    pub fn key(&self) -> TargetKey {
        TargetKey::new(&self.job, &self.address)
    }

    /// Value used for the `instance` grouping label.
    pub fn instance(&self) -> &str {
        &self.address
    }

    /// Full scrape URL.
    pub fn scrape_url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.address, self.metrics_path)
    }

    /// Discovery labels plus the identifying `job` and `instance` labels.
    pub fn intrinsic_labels(&self) -> LabelSet {
        let mut labels = self.discovered_labels.clone();
        labels.insert(JOB_LABEL.to_string(), self.job.clone());
        labels.insert(INSTANCE_LABEL.to_string(), self.address.clone());
        labels
    }

    /// Labels stamped onto every sample scraped from this target.
    ///
    /// Precedence, lowest to highest: intrinsic labels, job labels, overlay.
    /// The overlay overrides anything of the same name.
    pub fn layered_labels(&self, overlay: &LabelOverlay) -> LabelSet {
        let mut labels = self.intrinsic_labels();
        labels.extend(self.job_labels.clone());
        overlay.apply(&mut labels);
        labels
    }
}

/// Build the de-duplicated target list of one job from its discovered groups.
///
/// Invalid addresses and label names are skipped with a warning; the first
/// occurrence of an address wins.
pub fn resolve_targets(job: &JobSpec, groups: &[TargetGroup]) -> Vec<Arc<Target>> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for group in groups {
        let labels: LabelSet = group
            .labels
            .iter()
            .filter(|(name, _)| match validate_label_name(name) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(job = %job.name, error = %e, "Dropping discovered label");
                    false
                }
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for address in &group.targets {
            let address = address.trim();
            if let Err(e) = validate_address(address) {
                tracing::warn!(job = %job.name, error = %e, "Skipping invalid target");
                continue;
            }
            if !seen.insert(address.to_string()) {
                continue;
            }
            targets.push(Arc::new(Target::new(job, address, labels.clone())));
        }
    }

    targets
}

/// Immutable snapshot of all targets grouped by job.
///
/// Replaced wholesale on every update; readers holding an `Arc` to one
/// snapshot never see a later change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetRegistry {
    generation: u64,
    jobs: BTreeMap<String, Vec<Arc<Target>>>,
}

impl TargetRegistry {
    /// Create a snapshot.
    ///
    /// Targets filed under a job name they do not belong to are dropped.
    pub fn new(generation: u64, mut jobs: BTreeMap<String, Vec<Arc<Target>>>) -> Self {
        for (name, targets) in jobs.iter_mut() {
            targets.retain(|t| &t.job == name);
        }
        Self { generation, jobs }
    }

    /// Snapshot version; bumped on every published change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Job names in order.
    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    /// Targets of one job.
    pub fn job(&self, name: &str) -> Option<&[Arc<Target>]> {
        self.jobs.get(name).map(Vec::as_slice)
    }

    /// Iterate over `(job, targets)`.
    pub fn jobs(&self) -> impl Iterator<Item = (&str, &[Arc<Target>])> {
        self.jobs.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Iterate over every target of every job.
    pub fn targets(&self) -> impl Iterator<Item = &Arc<Target>> {
        self.jobs.values().flatten()
    }

    /// Look up a target by identity.
    pub fn get(&self, key: &TargetKey) -> Option<&Arc<Target>> {
        self.jobs
            .get(&key.job)?
            .iter()
            .find(|t| t.address == key.address)
    }

    /// Total number of targets.
    pub fn len(&self) -> usize {
        self.jobs.values().map(Vec::len).sum()
    }

    /// Whether there are no targets at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether two snapshots hold the same jobs and targets.
    pub fn same_contents(&self, other: &TargetRegistry) -> bool {
        self.jobs == other.jobs
    }

    pub(crate) fn into_jobs(self) -> BTreeMap<String, Vec<Arc<Target>>> {
        self.jobs
    }
}
