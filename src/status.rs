//! Read-only status surface over the target registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::labels::LabelSet;
use crate::scrape::{HealthView, TargetHealth};
use crate::target::{RegistryHandle, Target, TargetRegistry};

/// One target as reported by `/targets`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetStatus {
    pub address: String,
    pub scrape_url: String,
    /// Target and job labels (custom labels are added at push time).
    pub labels: LabelSet,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<TargetHealth>,
}

impl TargetStatus {
    fn new(target: &Target, health: Option<TargetHealth>) -> Self {
        let mut labels = target.intrinsic_labels();
        labels.extend(target.job_labels.clone());
        Self {
            address: target.address.clone(),
            scrape_url: target.scrape_url(),
            labels,
            interval: target.interval,
            timeout: target.timeout,
            health,
        }
    }
}

/// Job name to target list, serialized as a plain JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TargetsReport {
    pub jobs: BTreeMap<String, Vec<TargetStatus>>,
}

/// Builds status views; has no way to change what it reports on.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    registry: RegistryHandle,
    health: Option<HealthView>,
}

impl StatusReporter {
    pub fn new(registry: RegistryHandle) -> Self {
        Self {
            registry,
            health: None,
        }
    }

    /// Include per-target scrape health in reports.
    pub fn with_health(mut self, health: HealthView) -> Self {
        self.health = Some(health);
        self
    }

    /// Current registry snapshot.
    pub fn targets(&self) -> Arc<TargetRegistry> {
        self.registry.snapshot()
    }

    /// Serializable view of the current snapshot.
    pub fn report(&self) -> TargetsReport {
        let registry = self.targets();
        let jobs = registry
            .jobs()
            .map(|(job, targets)| {
                let statuses = targets
                    .iter()
                    .map(|t| {
                        let health = self.health.as_ref().and_then(|h| h.get(&t.key()));
                        TargetStatus::new(t, health)
                    })
                    .collect();
                (job.to_string(), statuses)
            })
            .collect();
        TargetsReport { jobs }
    }
}
