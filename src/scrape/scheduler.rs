//! Scrape scheduler: one supervised loop per target.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::labels::{LabelOverlay, LabelSet};
use crate::push::Push;
use crate::target::{RegistryHandle, Target, TargetKey, TargetRegistry};
use crate::telemetry::Telemetry;

use super::exposition::PushBatch;
use super::scraper::Scraper;
use super::types::{LoopInfo, ScrapeError, ScrapeState, TargetHealth};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub started: usize,
    pub retired: usize,
    pub kept: usize,
}

type HealthBoard = Arc<RwLock<HashMap<TargetKey, TargetHealth>>>;

/// Read-only view of per-target health.
#[derive(Clone, Default)]
pub struct HealthView {
    board: HealthBoard,
}

impl HealthView {
    /// Health of one target, if it has a running loop.
    pub fn get(&self, key: &TargetKey) -> Option<TargetHealth> {
        self.board.read().get(key).cloned()
    }

    /// Snapshot of every entry.
    pub fn snapshot(&self) -> HashMap<TargetKey, TargetHealth> {
        self.board.read().clone()
    }
}

impl std::fmt::Debug for HealthView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthView")
            .field("targets", &self.board.read().len())
            .finish()
    }
}

/// Serializes the cycles of successive loops for the same target.
type CycleLock = Arc<tokio::sync::Mutex<()>>;

struct TargetLoop {
    info: LoopInfo,
    target: Arc<Target>,
    retire: CancellationToken,
    abort: AbortHandle,
}

struct Inner {
    scraper: Scraper,
    pusher: Arc<dyn Push>,
    overlay: LabelOverlay,
    telemetry: Telemetry,
    health: HealthBoard,
    /// Touched only by reconciliation and stop; never held across an await.
    loops: Mutex<HashMap<TargetKey, TargetLoop>>,
    /// Outlives a retired loop until its last cycle is done.
    cycle_locks: Mutex<HashMap<TargetKey, CycleLock>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    shutdown_timeout: Duration,
    running: AtomicBool,
}

/// Maintains exactly one scrape loop per registered target.
#[derive(Clone)]
pub struct ScrapeScheduler {
    inner: Arc<Inner>,
}

impl ScrapeScheduler {
    /// Create a scheduler pushing through `pusher`.
    ///
    /// # Errors
    /// Returns `ScrapeError::Client` if the scrape HTTP client cannot be built.
    pub fn new(
        pusher: Arc<dyn Push>,
        overlay: LabelOverlay,
        telemetry: Telemetry,
        shutdown_timeout: Duration,
    ) -> Result<Self, ScrapeError> {
        Ok(Self {
            inner: Arc::new(Inner {
                scraper: Scraper::new()?,
                pusher,
                overlay,
                telemetry,
                health: HealthBoard::default(),
                loops: Mutex::new(HashMap::new()),
                cycle_locks: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                shutdown_timeout,
                running: AtomicBool::new(false),
            }),
        })
    }

    /// Diff the live loops against `registry`.
    ///
    /// New targets get a loop, removed or redefined targets have theirs
    /// retired, unchanged targets keep their loop. No-op after [`stop`](Self::stop).
    pub fn reconcile(&self, registry: &TargetRegistry) -> ReconcileSummary {
        self.inner.reconcile(registry)
    }

    /// Follow registry generations in the background. Calling it twice is a no-op.
    pub fn run(&self, registry: RegistryHandle) {
        if self.inner.shutdown.is_cancelled() || self.inner.running.swap(true, Ordering::SeqCst)
        {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let mut updates = registry.subscribe();
        self.inner.tracker.spawn(async move {
            inner.reconcile(&registry.snapshot());
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        inner.reconcile(&registry.snapshot());
                    }
                }
            }
            tracing::debug!("Scrape reconciliation exited");
        });
        tracing::info!("Scrape scheduler started");
    }

    /// Cancel every loop and wait for them, bounded by the shutdown deadline.
    ///
    /// In-flight scrapes and pushes are aborted. Idempotent.
    pub async fn stop(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        inner.tracker.close();

        let aborts: Vec<AbortHandle> = inner
            .loops
            .lock()
            .drain()
            .map(|(_, target_loop)| target_loop.abort)
            .collect();

        match tokio::time::timeout(inner.shutdown_timeout, inner.tracker.wait()).await {
            Ok(()) => tracing::info!(loops = aborts.len(), "Scrape scheduler stopped"),
            Err(_) => {
                tracing::warn!(
                    remaining = inner.tracker.len(),
                    "Scrape scheduler shutdown timed out, aborting loops"
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }

    /// Loops currently scheduled, ordered by target.
    pub fn active_loops(&self) -> Vec<LoopInfo> {
        let mut loops: Vec<LoopInfo> = self
            .inner
            .loops
            .lock()
            .values()
            .map(|l| l.info.clone())
            .collect();
        loops.sort_by(|a, b| a.key.cmp(&b.key));
        loops
    }

    /// Snapshot of per-target health.
    pub fn health(&self) -> HashMap<TargetKey, TargetHealth> {
        self.inner.health.read().clone()
    }

    /// Shareable read-only health view.
    pub fn health_view(&self) -> HealthView {
        HealthView {
            board: Arc::clone(&self.inner.health),
        }
    }
}

impl std::fmt::Debug for ScrapeScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrapeScheduler")
            .field("loops", &self.inner.loops.lock().len())
            .field("stopped", &self.inner.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn reconcile(self: &Arc<Self>, registry: &TargetRegistry) -> ReconcileSummary {
        if self.shutdown.is_cancelled() {
            return ReconcileSummary::default();
        }

        let mut summary = ReconcileSummary::default();
        let mut loops = self.loops.lock();

        loops.retain(|key, target_loop| {
            let current = registry.get(key);
            if current.is_some_and(|t| **t == *target_loop.target) {
                return true;
            }
            target_loop.retire.cancel();
            if current.is_none() {
                self.health.write().remove(key);
            }
            summary.retired += 1;
            false
        });
        summary.kept = loops.len();

        for target in registry.targets() {
            let key = target.key();
            if !loops.contains_key(&key) {
                let target_loop = self.spawn_loop(Arc::clone(target));
                loops.insert(key, target_loop);
                summary.started += 1;
            }
        }

        if summary.started > 0 || summary.retired > 0 {
            tracing::info!(
                generation = registry.generation(),
                started = summary.started,
                retired = summary.retired,
                kept = summary.kept,
                "Scrape loops reconciled"
            );
        }
        summary
    }

    fn spawn_loop(self: &Arc<Self>, target: Arc<Target>) -> TargetLoop {
        let key = target.key();
        let id = uuid::Uuid::new_v4();
        let retire = self.shutdown.child_token();
        let cycle_lock = Arc::clone(self.cycle_locks.lock().entry(key.clone()).or_default());

        self.health.write().insert(
            key.clone(),
            TargetHealth {
                loop_id: id,
                ..Default::default()
            },
        );

        let handle = self.tracker.spawn(Arc::clone(self).run_loop(
            Arc::clone(&target),
            id,
            retire.clone(),
            cycle_lock,
        ));

        TargetLoop {
            info: LoopInfo {
                id,
                key,
                interval: target.interval,
                started_at: Utc::now(),
            },
            target,
            retire,
            abort: handle.abort_handle(),
        }
    }

    async fn run_loop(
        self: Arc<Self>,
        target: Arc<Target>,
        id: uuid::Uuid,
        retire: CancellationToken,
        cycle_lock: CycleLock,
    ) {
        let key = target.key();
        let labels = target.layered_labels(&self.overlay);

        let mut own_labels = target.intrinsic_labels();
        own_labels.extend(target.job_labels.clone());
        let collisions = self.overlay.collisions(&own_labels);
        if !collisions.is_empty() {
            tracing::warn!(target = %key, labels = ?collisions,
                "Custom labels override labels of the same name");
        }

        tracing::debug!(target = %key, loop_id = %id, interval = ?target.interval, "Scrape loop started");

        let mut ticker = tokio::time::interval(target.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = retire.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // A retired loop for the same target may still be pushing.
            let _cycle = tokio::select! {
                biased;
                _ = retire.cancelled() => break,
                guard = cycle_lock.lock() => guard,
            };
            if !self.run_cycle(&target, &key, id, &labels).await {
                break;
            }
        }

        {
            let mut locks = self.cycle_locks.lock();
            if locks.get(&key).is_some_and(|l| Arc::ptr_eq(l, &cycle_lock) && Arc::strong_count(l) == 2) {
                locks.remove(&key);
            }
        }
        self.update_health(&key, id, |h| h.state = ScrapeState::Cancelled);
        tracing::debug!(target = %key, loop_id = %id, "Scrape loop exited");
    }

    /// One scrape and push. Returns `false` when interrupted by shutdown.
    async fn run_cycle(&self, target: &Target, key: &TargetKey, id: uuid::Uuid, labels: &LabelSet) -> bool {
        self.update_health(key, id, |h| h.state = ScrapeState::Scraping);
        let scraped_at = Utc::now();
        let started = std::time::Instant::now();

        let scraped = tokio::select! {
            _ = self.shutdown.cancelled() => Err(ScrapeError::Cancelled),
            result = self.scraper.scrape(target) => result,
        };

        let output = match scraped {
            Ok(output) => output,
            Err(ScrapeError::Cancelled) => return false,
            Err(e) => {
                let elapsed = started.elapsed();
                self.telemetry.observe_scrape(&target.job, false, elapsed);
                tracing::warn!(target = %key, error = %e, "Scrape failed, skipping push");
                self.update_health(key, id, |h| {
                    h.state = ScrapeState::SkippedOnError;
                    h.last_scrape = Some(scraped_at);
                    h.last_scrape_duration_ms = Some(elapsed.as_millis() as u64);
                    h.last_error = Some(e.to_string());
                    h.last_samples = 0;
                    h.scrapes_failed += 1;
                });
                self.update_health(key, id, |h| h.state = ScrapeState::Idle);
                return true;
            }
        };

        self.telemetry
            .observe_scrape(&target.job, true, output.duration);
        let samples = output.samples;
        let batch = PushBatch::labeled(output.exposition, labels);

        self.update_health(key, id, |h| {
            h.state = ScrapeState::Pushing;
            h.last_scrape = Some(scraped_at);
            h.last_scrape_duration_ms = Some(output.duration.as_millis() as u64);
            h.last_error = None;
            h.last_samples = samples;
            h.scrapes_ok += 1;
        });

        if batch.is_empty() {
            tracing::debug!(target = %key, "Scrape returned no samples, nothing to push");
            self.update_health(key, id, |h| h.state = ScrapeState::Idle);
            return true;
        }

        let pushed = tokio::select! {
            _ = self.shutdown.cancelled() => return false,
            result = self.pusher.push(&target.job, target.instance(), &batch) => result,
        };

        match pushed {
            Ok(report) => {
                self.telemetry
                    .observe_push(&target.job, true, report.attempts);
                tracing::debug!(target = %key, samples, attempts = report.attempts, "Pushed");
                self.update_health(key, id, |h| {
                    h.last_push_attempts = report.attempts;
                    h.pushes_ok += 1;
                });
            }
            Err(e) => {
                self.telemetry
                    .observe_push(&target.job, false, e.attempts());
                tracing::warn!(target = %key, error = %e, attempts = e.attempts(), "Push failed, dropping batch");
                self.update_health(key, id, |h| {
                    h.last_push_attempts = e.attempts();
                    h.last_error = Some(e.to_string());
                    h.pushes_failed += 1;
                });
            }
        }

        self.update_health(key, id, |h| h.state = ScrapeState::Idle);
        true
    }

    /// Apply `f` to the entry owned by loop `id`; stale loops are ignored.
    fn update_health(&self, key: &TargetKey, id: uuid::Uuid, f: impl FnOnce(&mut TargetHealth)) {
        let mut board = self.health.write();
        if let Some(health) = board.get_mut(key).filter(|h| h.loop_id == id) {
            f(health);
        }
    }
}
