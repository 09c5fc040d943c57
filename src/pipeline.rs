//! The running bridge: target manager, scrape scheduler, pusher and status
//! server wired together once.
//!
//! Every lifecycle mode drives the same [`Pipeline`]; only how it is started
//! and which signals stop or reload it differ.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, ConfigError, Settings};
use crate::push::{GatewayPusher, Push, PushError};
use crate::scrape::{ScrapeError, ScrapeScheduler};
use crate::server::{self, AppState, ServerError};
use crate::status::StatusReporter;
use crate::target::{ApplySummary, DiscoveryError, TargetManager};
use crate::telemetry::Telemetry;

/// Errors raised while assembling or serving the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error(transparent)]
    Push(#[from] PushError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("telemetry registry error: {0}")]
    Telemetry(#[from] prometheus::Error),

    /// `serve_status` was called while a server is already running.
    #[error("status server already running on {0}")]
    AlreadyServing(SocketAddr),
}

struct ServerTask {
    addr: SocketAddr,
    handle: JoinHandle<Result<(), ServerError>>,
}

/// Scrape-and-push pipeline.
pub struct Pipeline {
    settings: Arc<Settings>,
    telemetry: Telemetry,
    manager: TargetManager,
    scheduler: ScrapeScheduler,
    server_shutdown: CancellationToken,
    server: Mutex<Option<ServerTask>>,
}

impl Pipeline {
    /// Build the pipeline pushing to the configured Pushgateway and start
    /// scraping the targets of `config`.
    pub async fn start(settings: Settings, config: &AppConfig) -> Result<Self, PipelineError> {
        let pusher = GatewayPusher::new(&settings)?;
        Self::start_with_pusher(settings, config, Arc::new(pusher)).await
    }

    /// Like [`start`](Self::start) with a caller-supplied push destination.
    pub async fn start_with_pusher(
        settings: Settings,
        config: &AppConfig,
        pusher: Arc<dyn Push>,
    ) -> Result<Self, PipelineError> {
        let settings = Arc::new(settings);
        let telemetry = Telemetry::new()?;

        let manager = TargetManager::new(telemetry.clone(), settings.shutdown_timeout)?;
        let scheduler = ScrapeScheduler::new(
            pusher,
            settings.overlay.clone(),
            telemetry.clone(),
            settings.shutdown_timeout,
        )?;

        let summary = manager.apply_config(config).await;
        tracing::info!(
            jobs = summary.jobs,
            targets = summary.targets,
            failed_jobs = summary.failed_jobs,
            gateway = %settings.gateway_url,
            overlay = %settings.overlay,
            "Pipeline starting"
        );

        manager.run();
        scheduler.run(manager.registry());

        Ok(Self {
            settings,
            telemetry,
            manager,
            scheduler,
            server_shutdown: CancellationToken::new(),
            server: Mutex::new(None),
        })
    }

    /// Bind the status server on the configured address and serve it in the
    /// background.
    pub async fn serve_status(&self) -> Result<SocketAddr, PipelineError> {
        let listener = server::bind(&self.settings.server.bind, self.settings.server.port).await?;
        self.serve_status_on(listener)
    }

    /// Serve the status server on an already bound listener.
    pub fn serve_status_on(&self, listener: TcpListener) -> Result<SocketAddr, PipelineError> {
        let mut slot = self.server.lock();
        if let Some(task) = slot.as_ref() {
            return Err(PipelineError::AlreadyServing(task.addr));
        }

        let addr = listener.local_addr().map_err(ServerError::Serve)?;
        let router = server::create_router(AppState {
            status: self.status(),
            telemetry: self.telemetry.clone(),
        });
        let handle = tokio::spawn(server::serve(
            listener,
            router,
            self.server_shutdown.child_token(),
        ));
        *slot = Some(ServerTask { addr, handle });
        Ok(addr)
    }

    /// Apply a new set of jobs. Gateway, server and overlay settings are fixed
    /// at startup; changes to them are ignored with a warning.
    pub async fn reload(&self, config: &AppConfig) -> ApplySummary {
        let gateway_changed = config
            .gateway
            .endpoint()
            .map(|url| url != self.settings.gateway_url)
            .unwrap_or(true);
        if gateway_changed || config.server != self.settings.server {
            tracing::warn!("Gateway and server settings only take effect after a restart");
        }

        let summary = self.manager.apply_config(config).await;
        tracing::info!(
            jobs = summary.jobs,
            targets = summary.targets,
            changed = summary.changed,
            "Configuration reloaded"
        );
        summary
    }

    /// Re-read and re-validate `path`, then [`reload`](Self::reload).
    ///
    /// An unreadable or invalid file leaves the running targets untouched.
    pub async fn reload_from(&self, path: impl AsRef<Path>) -> Result<ApplySummary, ConfigError> {
        let path = path.as_ref();
        match AppConfig::load(path) {
            Ok(config) => Ok(self.reload(&config).await),
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "Reload rejected, keeping current targets"
                );
                Err(e)
            }
        }
    }

    /// Read-only status view including per-target health.
    pub fn status(&self) -> StatusReporter {
        StatusReporter::new(self.manager.registry()).with_health(self.scheduler.health_view())
    }

    /// Startup settings.
    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Own operational metrics.
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn manager(&self) -> &TargetManager {
        &self.manager
    }

    pub fn scheduler(&self) -> &ScrapeScheduler {
        &self.scheduler
    }

    /// Stop scrape loops, then discovery, then the status server. Idempotent.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.manager.stop().await;

        self.server_shutdown.cancel();
        let task = self.server.lock().take();
        if let Some(task) = task {
            match tokio::time::timeout(self.settings.shutdown_timeout, task.handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => tracing::error!(error = %e, "Status server failed"),
                Ok(Err(e)) => tracing::error!(error = %e, "Status server task failed"),
                Err(_) => tracing::warn!("Status server shutdown timed out"),
            }
        }
        tracing::info!("Pipeline stopped");
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("settings", &self.settings)
            .field("manager", &self.manager)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
