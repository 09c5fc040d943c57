//! Process hosting: log format and OS signal handling.
//!
//! The same [`Pipeline`](crate::pipeline::Pipeline) runs in both modes; the
//! mode only decides how logs are written.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Log filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info,prompush=debug";

/// How the process is hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleMode {
    /// Interactive: human-readable logs.
    #[default]
    Foreground,
    /// Managed by a service supervisor: JSON logs without colors.
    Service,
}

impl LifecycleMode {
    /// Select the mode from the `--service` flag.
    pub fn from_service_flag(service: bool) -> Self {
        if service { Self::Service } else { Self::Foreground }
    }

    /// Install the global tracing subscriber for this mode.
    pub fn init_tracing(self) -> Result<(), TryInitError> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
        let registry = tracing_subscriber::registry().with(filter);

        match self {
            Self::Foreground => registry.with(tracing_subscriber::fmt::layer()).try_init(),
            Self::Service => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_ansi(false)
                        .with_current_span(false),
                )
                .try_init(),
        }
    }
}

/// What the host asked the process to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Re-read the configuration file (SIGHUP).
    Reload,
    /// Stop gracefully (SIGINT, SIGTERM).
    Shutdown,
}

/// Listens for shutdown and reload signals.
#[derive(Debug)]
pub struct SignalListener {
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
}

impl SignalListener {
    /// Register the signal handlers.
    #[cfg(unix)]
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Register the signal handlers.
    #[cfg(not(unix))]
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next signal.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> LifecycleSignal {
        tokio::select! {
            _ = self.hangup.recv() => {
                tracing::info!("Received hangup signal");
                LifecycleSignal::Reload
            }
            _ = self.terminate.recv() => {
                tracing::info!("Received terminate signal");
                LifecycleSignal::Shutdown
            }
            _ = self.interrupt.recv() => {
                tracing::info!("Received Ctrl+C signal");
                LifecycleSignal::Shutdown
            }
        }
    }

    /// Wait for the next signal.
    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> LifecycleSignal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
        }
        tracing::info!("Received Ctrl+C signal");
        LifecycleSignal::Shutdown
    }
}
