//! prompush Binary Entry Point
//!
//! Scrapes the configured targets and pushes their samples to a Pushgateway
//! until interrupted. SIGHUP re-reads the configuration file.

use std::path::PathBuf;

use clap::Parser;
use prompush::{
    AppConfig, ConfigError, LabelOverlay, Pipeline, Settings,
    lifecycle::{LifecycleMode, LifecycleSignal, SignalListener},
};

/// prompush - Prometheus to Pushgateway bridge
#[derive(Parser, Debug)]
#[command(name = "prompush", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        long = "config.file",
        default_value = "prometheus_pusher.yml",
        env = "PROMPUSH_CONFIG"
    )]
    config_file: PathBuf,

    /// Comma-separated custom label names added to every pushed sample
    #[arg(long = "config.customLabels", default_value = "")]
    custom_labels: String,

    /// Comma-separated custom label values, one per name
    #[arg(long = "config.customLabelValues", default_value = "")]
    custom_label_values: String,

    /// Status server port (overrides config file)
    #[arg(long, env = "PROMPUSH_PORT")]
    port: Option<u16>,

    /// Pushgateway URL (overrides config file)
    #[arg(long = "pgUrl", env = "PROMPUSH_GATEWAY_URL")]
    pg_url: Option<String>,

    /// Run under a service manager (JSON logs)
    #[arg(long)]
    service: bool,
}

impl Cli {
    /// Load the config file and apply CLI/env overrides (CLI > ENV > config file).
    fn load_config(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::load(&self.config_file)?;
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = &self.pg_url {
            config.gateway.url = url.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mode = LifecycleMode::from_service_flag(cli.service);
    mode.init_tracing()?;

    tracing::info!(mode = ?mode, "prompush - Prometheus to Pushgateway bridge");

    tracing::info!("Loading configuration from: {}", cli.config_file.display());
    let config = cli.load_config()?;
    let overlay = LabelOverlay::parse(&cli.custom_labels, &cli.custom_label_values)?;
    let settings = Settings::from_config(&config, overlay)?;

    tracing::info!(
        "Gateway: {} ({}), Server: {}:{}",
        settings.gateway_url,
        settings.push_method.as_str(),
        settings.server.bind,
        settings.server.port,
    );

    let mut signals = SignalListener::install()?;
    let pipeline = Pipeline::start(settings, &config).await?;

    let addr = pipeline.serve_status().await?;
    tracing::info!("Status server listening on: http://{}", addr);

    loop {
        match signals.recv().await {
            LifecycleSignal::Reload => match cli.load_config() {
                Ok(config) => {
                    pipeline.reload(&config).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Reload rejected, keeping current targets");
                }
            },
            LifecycleSignal::Shutdown => break,
        }
    }

    pipeline.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
