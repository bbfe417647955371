//! Composition root: tracing, configuration and wiring.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use llamactl_control::{ControlClient, ControlServer, ControlService, TcpConnector};
use llamactl_core::{LlamactlConfig, ServerLogSinkPort, validate_config};
use llamactl_runtime::{LogBroadcaster, Supervisor};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global subscriber. `RUST_LOG` wins over `--verbose`.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()
        .ok();
}

/// Load the configuration file (if any), apply environment overrides and
/// validate the result.
pub fn load_config(path: Option<&Path>) -> Result<LlamactlConfig> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with an explicit environment lookup.
pub fn load_config_with<F>(path: Option<&Path>, lookup: F) -> Result<LlamactlConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => LlamactlConfig::from_file(path)?,
        None => LlamactlConfig::default(),
    };
    config.apply_env_overrides(lookup)?;
    validate_config(&config).context("Invalid configuration")?;
    Ok(config)
}

/// Build the supervisor, log broadcaster and control server for `serve`.
pub fn build_server(config: &LlamactlConfig) -> Result<Arc<ControlServer>> {
    let logs = Arc::new(LogBroadcaster::new(config.supervisor.log_source.clone()));
    let sink: Arc<dyn ServerLogSinkPort> = logs.clone();
    let supervisor = Supervisor::with_http(
        config.server.clone(),
        config.supervisor.clone(),
        Some(sink),
    )
    .context("Failed to set up llama-server endpoints")?;
    let service = ControlService::new(supervisor, logs, config.control.clone());
    Ok(ControlServer::new(Arc::new(service)))
}

/// Client for `address`, falling back to the configured control endpoint.
pub fn connect_client(config: &LlamactlConfig, address: Option<String>) -> ControlClient {
    let address = address.unwrap_or_else(|| config.control.listen.clone());
    ControlClient::connect(Arc::new(TcpConnector::new(address)), &config.control)
}
