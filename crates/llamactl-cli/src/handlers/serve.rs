//! Serve command handler.
//!
//! Hosts the supervisor behind a TCP control endpoint until interrupted,
//! then stops the managed process.

use anyhow::{Context, Result};
use llamactl_core::LlamactlConfig;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::bootstrap::build_server;

/// Execute the serve command.
///
/// * `listen` - Control endpoint address, overriding `control.listen`
/// * `autostart` - Start llama-server right away
pub async fn execute(
    config: &LlamactlConfig,
    listen: Option<String>,
    autostart: bool,
) -> Result<()> {
    let address = listen.unwrap_or_else(|| config.control.listen.clone());
    let server = build_server(config)?;
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind control endpoint {address}"))?;

    let supervisor = server.service().supervisor().clone();
    if autostart {
        if let Err(e) = supervisor.start().await {
            warn!(error = %e, "llama-server failed to start");
        }
    }

    let mut serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve_tcp(listener).await })
    };

    let outcome = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            result.context("Failed to listen for ctrl-c")
        }
        result = &mut serving => {
            error!("Control endpoint stopped unexpectedly");
            match result {
                Ok(served) => served.context("Control endpoint failed"),
                Err(e) => Err(e.into()),
            }
        }
    };

    supervisor.stop().await?;
    server.shutdown();
    if !serving.is_finished() {
        serving.await??;
    }
    outcome
}
