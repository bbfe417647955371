//! Watch command handler.

use anyhow::Result;
use llamactl_control::Subscription;
use llamactl_core::LlamactlConfig;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::bootstrap::connect_client;

/// Subscribe to `streams` (all when empty) and print every push event as a
/// JSON line until interrupted.
pub async fn execute(
    config: &LlamactlConfig,
    streams: Vec<Subscription>,
    connect: Option<String>,
) -> Result<()> {
    let streams = if streams.is_empty() {
        Subscription::ALL.to_vec()
    } else {
        streams
    };

    let client = connect_client(config, connect);
    let mut pushes = client.pushes();
    let mut connection = client.watch_connection();
    for stream in streams {
        client.subscribe(stream).await;
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                break;
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *connection.borrow_and_update();
                info!(
                    state = ?status.state,
                    attempts = status.reconnection_attempts,
                    "Control connection changed"
                );
            }
            event = pushes.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Watcher lagging, events dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.shutdown().await;
    Ok(())
}
