//! Newline-delimited JSON over TCP.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Connector, LINK_BUFFER, Link};
use crate::error::TransportError;
use crate::frame::Frame;

/// Longest accepted line. A full log snapshot fits comfortably.
const MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

/// Pause after an accept failure caused by descriptor exhaustion.
const ACCEPT_PAUSE: Duration = Duration::from_millis(100);

/// Connects to a control server listening on a TCP address.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        let stream =
            TcpStream::connect(&self.address)
                .await
                .map_err(|e| TransportError::Connect {
                    address: self.address.clone(),
                    reason: e.to_string(),
                })?;
        stream.set_nodelay(true).ok();
        Ok(link_from_stream(stream))
    }
}

/// Wrap a connected stream into a [`Link`], spawning one reader and one
/// writer task. The link closes when either direction fails.
pub fn link_from_stream<S>(stream: S) -> Link
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut sink, mut lines) =
        Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)).split();
    let (outbound, mut outbound_rx) = mpsc::channel::<Frame>(LINK_BUFFER);
    let (inbound_tx, inbound) = mpsc::channel::<Frame>(LINK_BUFFER);

    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let line = match serde_json::to_string(&frame) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Dropping unserializable frame");
                    continue;
                }
            };
            if let Err(e) = sink.send(line).await {
                debug!(error = %e, "Control link write failed");
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    debug!(error = %e, "Control link read failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Frame>(&line) {
                Ok(frame) => {
                    if inbound_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring malformed control frame"),
            }
        }
    });

    Link { outbound, inbound }
}

/// Source of inbound control connections.
#[async_trait]
pub(crate) trait Accept: Send {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    async fn accept(&mut self) -> io::Result<(Self::Stream, SocketAddr)>;
}

#[async_trait]
impl Accept for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = TcpListener::accept(self).await?;
        stream.set_nodelay(true).ok();
        Ok((stream, peer))
    }
}

/// Accept connections until `cancel` fires, handing each one to `on_link`.
pub async fn serve_tcp<F>(
    listener: TcpListener,
    cancel: CancellationToken,
    on_link: Arc<F>,
) -> io::Result<()>
where
    F: Fn(Link, SocketAddr) + Send + Sync + 'static,
{
    let address = listener.local_addr()?;
    info!(address = %address, "Control server listening");
    accept_loop(listener, cancel, on_link).await;
    Ok(())
}

/// A failed accept only affects that one connection; the loop keeps going.
pub(crate) async fn accept_loop<A, F>(
    mut acceptor: A,
    cancel: CancellationToken,
    on_link: Arc<F>,
) where
    A: Accept,
    F: Fn(Link, SocketAddr) + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            accepted = acceptor.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Control client connected");
                    on_link(link_from_stream(stream), peer);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept control connection");
                    if is_resource_exhaustion(&e) {
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            () = tokio::time::sleep(ACCEPT_PAUSE) => {}
                        }
                    }
                }
            },
        }
    }
}

/// EMFILE and ENFILE: retrying right away would spin.
fn is_resource_exhaustion(error: &io::Error) -> bool {
    matches!(error.raw_os_error(), Some(23 | 24))
}
