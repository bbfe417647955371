//! Links between a control client and server.
//!
//! A [`Link`] is a pair of frame channels. Transports only move frames; the
//! correlator and server never see bytes.

mod memory;
mod tcp;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::frame::Frame;

pub use memory::{MemoryConnector, pair};
pub use tcp::{TcpConnector, link_from_stream, serve_tcp};

/// Frames buffered per direction before senders wait.
pub const LINK_BUFFER: usize = 256;

/// One established connection. Dropping `outbound` closes the link from this
/// side; `inbound` yields `None` once the peer is gone.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<Frame>,
}

/// Opens links to a control server.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Link, TransportError>;
}
