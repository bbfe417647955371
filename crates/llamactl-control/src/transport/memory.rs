//! In-process transport.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Connector, LINK_BUFFER, Link};
use crate::error::TransportError;

/// Two links wired back to back.
pub fn pair() -> (Link, Link) {
    let (a_tx, a_rx) = mpsc::channel(LINK_BUFFER);
    let (b_tx, b_rx) = mpsc::channel(LINK_BUFFER);
    (
        Link {
            outbound: a_tx,
            inbound: b_rx,
        },
        Link {
            outbound: b_tx,
            inbound: a_rx,
        },
    )
}

/// Connector that hands the server half of every new pair to an acceptor
/// channel. Going offline makes `connect` fail until it is brought back.
#[derive(Debug)]
pub struct MemoryConnector {
    accept: mpsc::UnboundedSender<Link>,
    online: AtomicBool,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Link>) {
        let (accept, incoming) = mpsc::unbounded_channel();
        (
            Self {
                accept,
                online: AtomicBool::new(true),
            },
            incoming,
        )
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        let refused = |reason: &str| TransportError::Connect {
            address: "memory".to_string(),
            reason: reason.to_string(),
        };
        if !self.online.load(Ordering::SeqCst) {
            return Err(refused("offline"));
        }
        let (client, server) = pair();
        self.accept
            .send(server)
            .map_err(|_| refused("no acceptor"))?;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, Subscription};

    #[tokio::test]
    async fn test_pair_carries_frames_both_ways() {
        let (mut a, mut b) = pair();
        let frame = Frame::Subscribe {
            stream: Subscription::Logs,
        };
        a.outbound.send(frame.clone()).await.unwrap();
        assert_eq!(b.inbound.recv().await, Some(frame.clone()));
        b.outbound.send(frame.clone()).await.unwrap();
        assert_eq!(a.inbound.recv().await, Some(frame));
    }

    #[tokio::test]
    async fn test_dropping_one_side_closes_other() {
        let (a, mut b) = pair();
        drop(a);
        assert_eq!(b.inbound.recv().await, None);
    }

    #[tokio::test]
    async fn test_offline_connector_refuses() {
        let (connector, mut incoming) = MemoryConnector::new();
        connector.set_online(false);
        assert!(connector.connect().await.is_err());
        connector.set_online(true);
        let _client = connector.connect().await.unwrap();
        assert!(incoming.recv().await.is_some());
    }
}
