//! Control-plane client: correlated calls plus standing subscriptions over
//! a self-healing link.

use std::sync::Arc;

use llamactl_core::ControlSettings;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::correlator::{Correlator, LinkWatch};
use crate::error::CallError;
use crate::frame::{Frame, PushEvent, Subscription};
use crate::operation::Operation;
use crate::reconnect::{ConnectionStatus, Inbound, ReconnectionController, SubscriptionSet};
use crate::transport::Connector;

/// Push events buffered per receiver before it starts lagging.
const PUSH_BUFFER: usize = 1024;

pub struct ControlClient {
    correlator: Arc<Correlator>,
    controller: ReconnectionController,
    subscriptions: Arc<SubscriptionSet>,
    link: LinkWatch,
    pushes: broadcast::Sender<PushEvent>,
}

impl ControlClient {
    /// Start connecting through `connector`. Returns immediately; calls made
    /// before the link is up wait for it up to `connect_wait`.
    pub fn connect(connector: Arc<dyn Connector>, settings: &ControlSettings) -> Self {
        let (link_tx, link) = watch::channel(None);
        let (pushes, _) = broadcast::channel(PUSH_BUFFER);
        let correlator = Arc::new(Correlator::new(link.clone(), settings.connect_wait()));
        let subscriptions = Arc::new(SubscriptionSet::default());

        let controller = ReconnectionController::spawn(
            connector,
            settings.reconnect_backoff(),
            link_tx,
            Arc::clone(&subscriptions),
            Inbound {
                correlator: Arc::clone(&correlator),
                pushes: pushes.clone(),
            },
        );

        Self {
            correlator,
            controller,
            subscriptions,
            link,
            pushes,
        }
    }

    pub async fn request(&self, op: Operation) -> Result<Value, CallError> {
        self.correlator.request(&op).await
    }

    /// Add a standing subscription. It survives reconnects until removed.
    pub async fn subscribe(&self, stream: Subscription) {
        if let Some(link) = self.subscriptions.register(stream, &self.link) {
            if link.send(Frame::Subscribe { stream }).await.is_err() {
                debug!(stream = stream.as_str(), "Link closed before subscribe was sent");
            }
        }
    }

    pub async fn unsubscribe(&self, stream: Subscription) {
        if let Some(link) = self.subscriptions.deregister(stream, &self.link) {
            link.send(Frame::Unsubscribe { stream }).await.ok();
        }
    }

    pub fn is_subscribed(&self, stream: Subscription) -> bool {
        self.subscriptions.contains(stream)
    }

    /// Receive every push event from now on.
    pub fn pushes(&self) -> broadcast::Receiver<PushEvent> {
        self.pushes.subscribe()
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.controller.status()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.controller.watch()
    }

    /// The consuming surface became active again; retry a down link now.
    pub fn visibility_regained(&self) {
        self.controller.visibility_regained();
    }

    pub fn pending_calls(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Tear the connection down and fail every pending call.
    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
        self.correlator.cancel_all();
    }
}
