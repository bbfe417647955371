//! Client-side connection supervision.
//!
//! A single driver task owns the link. It connects, routes inbound frames to
//! the correlator and push channel, and on loss retries with exponential
//! backoff until it succeeds or is torn down.

use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError};

use llamactl_core::BackoffPolicy;
use serde::Serialize;
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::correlator::{Correlator, LinkWatch};
use crate::frame::{Frame, PushEvent, Subscription};
use crate::transport::{Connector, Link};

/// Connection lifecycle as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

/// State plus the number of attempts made since the link was last up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reconnection_attempts: u32,
}

impl ConnectionStatus {
    const fn new(state: ConnectionState, reconnection_attempts: u32) -> Self {
        Self {
            state,
            reconnection_attempts,
        }
    }
}

/// Standing subscriptions, shared between the client and the driver.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    streams: Mutex<BTreeSet<Subscription>>,
}

impl SubscriptionSet {
    /// Add `stream`. If it is new and a link is up, return that link so the
    /// caller can announce it. The driver replays the set under the same lock
    /// when a link comes up, so each new stream is announced exactly once.
    pub(crate) fn register(
        &self,
        stream: Subscription,
        link: &LinkWatch,
    ) -> Option<mpsc::Sender<Frame>> {
        let mut streams = self.lock();
        if !streams.insert(stream) {
            return None;
        }
        link.borrow().clone()
    }

    /// Remove `stream`, returning the current link if it was present.
    pub(crate) fn deregister(
        &self,
        stream: Subscription,
        link: &LinkWatch,
    ) -> Option<mpsc::Sender<Frame>> {
        let mut streams = self.lock();
        if !streams.remove(&stream) {
            return None;
        }
        link.borrow().clone()
    }

    pub fn contains(&self, stream: Subscription) -> bool {
        self.lock().contains(&stream)
    }

    pub fn snapshot(&self) -> Vec<Subscription> {
        self.lock().iter().copied().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<Subscription>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Where the driver delivers inbound frames.
pub(crate) struct Inbound {
    pub correlator: Arc<Correlator>,
    pub pushes: broadcast::Sender<PushEvent>,
}

/// Handle to the connection driver task.
pub struct ReconnectionController {
    status: watch::Receiver<ConnectionStatus>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectionController {
    pub(crate) fn spawn(
        connector: Arc<dyn Connector>,
        backoff: BackoffPolicy,
        link: watch::Sender<Option<mpsc::Sender<Frame>>>,
        subscriptions: Arc<SubscriptionSet>,
        inbound: Inbound,
    ) -> Self {
        let (status_tx, status) =
            watch::channel(ConnectionStatus::new(ConnectionState::Disconnected, 0));
        let wake = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let driver = Driver {
            connector,
            backoff,
            link,
            status: status_tx,
            subscriptions,
            inbound,
            wake: Arc::clone(&wake),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(driver.run());

        Self {
            status,
            wake,
            cancel,
            driver: Mutex::new(Some(handle)),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Skip the rest of the current backoff window and retry now. Has no
    /// effect while connected. A signal during a connect attempt is kept
    /// for the backoff that follows it.
    pub fn visibility_regained(&self) {
        if self.status().state != ConnectionState::Connected {
            self.wake.notify_one();
        }
    }

    /// Stop the driver, cancelling any scheduled retry and closing the link.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.await.ok();
        }
    }
}

impl Drop for ReconnectionController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Driver {
    connector: Arc<dyn Connector>,
    backoff: BackoffPolicy,
    link: watch::Sender<Option<mpsc::Sender<Frame>>>,
    status: watch::Sender<ConnectionStatus>,
    subscriptions: Arc<SubscriptionSet>,
    inbound: Inbound,
    wake: Arc<Notify>,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(self) {
        let mut attempts: u32 = 0;
        let mut recovered = false;
        self.publish(ConnectionState::Connecting, 0);

        loop {
            let connected = tokio::select! {
                () = self.cancel.cancelled() => break,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok(link) => {
                    if recovered {
                        info!(attempts, "Control link re-established");
                    } else {
                        info!("Control link established");
                    }
                    attempts = 0;
                    if self.session(link, recovered).await.is_break() {
                        break;
                    }
                    recovered = true;
                    attempts = 1;
                    warn!("Control link lost");
                    self.publish(ConnectionState::Reconnecting, attempts);
                }
                Err(e) => {
                    attempts = attempts.saturating_add(1);
                    warn!(error = %e, attempts, "Control connection attempt failed");
                    let state = if recovered {
                        ConnectionState::Reconnecting
                    } else {
                        ConnectionState::Error
                    };
                    self.publish(state, attempts);
                }
            }

            let delay = self.backoff.delay(attempts);
            debug!(?delay, attempts, "Scheduling reconnection");
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
                () = self.wake.notified() => debug!("Visibility regained, retrying now"),
            }
        }

        self.link.send_replace(None);
        self.publish(ConnectionState::Disconnected, attempts);
        debug!("Control connection driver stopped");
    }

    /// Serve one connected link until it drops or the driver is cancelled.
    async fn session(&self, link: Link, recovered: bool) -> ControlFlow<()> {
        let Link {
            outbound,
            mut inbound,
        } = link;

        // Publish the link under the subscription lock so a concurrent
        // subscribe is sent either by the client or by the replay below.
        let replay = {
            let streams = self.subscriptions.lock();
            self.link.send_replace(Some(outbound.clone()));
            streams.iter().copied().collect::<Vec<_>>()
        };
        self.publish(ConnectionState::Connected, 0);
        if recovered && !replay.is_empty() {
            info!(count = replay.len(), "Re-issuing standing subscriptions");
        }
        for stream in replay {
            if outbound.send(Frame::Subscribe { stream }).await.is_err() {
                break;
            }
        }

        let flow = loop {
            tokio::select! {
                () = self.cancel.cancelled() => break ControlFlow::Break(()),
                frame = inbound.recv() => match frame {
                    None => break ControlFlow::Continue(()),
                    Some(frame @ Frame::Reply { .. }) => {
                        self.inbound.correlator.handle_reply(frame);
                    }
                    Some(Frame::Push { event }) => {
                        self.inbound.pushes.send(event).ok();
                    }
                    Some(other) => debug!(frame = ?other, "Ignoring unexpected frame"),
                },
            }
        };
        self.link.send_replace(None);
        flow
    }

    fn publish(&self, state: ConnectionState, attempts: u32) {
        self.status
            .send_replace(ConnectionStatus::new(state, attempts));
    }
}
