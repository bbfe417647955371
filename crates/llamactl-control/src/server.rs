//! Control-plane endpoint hosting a supervisor.
//!
//! Every link gets its own task. Requests are answered concurrently; push
//! events come from one broadcast channel fed by the supervisor observer,
//! the log target and the metrics ticker, filtered per link by its
//! subscriptions.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use llamactl_core::{LogRecord, LogTarget, ModelSummary};
use llamactl_runtime::ObserverHandle;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::frame::{Frame, PushEvent, Subscription};
use crate::operation::Operation;
use crate::service::ControlService;
use crate::transport::{Link, serve_tcp};

/// Push events buffered for slow links before they lag.
const EVENT_BUFFER: usize = 1024;

pub struct ControlServer {
    service: Arc<ControlService>,
    events: broadcast::Sender<PushEvent>,
    cancel: CancellationToken,
    _observer: ObserverHandle,
}

impl ControlServer {
    /// Wire the service's supervisor and log broadcaster into the push
    /// channel and start the metrics ticker.
    pub fn new(service: Arc<ControlService>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let last_models: Mutex<Vec<ModelSummary>> = Mutex::new(Vec::new());
        let observer = {
            let events = events.clone();
            service.supervisor().on_state_change(move |state| {
                events.send(PushEvent::status(state.clone())).ok();
                let mut last = last_models.lock().unwrap_or_else(PoisonError::into_inner);
                if *last != state.models {
                    last.clone_from(&state.models);
                    events.send(PushEvent::models(state.models.clone())).ok();
                }
            })
        };

        service.logs().attach_target(Arc::new(PushLogTarget {
            events: events.clone(),
        }));

        let server = Arc::new(Self {
            service,
            events,
            cancel,
            _observer: observer,
        });
        server.spawn_metrics_ticker();
        server
    }

    pub const fn service(&self) -> &Arc<ControlService> {
        &self.service
    }

    /// Serve one link until the peer goes away or the server shuts down.
    pub fn serve_link(self: &Arc<Self>, link: Link) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move { server.run_link(link).await })
    }

    /// Accept TCP clients until shutdown.
    pub async fn serve_tcp(self: &Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        let server = Arc::clone(self);
        serve_tcp(
            listener,
            self.cancel.clone(),
            Arc::new(move |link: Link, peer: SocketAddr| {
                debug!(peer = %peer, "Serving control link");
                server.serve_link(link);
            }),
        )
        .await
    }

    /// Close every link and stop publishing.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.service.logs().detach_target();
    }

    async fn run_link(self: Arc<Self>, link: Link) {
        let Link {
            outbound,
            mut inbound,
        } = link;
        let mut subscribed: HashSet<Subscription> = HashSet::new();
        let mut events = self.events.subscribe();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                frame = inbound.recv() => {
                    let Some(frame) = frame else { break };
                    self.on_frame(frame, &outbound, &mut subscribed).await;
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if subscribed.contains(&event.subscription())
                            && outbound.send(Frame::Push { event }).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Control link lagging, push events dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Control link closed");
    }

    async fn on_frame(
        &self,
        frame: Frame,
        outbound: &mpsc::Sender<Frame>,
        subscribed: &mut HashSet<Subscription>,
    ) {
        match frame {
            Frame::Request { id, event, payload } => {
                let service = Arc::clone(&self.service);
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let result = match Operation::parse(&event, payload) {
                        Ok(op) => service.handle(op).await,
                        Err(e) => {
                            warn!(call_id = %id, event = %event, error = %e, "Rejected control request");
                            Err(e.to_string())
                        }
                    };
                    outbound.send(Frame::reply(id, result)).await.ok();
                });
            }
            Frame::Subscribe { stream } => {
                if subscribed.insert(stream) {
                    info!(stream = stream.as_str(), "Stream subscribed");
                }
                if let Some(snapshot) = self.snapshot(stream).await {
                    outbound.send(Frame::Push { event: snapshot }).await.ok();
                }
            }
            Frame::Unsubscribe { stream } => {
                subscribed.remove(&stream);
                debug!(stream = stream.as_str(), "Stream unsubscribed");
            }
            other => debug!(frame = ?other, "Ignoring unexpected frame from client"),
        }
    }

    /// Current value of a stream, sent right after subscribing.
    async fn snapshot(&self, stream: Subscription) -> Option<PushEvent> {
        match stream {
            Subscription::Status => Some(PushEvent::status(self.service.supervisor().get_state())),
            Subscription::Models => Some(PushEvent::models(
                self.service.supervisor().get_state().models,
            )),
            Subscription::Metrics => Some(PushEvent::metrics(self.service.sample_metrics().await)),
            Subscription::Logs => None,
        }
    }

    fn spawn_metrics_ticker(self: &Arc<Self>) {
        let interval = self.service.control_settings().metrics_interval();
        if interval.is_zero() {
            return;
        }
        let server = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(server) = server.upgrade() else { break };
                if server.events.receiver_count() > 0 {
                    let sample = server.service.sample_metrics().await;
                    server.events.send(PushEvent::metrics(sample)).ok();
                }
            }
        });
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Publishes every new log record on the `logs` stream.
struct PushLogTarget {
    events: broadcast::Sender<PushEvent>,
}

impl LogTarget for PushLogTarget {
    fn emit(&self, record: &LogRecord) {
        self.events.send(PushEvent::log(record.clone())).ok();
    }
}
