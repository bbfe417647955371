//! Request/response correlation over a single shared link.
//!
//! Each call gets a fresh id and a pending entry holding the sender half of a
//! oneshot channel. The entry is removed exactly once: by the matching reply,
//! by the call's own deadline, or by the caller going away.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CallError;
use crate::frame::Frame;
use crate::operation::Operation;

type Pending = HashMap<String, oneshot::Sender<Result<Value, CallError>>>;

/// Current outbound half of the link, `None` while disconnected.
pub type LinkWatch = watch::Receiver<Option<mpsc::Sender<Frame>>>;

/// Multiplexes concurrent calls over one link.
pub struct Correlator {
    pending: Mutex<Pending>,
    link: LinkWatch,
    connect_wait: Duration,
}

impl Correlator {
    pub fn new(link: LinkWatch, connect_wait: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            link,
            connect_wait,
        }
    }

    /// Issue `op` and wait for its reply or deadline.
    pub async fn request(&self, op: &Operation) -> Result<Value, CallError> {
        let event = op.event_name();
        let outbound = self.wait_for_link().await?;

        let id = Uuid::new_v4().to_string();
        let (tx, mut rx) = oneshot::channel();
        self.lock().insert(id.clone(), tx);
        let _guard = PendingGuard {
            correlator: self,
            id: &id,
        };

        let frame = Frame::Request {
            id: id.clone(),
            event: event.to_string(),
            payload: op.payload(),
        };
        if outbound.send(frame).await.is_err() {
            return Err(CallError::Transport("control link closed".to_string()));
        }
        debug!(call_id = %id, event = %event, "Dispatched control call");

        match timeout(op.timeout(), &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CallError::Cancelled),
            Err(_) => {
                if self.take(&id).is_some() {
                    warn!(call_id = %id, event = %event, "Control call timed out");
                    return Err(CallError::Timeout {
                        event: event.to_string(),
                    });
                }
                // The reply claimed the entry while the deadline fired.
                rx.await.unwrap_or(Err(CallError::Cancelled))
            }
        }
    }

    /// Complete call `id`. Unknown or already-settled ids are dropped.
    pub fn resolve(&self, id: &str, result: Result<Value, CallError>) -> bool {
        match self.take(id) {
            Some(tx) => {
                tx.send(result).ok();
                true
            }
            None => {
                debug!(call_id = %id, "Dropping reply for unknown call");
                false
            }
        }
    }

    /// Route a reply frame. Other frames are ignored.
    pub fn handle_reply(&self, frame: Frame) -> bool {
        let Frame::Reply {
            id,
            success,
            data,
            error,
        } = frame
        else {
            return false;
        };
        let result = if success {
            Ok(data.unwrap_or(Value::Null))
        } else {
            Err(CallError::Remote(
                error.unwrap_or_else(|| "Unknown error".to_string()),
            ))
        };
        self.resolve(&id, result)
    }

    /// Fail every pending call with [`CallError::Cancelled`].
    pub fn cancel_all(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        for (_, tx) in drained {
            tx.send(Err(CallError::Cancelled)).ok();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    async fn wait_for_link(&self) -> Result<mpsc::Sender<Frame>, CallError> {
        let mut link = self.link.clone();
        match timeout(self.connect_wait, link.wait_for(Option::is_some)).await {
            Ok(Ok(current)) => current.clone().ok_or(CallError::ConnectionTimeout),
            Ok(Err(_)) => Err(CallError::Cancelled),
            Err(_) => Err(CallError::ConnectionTimeout),
        }
    }

    fn take(&self, id: &str) -> Option<oneshot::Sender<Result<Value, CallError>>> {
        self.lock().remove(id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the pending entry when the calling future is dropped early.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.take(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use serde_json::json;
    use tokio::time::Instant;

    type LinkSender = watch::Sender<Option<mpsc::Sender<Frame>>>;

    fn connected() -> (Arc<Correlator>, mpsc::Receiver<Frame>, LinkSender) {
        let (tx, rx) = mpsc::channel(64);
        let (link_tx, link_rx) = watch::channel(Some(tx));
        (
            Arc::new(Correlator::new(link_rx, Duration::from_secs(5))),
            rx,
            link_tx,
        )
    }

    fn request_id(frame: &Frame) -> String {
        match frame {
            Frame::Request { id, .. } => id.clone(),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reply_resolves_caller() {
        let (correlator, mut wire, _link) = connected();
        let call = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.request(&Operation::ModelsList).await })
        };
        let id = request_id(&wire.recv().await.unwrap());
        assert!(correlator.resolve(&id, Ok(json!(["a"]))));
        assert_eq!(call.await.unwrap(), Ok(json!(["a"])));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_replies_reach_their_callers() {
        let (correlator, mut wire, _link) = connected();
        let mut calls = Vec::new();
        for i in 0..10 {
            let correlator = correlator.clone();
            let model = format!("model-{i}");
            calls.push(tokio::spawn(async move {
                let reply = correlator.request(&Operation::load(model.clone())).await;
                (model, reply)
            }));
        }
        let mut requests = Vec::new();
        for _ in 0..10 {
            let Frame::Request { id, payload, .. } = wire.recv().await.unwrap() else {
                panic!("expected request");
            };
            requests.push((id, payload.unwrap()["modelId"].clone()));
        }
        for (id, model) in requests.into_iter().rev() {
            assert!(correlator.resolve(&id, Ok(model)));
        }
        for call in calls {
            let (model, reply) = call.await.unwrap();
            assert_eq!(reply, Ok(json!(model)));
        }
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_reply_is_dropped() {
        let (correlator, _wire, _link) = connected();
        assert!(!correlator.resolve("nope", Ok(Value::Null)));
    }

    #[tokio::test]
    async fn test_remote_error() {
        let (correlator, mut wire, _link) = connected();
        let call = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.request(&Operation::load("missing")).await })
        };
        let id = request_id(&wire.recv().await.unwrap());
        correlator.handle_reply(Frame::reply(id, Err("Model not found: missing".to_string())));
        assert_eq!(
            call.await.unwrap(),
            Err(CallError::Remote("Model not found: missing".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_deadline() {
        let (correlator, _wire, _link) = connected();
        let started = Instant::now();
        let err = correlator.request(&Operation::ConfigGet).await.unwrap_err();
        assert_eq!(err.to_string(), "Timeout: config:get");
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(5) + Duration::from_millis(10));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_deadline() {
        let (correlator, _wire, _link) = connected();
        let started = Instant::now();
        let err = correlator.request(&Operation::load("big")).await.unwrap_err();
        assert_eq!(err, CallError::Timeout { event: "models:load".to_string() });
        assert!(started.elapsed() >= Duration::from_secs(120));
        assert!(started.elapsed() < Duration::from_secs(120) + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_after_timeout_is_ignored() {
        let (correlator, mut wire, _link) = connected();
        let err = correlator.request(&Operation::SettingsGet).await.unwrap_err();
        assert!(matches!(err, CallError::Timeout { .. }));
        let id = request_id(&wire.recv().await.unwrap());
        assert!(!correlator.resolve(&id, Ok(Value::Null)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_timeout_when_never_connected() {
        let (_link_tx, link_rx) = watch::channel(None);
        let correlator = Correlator::new(link_rx, Duration::from_secs(5));
        let started = Instant::now();
        let err = correlator.request(&Operation::ModelsList).await.unwrap_err();
        assert_eq!(err, CallError::ConnectionTimeout);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(5) + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_link_to_come_up() {
        let (link_tx, link_rx) = watch::channel(None);
        let correlator = Arc::new(Correlator::new(link_rx, Duration::from_secs(5)));
        let call = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.request(&Operation::ServiceHealth).await })
        };
        tokio::time::sleep(Duration::from_secs(2)).await;
        let (tx, mut wire) = mpsc::channel(8);
        link_tx.send(Some(tx)).unwrap();
        let id = request_id(&wire.recv().await.unwrap());
        correlator.resolve(&id, Ok(json!({"healthy": true})));
        assert_eq!(call.await.unwrap(), Ok(json!({"healthy": true})));
    }

    #[tokio::test]
    async fn test_dropped_caller_clears_entry() {
        let (correlator, mut wire, _link) = connected();
        let call = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.request(&Operation::ModelsRefresh).await })
        };
        wire.recv().await.unwrap();
        assert_eq!(correlator.pending_count(), 1);
        call.abort();
        let _ = call.await;
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let (correlator, mut wire, _link) = connected();
        let call = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.request(&Operation::MetricsGet).await })
        };
        wire.recv().await.unwrap();
        correlator.cancel_all();
        assert_eq!(call.await.unwrap(), Err(CallError::Cancelled));
    }
}
