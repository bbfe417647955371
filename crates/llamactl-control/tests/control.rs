//! End-to-end control-plane scenarios over the in-memory transport, with a
//! real supervisor driving fake processes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use llamactl_control::transport::pair;
use llamactl_control::{
    CallError, ConnectionState, ControlClient, ControlServer, ControlService, Frame, Link,
    LogQuery, MemoryConnector, Operation, PushEvent, Subscription,
};
use llamactl_core::{
    ControlSettings, ExitInfo, HealthProbe, LaunchSpec, LogInput, ManagedChild,
    ModelRegistryPort, ModelSummary, ProcessError, ProcessLauncher, RegistryError, ServerConfig,
    ServerLogSinkPort, ServiceState, ServiceStatus, SupervisorSettings,
};
use llamactl_runtime::{LogBroadcaster, Supervisor, SupervisorParts};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// A process that runs until it is shut down.
struct IdleChild;

#[async_trait]
impl ManagedChild for IdleChild {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn wait(&mut self) -> Result<ExitInfo, ProcessError> {
        std::future::pending().await
    }

    async fn shutdown(self: Box<Self>, _grace: Duration) -> Result<ExitInfo, ProcessError> {
        Ok(ExitInfo::signalled())
    }
}

struct IdleLauncher;

impl ProcessLauncher for IdleLauncher {
    fn launch(
        &self,
        _spec: &LaunchSpec,
        _sink: Option<Arc<dyn ServerLogSinkPort>>,
    ) -> Result<Box<dyn ManagedChild>, ProcessError> {
        Ok(Box::new(IdleChild))
    }
}

struct AlwaysReady;

#[async_trait]
impl HealthProbe for AlwaysReady {
    async fn probe(&self) -> bool {
        true
    }
}

/// Registry that can load any model on its shelf. Loads take a few
/// milliseconds that vary per model so replies come back out of order.
struct ShelfRegistry {
    shelf: Vec<String>,
    loaded: Mutex<Vec<ModelSummary>>,
}

impl ShelfRegistry {
    fn new(shelf: &[&str]) -> Self {
        Self {
            shelf: shelf.iter().map(ToString::to_string).collect(),
            loaded: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ModelRegistryPort for ShelfRegistry {
    async fn list_models(&self) -> Result<Vec<ModelSummary>, RegistryError> {
        Ok(self.loaded.lock().unwrap().clone())
    }

    async fn load_model(&self, model_id: &str) -> Result<(), RegistryError> {
        sleep(Duration::from_millis(5 * model_id.len() as u64)).await;
        if !self.shelf.iter().any(|id| id == model_id) {
            return Err(RegistryError::NotFound(model_id.to_string()));
        }
        let mut loaded = self.loaded.lock().unwrap();
        if !loaded.iter().any(|m| m.id == model_id) {
            loaded.push(ModelSummary::new(model_id, model_id, 1));
        }
        Ok(())
    }

    async fn unload_model(&self, model_id: &str) -> Result<(), RegistryError> {
        let mut loaded = self.loaded.lock().unwrap();
        let before = loaded.len();
        loaded.retain(|m| m.id != model_id);
        if loaded.len() == before {
            return Err(RegistryError::NotFound(model_id.to_string()));
        }
        Ok(())
    }
}

struct Fixture {
    server: Arc<ControlServer>,
    client: ControlClient,
    logs: Arc<LogBroadcaster>,
    /// Subscribe frames seen on the wire, across every connection.
    subscribes: Arc<Mutex<Vec<Subscription>>>,
    /// Relay task of each accepted connection. Aborting one drops that link.
    taps: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

fn fixture() -> Fixture {
    let logs = Arc::new(LogBroadcaster::default());
    let supervisor = Supervisor::new(
        ServerConfig::default(),
        SupervisorSettings::default(),
        SupervisorParts {
            launcher: Arc::new(IdleLauncher),
            probe: Arc::new(AlwaysReady),
            registry: Arc::new(ShelfRegistry::new(&["qwen", "llama"])),
            log_sink: None,
        },
    );
    let control = ControlSettings::default();
    let service = Arc::new(ControlService::new(supervisor, logs.clone(), control.clone()));
    let server = ControlServer::new(service);

    let (connector, mut incoming) = MemoryConnector::new();
    let subscribes = Arc::new(Mutex::new(Vec::new()));
    let taps = Arc::new(Mutex::new(Vec::new()));
    {
        let server = Arc::clone(&server);
        let subscribes = Arc::clone(&subscribes);
        let taps = Arc::clone(&taps);
        tokio::spawn(async move {
            while let Some(link) = incoming.recv().await {
                let tap = tap(link, &server, Arc::clone(&subscribes));
                taps.lock().unwrap().push(tap);
            }
        });
    }

    let client = ControlClient::connect(Arc::new(connector), &control);
    Fixture {
        server,
        client,
        logs,
        subscribes,
        taps,
    }
}

/// Relay frames between a client link and the server, recording subscribes.
fn tap(
    client: Link,
    server: &Arc<ControlServer>,
    subscribes: Arc<Mutex<Vec<Subscription>>>,
) -> JoinHandle<()> {
    let (near, far) = pair();
    server.serve_link(far);
    let Link {
        outbound: to_client,
        inbound: mut from_client,
    } = client;
    let Link {
        outbound: to_server,
        inbound: mut from_server,
    } = near;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = from_client.recv() => {
                    let Some(frame) = frame else { break };
                    if let Frame::Subscribe { stream } = &frame {
                        subscribes.lock().unwrap().push(*stream);
                    }
                    if to_server.send(frame).await.is_err() {
                        break;
                    }
                }
                frame = from_server.recv() => {
                    let Some(frame) = frame else { break };
                    if to_client.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

async fn wait_connected(client: &ControlClient) {
    client
        .watch_connection()
        .wait_for(|s| s.state == ConnectionState::Connected)
        .await
        .unwrap();
}

async fn status(client: &ControlClient) -> ServiceState {
    let value = client.request(Operation::ServiceStatus).await.unwrap();
    serde_json::from_value(value).unwrap()
}

async fn start_and_wait_ready(client: &ControlClient) {
    client.request(Operation::ServiceStart).await.unwrap();
    for _ in 0..100 {
        if status(client).await.status == ServiceStatus::Ready {
            return;
        }
        sleep(Duration::from_millis(200)).await;
    }
    panic!("service never became ready");
}

async fn next_push(pushes: &mut broadcast::Receiver<PushEvent>, stream: Subscription) -> PushEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), pushes.recv())
            .await
            .expect("no push event")
            .unwrap();
        if event.subscription() == stream {
            return event;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn start_over_the_control_plane_reaches_ready() {
    let f = fixture();

    let reply = f.client.request(Operation::ServiceStart).await.unwrap();
    assert_eq!(reply["status"], json!("starting"));

    start_and_wait_ready(&f.client).await;
    let health = f.client.request(Operation::ServiceHealth).await.unwrap();
    assert_eq!(health, json!({"healthy": true}));

    let reply = f.client.request(Operation::ServiceStop).await.unwrap();
    assert_eq!(reply["status"], json!("initial"));
    f.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_calls_each_get_their_own_reply() {
    let f = fixture();
    start_and_wait_ready(&f.client).await;
    let client = Arc::new(f.client);

    let mut calls = Vec::new();
    for i in 0..20 {
        let client = Arc::clone(&client);
        let model = match i % 3 {
            0 => "qwen".to_string(),
            1 => "llama".to_string(),
            _ => format!("ghost-{i}"),
        };
        calls.push(tokio::spawn(async move {
            let reply = client.request(Operation::load(model.clone())).await;
            (model, reply)
        }));
    }

    for call in calls {
        let (model, reply) = call.await.unwrap();
        if model.starts_with("ghost") {
            assert_eq!(
                reply,
                Err(CallError::Remote(format!("Model not found: {model}")))
            );
        } else {
            let models = reply.unwrap();
            let ids: Vec<&str> = models
                .as_array()
                .unwrap()
                .iter()
                .map(|m| m["id"].as_str().unwrap())
                .collect();
            assert!(ids.contains(&model.as_str()), "{model} missing from {ids:?}");
        }
    }
    assert_eq!(client.pending_calls(), 0);

    let listed = client.request(Operation::ModelsList).await.unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn model_calls_require_a_running_process() {
    let f = fixture();
    let err = f.client.request(Operation::load("qwen")).await.unwrap_err();
    assert_eq!(err, CallError::Remote("llama-server is not running".to_string()));
}

#[tokio::test(start_paused = true)]
async fn unknown_event_is_answered_with_an_error() {
    let f = fixture();
    let (mut near, far) = pair();
    f.server.serve_link(far);

    near.outbound
        .send(Frame::Request {
            id: "x1".to_string(),
            event: "models:explode".to_string(),
            payload: None,
        })
        .await
        .unwrap();
    let reply = near.inbound.recv().await.unwrap();
    assert_eq!(
        reply,
        Frame::Reply {
            id: "x1".to_string(),
            success: false,
            data: None,
            error: Some("Unknown event: models:explode".to_string()),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn config_update_is_validated() {
    let f = fixture();

    let bad = ServerConfig {
        port: Some(80),
        ..ServerConfig::default()
    };
    let err = f
        .client
        .request(Operation::ConfigUpdate(Box::new(bad)))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Remote(ref msg) if msg.contains("got 80")));

    let good = ServerConfig {
        port: Some(9090),
        ..ServerConfig::default()
    };
    f.client
        .request(Operation::ConfigUpdate(Box::new(good)))
        .await
        .unwrap();
    let config = f.client.request(Operation::ConfigGet).await.unwrap();
    assert_eq!(config["port"], json!(9090));

    let settings = f.client.request(Operation::SettingsGet).await.unwrap();
    assert_eq!(settings["supervisor"]["maxRetries"], json!(3));
    assert_eq!(settings["control"]["listen"], json!("127.0.0.1:7070"));
}

#[tokio::test(start_paused = true)]
async fn logs_can_be_queried_and_cleared() {
    let f = fixture();
    f.logs.log(LogInput::new("loading weights").with_level("info"));
    f.logs.log(LogInput::new("out of memory").with_level("error"));

    let errors = f
        .client
        .request(Operation::LogsGet(LogQuery {
            level: Some("error".to_string()),
        }))
        .await
        .unwrap();
    assert_eq!(errors.as_array().unwrap().len(), 1);
    assert_eq!(errors[0]["message"], json!("out of memory"));

    f.client.request(Operation::LogsClear).await.unwrap();
    let remaining = f
        .client
        .request(Operation::LogsGet(LogQuery::default()))
        .await
        .unwrap();
    assert_eq!(remaining, Value::Array(Vec::new()));
}

#[tokio::test(start_paused = true)]
async fn metrics_report_host_usage() {
    let f = fixture();
    let metrics = f.client.request(Operation::MetricsGet).await.unwrap();
    assert!(metrics["memoryTotal"].as_u64().unwrap() > 0);
    assert_eq!(metrics["activeModels"], json!(0));
}

#[tokio::test(start_paused = true)]
async fn subscriptions_receive_snapshot_then_changes() {
    let f = fixture();
    let mut pushes = f.client.pushes();
    wait_connected(&f.client).await;

    f.client.subscribe(Subscription::Status).await;
    let PushEvent::Status { data, .. } = next_push(&mut pushes, Subscription::Status).await else {
        unreachable!();
    };
    assert_eq!(data.status, ServiceStatus::Initial);

    f.client.request(Operation::ServiceStart).await.unwrap();
    let PushEvent::Status { data, .. } = next_push(&mut pushes, Subscription::Status).await else {
        unreachable!();
    };
    assert_eq!(data.status, ServiceStatus::Starting);

    f.client.subscribe(Subscription::Logs).await;
    sleep(Duration::from_millis(10)).await;
    f.logs.log(LogInput::new("slot 0 ready"));
    let PushEvent::Log { data, .. } = next_push(&mut pushes, Subscription::Logs).await else {
        unreachable!();
    };
    assert_eq!(data.message, "slot 0 ready");
    assert_eq!(data.source, "llama-service");
}

#[tokio::test(start_paused = true)]
async fn metrics_stream_ticks() {
    let f = fixture();
    let mut pushes = f.client.pushes();
    wait_connected(&f.client).await;

    f.client.subscribe(Subscription::Metrics).await;
    // Snapshot, then one per interval.
    next_push(&mut pushes, Subscription::Metrics).await;
    next_push(&mut pushes, Subscription::Metrics).await;
    next_push(&mut pushes, Subscription::Metrics).await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_reissues_standing_subscriptions_once() {
    let f = fixture();
    let mut pushes = f.client.pushes();
    wait_connected(&f.client).await;
    assert_eq!(f.client.connection().reconnection_attempts, 0);

    f.client.subscribe(Subscription::Status).await;
    f.client.subscribe(Subscription::Models).await;
    next_push(&mut pushes, Subscription::Status).await;
    next_push(&mut pushes, Subscription::Models).await;
    assert_eq!(f.subscribes.lock().unwrap().len(), 2);

    // Drop the link from the server side.
    let tap = f.taps.lock().unwrap().pop().unwrap();
    tap.abort();

    let mut connection = f.client.watch_connection();
    let dropped = *connection
        .wait_for(|s| s.state == ConnectionState::Reconnecting)
        .await
        .unwrap();
    assert_eq!(dropped.reconnection_attempts, 1);

    connection
        .wait_for(|s| s.state == ConnectionState::Connected)
        .await
        .unwrap();
    assert_eq!(f.client.connection().reconnection_attempts, 0);

    next_push(&mut pushes, Subscription::Status).await;
    sleep(Duration::from_secs(5)).await;

    let subscribes = f.subscribes.lock().unwrap().clone();
    assert_eq!(subscribes.len(), 4);
    let replayed: HashSet<Subscription> = subscribes[2..].iter().copied().collect();
    assert_eq!(
        replayed,
        HashSet::from([Subscription::Status, Subscription::Models])
    );

    // Calls flow over the new link.
    assert_eq!(status(&f.client).await.status, ServiceStatus::Initial);
}

#[tokio::test(start_paused = true)]
async fn unsubscribed_streams_stop_pushing() {
    let f = fixture();
    let mut pushes = f.client.pushes();
    wait_connected(&f.client).await;

    f.client.subscribe(Subscription::Logs).await;
    sleep(Duration::from_millis(10)).await;
    f.client.unsubscribe(Subscription::Logs).await;
    sleep(Duration::from_millis(10)).await;
    assert!(!f.client.is_subscribed(Subscription::Logs));

    f.logs.log(LogInput::new("nobody listens"));
    sleep(Duration::from_secs(1)).await;
    assert!(matches!(
        pushes.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}
