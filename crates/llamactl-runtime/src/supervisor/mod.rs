//! Process supervisor for the managed llama-server.
//!
//! The supervisor owns the process handle and the lifecycle state machine:
//!
//! ```text
//! initial -> starting -> ready
//! starting -> error            (spawn failure, early exit, startup timeout)
//! ready -> crashed -> starting (while retries < max_retries)
//! starting -> crashed          (a recovery spawn exits before ready)
//! any -> stopping -> initial   (stop)
//! ```
//!
//! Spawning and terminating are serialized by an async operation lock, so at
//! most one of them is in flight. Background tasks (readiness polling, the
//! exit reaper, crash recovery) carry the epoch of the process they were
//! started for and become no-ops once that process is gone.

mod observers;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use llamactl_core::{
    ExitInfo, HealthProbe, ManagedChild, ModelRegistryPort, ModelSummary, ProcessError,
    ProcessLauncher, ServerConfig, ServerLogSinkPort, ServiceState, ServiceStatus,
    SupervisorError, SupervisorSettings,
};
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::args::launch_spec;
use crate::health::HttpHealthProber;
use crate::process::TokioProcessLauncher;
use crate::registry::HttpModelRegistry;

pub use observers::ObserverHandle;
use observers::{ObserverList, Transition};

/// Extra time granted to the reaper on top of the stop grace period.
const REAP_SLACK: Duration = Duration::from_secs(5);

type ShutdownReply = oneshot::Sender<Result<ExitInfo, ProcessError>>;

/// Adapters the supervisor drives.
#[derive(Clone)]
pub struct SupervisorParts {
    pub launcher: Arc<dyn ProcessLauncher>,
    pub probe: Arc<dyn HealthProbe>,
    pub registry: Arc<dyn ModelRegistryPort>,
    /// Receives stdout/stderr lines of the managed process.
    pub log_sink: Option<Arc<dyn ServerLogSinkPort>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpawnKind {
    Operator,
    Recovery,
}

/// Live process owned by the supervisor.
struct ProcessSlot {
    epoch: u64,
    kind: SpawnKind,
    pid: Option<u32>,
    poll_cancel: CancellationToken,
    stop_tx: oneshot::Sender<ShutdownReply>,
}

struct Inner {
    state: ServiceState,
    epoch: u64,
    /// Bumped on every published transition.
    seq: u64,
    process: Option<ProcessSlot>,
    /// Pending crash recovery, cancelled by `stop()` and by any new spawn.
    recovery: Option<CancellationToken>,
}

impl Inner {
    fn snapshot(&self) -> ServiceState {
        self.state.clone().with_uptime_at(Utc::now())
    }

    /// Snapshot a state change for observers, ordered by `seq`.
    fn transition(&mut self) -> Transition {
        self.seq += 1;
        Transition::new(self.seq, self.snapshot())
    }

    fn owns(&self, epoch: u64) -> bool {
        self.process.as_ref().is_some_and(|slot| slot.epoch == epoch)
    }
}

/// Supervisor for the managed llama-server process.
///
/// Construct it once and share the `Arc` with whatever hosts the control
/// endpoint.
pub struct Supervisor {
    settings: SupervisorSettings,
    config: RwLock<ServerConfig>,
    launcher: Arc<dyn ProcessLauncher>,
    probe: RwLock<Arc<dyn HealthProbe>>,
    registry: RwLock<Arc<dyn ModelRegistryPort>>,
    log_sink: Option<Arc<dyn ServerLogSinkPort>>,
    /// Rebuild the HTTP adapters when the config changes.
    http_endpoints: bool,
    inner: Mutex<Inner>,
    op_lock: tokio::sync::Mutex<()>,
    observers: Arc<ObserverList>,
}

impl Supervisor {
    pub fn new(
        config: ServerConfig,
        settings: SupervisorSettings,
        parts: SupervisorParts,
    ) -> Arc<Self> {
        Arc::new(Self::build(config, settings, parts, false))
    }

    /// Supervisor wired to the real process launcher and HTTP adapters.
    pub fn with_http(
        config: ServerConfig,
        settings: SupervisorSettings,
        log_sink: Option<Arc<dyn ServerLogSinkPort>>,
    ) -> Result<Arc<Self>, SupervisorError> {
        let (probe, registry) = http_endpoints(&config, &settings)?;
        let parts = SupervisorParts {
            launcher: Arc::new(TokioProcessLauncher::new()),
            probe,
            registry,
            log_sink,
        };
        Ok(Arc::new(Self::build(config, settings, parts, true)))
    }

    fn build(
        config: ServerConfig,
        settings: SupervisorSettings,
        parts: SupervisorParts,
        http_endpoints: bool,
    ) -> Self {
        Self {
            settings,
            config: RwLock::new(config),
            launcher: parts.launcher,
            probe: RwLock::new(parts.probe),
            registry: RwLock::new(parts.registry),
            log_sink: parts.log_sink,
            http_endpoints,
            inner: Mutex::new(Inner {
                state: ServiceState::default(),
                epoch: 0,
                seq: 0,
                process: None,
                recovery: None,
            }),
            op_lock: tokio::sync::Mutex::new(()),
            observers: Arc::new(ObserverList::default()),
        }
    }

    pub const fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Configuration used by the next spawn.
    pub fn config(&self) -> ServerConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the configuration used by the next spawn. A running process
    /// keeps its arguments until it is restarted.
    pub fn update_config(&self, config: ServerConfig) -> Result<(), SupervisorError> {
        if self.http_endpoints {
            let (probe, registry) = http_endpoints(&config, &self.settings)?;
            *self.probe.write().unwrap_or_else(PoisonError::into_inner) = probe;
            *self.registry.write().unwrap_or_else(PoisonError::into_inner) = registry;
        }
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        info!("llama-server configuration updated");
        Ok(())
    }

    /// Immutable snapshot of the current state.
    pub fn get_state(&self) -> ServiceState {
        self.lock_inner().snapshot()
    }

    /// Pid of the managed process, if one is running.
    pub fn pid(&self) -> Option<u32> {
        self.lock_inner().process.as_ref().and_then(|slot| slot.pid)
    }

    /// Register an observer invoked after every state change.
    pub fn on_state_change<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(&ServiceState) + Send + Sync + 'static,
    {
        self.observers.register(Arc::new(callback))
    }

    /// Probe readiness once. Never fails.
    pub async fn health_check(&self) -> bool {
        self.probe().probe().await
    }

    /// Spawn the managed process and begin readiness polling.
    ///
    /// Returns immediately while `starting` or `ready`. A spawn failure is
    /// the only error: everything after the spawn is reported through state.
    pub async fn start(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let _op = self.op_lock.lock().await;
        self.spawn_process(SpawnKind::Operator)
    }

    /// Terminate the managed process and return to `initial`.
    ///
    /// No-op when no process exists.
    pub async fn stop(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let _op = self.op_lock.lock().await;

        let (slot, snapshot) = {
            let mut inner = self.lock_inner();
            if let Some(recovery) = inner.recovery.take() {
                debug!("Cancelling pending crash recovery");
                recovery.cancel();
            }
            let Some(slot) = inner.process.take() else {
                return Ok(());
            };
            inner.state.status = ServiceStatus::Stopping;
            (slot, inner.transition())
        };
        self.observers.notify(snapshot);
        info!(pid = ?slot.pid, "Stopping llama-server");

        slot.poll_cancel.cancel();
        match self.terminate(slot).await {
            Some(exit) => info!(%exit, "llama-server stopped"),
            None => debug!("llama-server had already exited"),
        }

        let snapshot = {
            let mut inner = self.lock_inner();
            inner.state.status = ServiceStatus::Initial;
            inner.state.started_at = None;
            inner.state.models.clear();
            inner.transition()
        };
        self.observers.notify(snapshot);
        Ok(())
    }

    /// Query the managed process for its models and replace the list.
    pub async fn load_models(&self) -> Result<Vec<ModelSummary>, SupervisorError> {
        let epoch = self.running_epoch()?;
        let models = self.registry().list_models().await?;

        let snapshot = {
            let mut inner = self.lock_inner();
            if !inner.owns(epoch) {
                debug!("Discarding model list from a process that is gone");
                return Ok(models);
            }
            inner.state.models.clone_from(&models);
            inner.transition()
        };
        debug!(count = models.len(), "Model list refreshed");
        self.observers.notify(snapshot);
        Ok(models)
    }

    /// Ask the managed process to load `model_id`, then refresh the list.
    pub async fn load_model(&self, model_id: &str) -> Result<(), SupervisorError> {
        self.running_epoch()?;
        self.registry().load_model(model_id).await?;
        info!(model = %model_id, "Model loaded");
        self.refresh_after_change().await;
        Ok(())
    }

    /// Ask the managed process to unload `model_id`, then refresh the list.
    pub async fn unload_model(&self, model_id: &str) -> Result<(), SupervisorError> {
        self.running_epoch()?;
        self.registry().unload_model(model_id).await?;
        info!(model = %model_id, "Model unloaded");
        self.refresh_after_change().await;
        Ok(())
    }

    async fn refresh_after_change(&self) {
        if let Err(e) = self.load_models().await {
            warn!(error = %e, "Failed to refresh model list");
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn probe(&self) -> Arc<dyn HealthProbe> {
        self.probe.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn registry(&self) -> Arc<dyn ModelRegistryPort> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn running_epoch(&self) -> Result<u64, SupervisorError> {
        self.lock_inner()
            .process
            .as_ref()
            .map(|slot| slot.epoch)
            .ok_or(SupervisorError::NotRunning)
    }

    /// Spawn a new process. Callers must hold `op_lock`.
    ///
    /// A failed recovery spawn leaves the supervisor `crashed` so the retry
    /// budget keeps applying; a failed operator spawn is an `error`.
    fn spawn_process(self: &Arc<Self>, kind: SpawnKind) -> Result<(), SupervisorError> {
        {
            let mut inner = self.lock_inner();
            if inner.state.status.is_active() {
                debug!(status = %inner.state.status, "start() ignored, already active");
                return Ok(());
            }
            if let Some(recovery) = inner.recovery.take() {
                recovery.cancel();
            }
        }

        let spec = launch_spec(&self.config());
        let child = match self.launcher.launch(&spec, self.log_sink.clone()) {
            Ok(child) => child,
            Err(e) => {
                let message = e.to_string();
                error!(error = %message, "Failed to spawn llama-server");
                let snapshot = {
                    let mut inner = self.lock_inner();
                    inner.state.status = match kind {
                        SpawnKind::Operator => ServiceStatus::Error,
                        SpawnKind::Recovery => ServiceStatus::Crashed,
                    };
                    inner.state.last_error = Some(message.clone());
                    inner.state.started_at = None;
                    inner.transition()
                };
                self.observers.notify(snapshot);
                return Err(SupervisorError::Spawn(message));
            }
        };

        let pid = child.pid();
        let poll_cancel = CancellationToken::new();
        let (stop_tx, stop_rx) = oneshot::channel();

        let (epoch, snapshot) = {
            let mut inner = self.lock_inner();
            inner.epoch += 1;
            let epoch = inner.epoch;
            inner.process = Some(ProcessSlot {
                epoch,
                pid,
                kind,
                poll_cancel: poll_cancel.clone(),
                stop_tx,
            });
            inner.state.status = ServiceStatus::Starting;
            inner.state.last_error = None;
            inner.state.started_at = Some(Utc::now());
            inner.state.models.clear();
            (epoch, inner.transition())
        };
        info!(pid = ?pid, epoch, "llama-server starting");
        self.observers.notify(snapshot);

        tokio::spawn(Arc::clone(self).reap(epoch, child, stop_rx));
        tokio::spawn(Arc::clone(self).poll_readiness(epoch, poll_cancel));
        Ok(())
    }

    /// Ask the reaper to shut the process down and wait for it.
    ///
    /// Returns `None` when the process had already exited.
    async fn terminate(&self, slot: ProcessSlot) -> Option<ExitInfo> {
        let (done_tx, done_rx) = oneshot::channel();
        if slot.stop_tx.send(done_tx).is_err() {
            return None;
        }

        let bound = self.settings.stop_grace() + REAP_SLACK;
        match timeout(bound, done_rx).await {
            Ok(Ok(Ok(exit))) => Some(exit),
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "Failed to shut llama-server down cleanly");
                None
            }
            Ok(Err(_)) => None,
            Err(_) => {
                error!(
                    bound_secs = bound.as_secs(),
                    "llama-server shutdown did not complete in time"
                );
                None
            }
        }
    }

    /// Own the child until it exits or a stop is requested.
    async fn reap(
        self: Arc<Self>,
        epoch: u64,
        mut child: Box<dyn ManagedChild>,
        stop_rx: oneshot::Receiver<ShutdownReply>,
    ) {
        enum Outcome {
            Exited(Result<ExitInfo, ProcessError>),
            Stop(Option<ShutdownReply>),
        }

        let outcome = tokio::select! {
            result = child.wait() => Outcome::Exited(result),
            request = stop_rx => Outcome::Stop(request.ok()),
        };

        match outcome {
            Outcome::Exited(result) => self.on_exit(epoch, result).await,
            Outcome::Stop(reply) => {
                let result = child.shutdown(self.settings.stop_grace()).await;
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
        }
    }

    /// Handle an exit that nobody asked for.
    ///
    /// An exit while `ready` is a crash. So is an exit while `starting` a
    /// process spawned by crash recovery. Anything else is a startup error.
    async fn on_exit(self: Arc<Self>, epoch: u64, result: Result<ExitInfo, ProcessError>) {
        let exit = match &result {
            Ok(exit) => exit.to_string(),
            Err(e) => e.to_string(),
        };

        let (recovery, snapshot) = {
            let mut inner = self.lock_inner();
            if !inner.owns(epoch) {
                return;
            }
            let Some(slot) = inner.process.take() else {
                return;
            };
            slot.poll_cancel.cancel();
            inner.state.started_at = None;
            inner.state.models.clear();

            let crashed = match inner.state.status {
                ServiceStatus::Ready => true,
                ServiceStatus::Starting => slot.kind == SpawnKind::Recovery,
                _ => false,
            };

            let mut recovery = None;
            if crashed {
                inner.state.status = ServiceStatus::Crashed;
                inner.state.last_error = Some(format!("llama-server crashed ({exit})"));
                recovery = self.begin_recovery(&mut inner);
            } else {
                inner.state.status = ServiceStatus::Error;
                inner.state.last_error =
                    Some(format!("llama-server exited during startup ({exit})"));
            }
            (recovery, inner.transition())
        };

        let (status, retries) = (snapshot.state().status, snapshot.state().retries);
        self.observers.notify(snapshot);

        match recovery {
            Some((attempt, token)) => {
                warn!(
                    %exit,
                    attempt,
                    max_retries = self.settings.max_retries,
                    "llama-server crashed, restarting"
                );
                self.recover(attempt, token).await;
            }
            None if status == ServiceStatus::Crashed => {
                error!(%exit, retries, "llama-server crashed, giving up");
            }
            None => warn!(%exit, "llama-server exited before becoming ready"),
        }
    }

    /// Consume one retry if the budget allows it.
    fn begin_recovery(&self, inner: &mut Inner) -> Option<(u32, CancellationToken)> {
        if inner.state.retries >= self.settings.max_retries {
            return None;
        }
        inner.state.retries += 1;
        let token = CancellationToken::new();
        inner.recovery = Some(token.clone());
        Some((inner.state.retries, token))
    }

    /// Restart after a crash, with backoff, until a spawn succeeds, the
    /// retry budget runs out, or the recovery is cancelled.
    async fn recover(self: Arc<Self>, attempt: u32, token: CancellationToken) {
        let backoff = self.settings.restart_backoff();
        let mut next = Some((attempt, token));

        while let Some((attempt, token)) = next.take() {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(attempt, "Crash recovery cancelled");
                    return;
                }
                () = sleep(backoff.delay(attempt)) => {}
            }

            let _op = self.op_lock.lock().await;
            {
                let mut inner = self.lock_inner();
                if token.is_cancelled() || inner.state.status != ServiceStatus::Crashed {
                    debug!(attempt, "Crash recovery superseded");
                    return;
                }
                inner.recovery = None;
            }

            let Err(e) = self.spawn_process(SpawnKind::Recovery) else {
                return;
            };

            let snapshot = {
                let mut inner = self.lock_inner();
                next = self.begin_recovery(&mut inner);
                inner.transition()
            };
            if next.is_some() {
                warn!(attempt, error = %e, "Crash recovery spawn failed, retrying");
                self.observers.notify(snapshot);
            } else {
                error!(attempt, error = %e, "Crash recovery spawn failed, giving up");
            }
        }
    }

    /// Probe on a fixed interval until ready, cancelled, or timed out.
    async fn poll_readiness(self: Arc<Self>, epoch: u64, cancel: CancellationToken) {
        let interval = self.settings.poll_interval();
        let deadline = Instant::now() + self.settings.startup_timeout();

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = sleep(interval) => {}
            }

            // An in-flight probe is allowed to finish; its result is
            // ignored once the process has left `starting`.
            if self.probe().probe().await {
                if self.mark_ready(epoch) {
                    if let Err(e) = self.load_models().await {
                        warn!(error = %e, "Failed to load model list after startup");
                    }
                }
                return;
            }

            if cancel.is_cancelled() {
                return;
            }
            if Instant::now() >= deadline {
                self.startup_timed_out(epoch).await;
                return;
            }
            debug!(epoch, "llama-server not ready yet");
        }
    }

    fn mark_ready(&self, epoch: u64) -> bool {
        let snapshot = {
            let mut inner = self.lock_inner();
            if !inner.owns(epoch) || inner.state.status != ServiceStatus::Starting {
                return false;
            }
            inner.state.status = ServiceStatus::Ready;
            inner.state.retries = 0;
            inner.transition()
        };
        info!(epoch, "llama-server is ready");
        self.observers.notify(snapshot);
        true
    }

    async fn startup_timed_out(self: Arc<Self>, epoch: u64) {
        let _op = self.op_lock.lock().await;

        let slot = {
            let mut inner = self.lock_inner();
            if !inner.owns(epoch) || inner.state.status != ServiceStatus::Starting {
                return;
            }
            inner.process.take()
        };
        let Some(slot) = slot else {
            return;
        };

        let secs = self.settings.startup_timeout_secs;
        error!(pid = ?slot.pid, timeout_secs = secs, "llama-server did not become ready");
        self.terminate(slot).await;

        let snapshot = {
            let mut inner = self.lock_inner();
            inner.state.status = ServiceStatus::Error;
            inner.state.last_error =
                Some(format!("llama-server did not become ready within {secs}s"));
            inner.state.started_at = None;
            inner.transition()
        };
        self.observers.notify(snapshot);
    }
}

fn http_endpoints(
    config: &ServerConfig,
    settings: &SupervisorSettings,
) -> Result<(Arc<dyn HealthProbe>, Arc<dyn ModelRegistryPort>), SupervisorError> {
    let probe = HttpHealthProber::from_config(config, settings)
        .map_err(|e| SupervisorError::Config(e.to_string()))?;
    let registry =
        HttpModelRegistry::from_config(config).map_err(|e| SupervisorError::Config(e.to_string()))?;
    Ok((Arc::new(probe), Arc::new(registry)))
}
