//! Tokio-based process launcher for llama-server.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use llamactl_core::{
    ExitInfo, LaunchSpec, ManagedChild, ProcessError, ProcessLauncher, ServerLogSinkPort,
};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use super::shutdown::shutdown_child;
use super::stream::spawn_stream_reader;

/// Spawns llama-server with piped stdout/stderr forwarded to a log sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessLauncher;

impl TokioProcessLauncher {
    pub const fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for TokioProcessLauncher {
    fn launch(
        &self,
        spec: &LaunchSpec,
        sink: Option<Arc<dyn ServerLogSinkPort>>,
    ) -> Result<Box<dyn ManagedChild>, ProcessError> {
        debug!(binary = %spec.binary.display(), args = ?spec.args, "Spawning llama-server");

        let mut cmd = Command::new(&spec.binary);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| spawn_error(spec, &e))?;

        if let Some(stdout) = child.stdout.take() {
            spawn_stream_reader(stdout, "stdout", sink.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_stream_reader(stderr, "stderr", sink);
        }

        let pid = child.id();
        info!(pid = ?pid, binary = %spec.binary.display(), "llama-server spawned");

        Ok(Box::new(TokioChild { child }))
    }
}

fn spawn_error(spec: &LaunchSpec, e: &io::Error) -> ProcessError {
    let message = match e.kind() {
        io::ErrorKind::NotFound => {
            format!("llama-server binary not found: {}", spec.binary.display())
        }
        io::ErrorKind::PermissionDenied => format!(
            "llama-server binary is not executable: {}",
            spec.binary.display()
        ),
        _ => format!("Failed to spawn llama-server: {e}"),
    };
    ProcessError::Spawn(message)
}

/// A running llama-server process.
struct TokioChild {
    child: Child,
}

fn exit_info(status: ExitStatus) -> ExitInfo {
    status.code().map_or_else(ExitInfo::signalled, ExitInfo::from_code)
}

#[async_trait]
impl ManagedChild for TokioChild {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<ExitInfo, ProcessError> {
        self.child
            .wait()
            .await
            .map(exit_info)
            .map_err(|e| ProcessError::Wait(e.to_string()))
    }

    async fn shutdown(mut self: Box<Self>, grace: Duration) -> Result<ExitInfo, ProcessError> {
        shutdown_child(&mut self.child, grace)
            .await
            .map(exit_info)
            .map_err(|e| ProcessError::Signal(e.to_string()))
    }
}
