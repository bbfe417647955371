//! Process launcher port.
//!
//! The supervisor never touches OS process APIs directly. It asks a
//! `ProcessLauncher` for a `ManagedChild` and drives it through this trait,
//! which keeps the lifecycle logic testable with fake children.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::ProcessError;
use super::log_sink::ServerLogSinkPort;

/// Fully resolved launch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub binary: PathBuf,
    pub args: Vec<String>,
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    pub success: bool,
}

impl ExitInfo {
    pub const fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            success: code == 0,
        }
    }

    pub const fn signalled() -> Self {
        Self {
            code: None,
            success: false,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// A spawned process owned by the supervisor.
#[async_trait]
pub trait ManagedChild: Send {
    /// OS process id, if still known.
    fn pid(&self) -> Option<u32>;

    /// Wait for the process to exit on its own.
    ///
    /// Must be cancel-safe: dropping the future leaves the child intact.
    async fn wait(&mut self) -> Result<ExitInfo, ProcessError>;

    /// Terminate gracefully, escalating to a forced kill after `grace`.
    async fn shutdown(self: Box<Self>, grace: Duration) -> Result<ExitInfo, ProcessError>;
}

/// Spawns managed processes.
pub trait ProcessLauncher: Send + Sync {
    /// Spawn `spec`, forwarding stdout/stderr lines to `sink` when provided.
    fn launch(
        &self,
        spec: &LaunchSpec,
        sink: Option<Arc<dyn ServerLogSinkPort>>,
    ) -> Result<Box<dyn ManagedChild>, ProcessError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_info_display() {
        assert_eq!(ExitInfo::from_code(139).to_string(), "exit code 139");
        assert_eq!(ExitInfo::signalled().to_string(), "terminated by signal");
        assert!(ExitInfo::from_code(0).success);
    }
}
