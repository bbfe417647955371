//! Supervisor lifecycle state.
//!
//! `ServiceState` is owned and mutated exclusively by the process supervisor.
//! Everyone else receives cloned snapshots.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::ModelSummary;

/// Lifecycle status of the managed process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Never started, or fully stopped by an operator.
    #[default]
    Initial,
    /// Process spawned, readiness probe not yet successful.
    Starting,
    /// Readiness probe succeeded.
    Ready,
    /// Spawn failed or the process never became ready.
    Error,
    /// The process exited while ready.
    Crashed,
    /// Termination in progress.
    Stopping,
}

impl ServiceStatus {
    /// `start()` is a no-op in these states.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Ready)
    }

    /// Lowercase wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Crashed => "crashed",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of the supervisor state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceState {
    /// Current lifecycle status.
    pub status: ServiceStatus,
    /// Models reported by the managed process, in server order.
    pub models: Vec<ModelSummary>,
    /// Last failure message, cleared when a start attempt begins.
    pub last_error: Option<String>,
    /// Crash-triggered restart attempts since the last `ready`.
    pub retries: u32,
    /// Seconds since `started_at` at the time the snapshot was taken.
    pub uptime: u64,
    /// When the current process was spawned. `None` while no process exists.
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for ServiceState {
    fn default() -> Self {
        Self {
            status: ServiceStatus::Initial,
            models: Vec::new(),
            last_error: None,
            retries: 0,
            uptime: 0,
            started_at: None,
        }
    }
}

impl ServiceState {
    /// Recompute `uptime` against `now`.
    #[must_use]
    pub fn with_uptime_at(mut self, now: DateTime<Utc>) -> Self {
        self.uptime = self
            .started_at
            .map(|started| u64::try_from((now - started).num_seconds()).unwrap_or(0))
            .unwrap_or(0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_default_is_initial_without_start_time() {
        let state = ServiceState::default();
        assert_eq!(state.status, ServiceStatus::Initial);
        assert!(state.started_at.is_none());
        assert_eq!(state.retries, 0);
    }

    #[test]
    fn test_active_statuses() {
        assert!(ServiceStatus::Starting.is_active());
        assert!(ServiceStatus::Ready.is_active());
        assert!(!ServiceStatus::Crashed.is_active());
        assert!(!ServiceStatus::Stopping.is_active());
    }

    #[test]
    fn test_uptime_from_started_at() {
        let now = Utc::now();
        let state = ServiceState {
            started_at: Some(now - Duration::seconds(42)),
            ..ServiceState::default()
        };
        assert_eq!(state.with_uptime_at(now).uptime, 42);
    }

    #[test]
    fn test_state_serialization() {
        let state = ServiceState {
            status: ServiceStatus::Crashed,
            last_error: Some("exit code 139".to_string()),
            ..ServiceState::default()
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"status\":\"crashed\""));
        assert!(json.contains("\"lastError\":\"exit code 139\""));
        assert!(json.contains("\"startedAt\":null"));
    }
}
