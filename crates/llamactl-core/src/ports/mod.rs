//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces the supervisor expects from infrastructure.
//! They contain no implementation details and use only domain types.

pub mod health;
pub mod log_sink;
pub mod process;
pub mod registry;

use thiserror::Error;

pub use health::HealthProbe;
pub use log_sink::{LogTarget, ServerLogSinkPort};
pub use process::{ExitInfo, LaunchSpec, ManagedChild, ProcessLauncher};
pub use registry::{ModelRegistryPort, RegistryError};

/// Errors raised while spawning or signalling the managed process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    /// Spawning failed. The message is surfaced verbatim as `lastError`.
    #[error("{0}")]
    Spawn(String),

    /// Waiting for the process failed.
    #[error("Failed to wait for process: {0}")]
    Wait(String),

    /// Delivering a signal failed.
    #[error("Failed to signal process: {0}")]
    Signal(String),
}

/// Errors surfaced by supervisor operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    /// The process could not be spawned.
    #[error("{0}")]
    Spawn(String),

    /// The operation needs a running process.
    #[error("llama-server is not running")]
    NotRunning,

    /// The managed process rejected or failed a model operation.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The supplied configuration cannot be used.
    #[error("Invalid configuration: {0}")]
    Config(String),
}
