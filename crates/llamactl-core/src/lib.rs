//! Core domain types and port definitions for llamactl.
//!
//! This crate has no process, socket or HTTP code. It defines the state the
//! supervisor owns, the configuration records, and the port traits that the
//! runtime crate implements.

#![deny(unsafe_code)]

pub mod backoff;
pub mod config;
pub mod domain;
pub mod ports;

// Re-export commonly used types for convenience
pub use backoff::BackoffPolicy;
pub use config::{
    ConfigError, ControlSettings, DEFAULT_CONTROL_LISTEN, DEFAULT_SERVER_HOST,
    DEFAULT_SERVER_PORT, LlamactlConfig, ServerConfig, SupervisorSettings, validate_config,
};
pub use domain::{
    LogInput, LogMessage, LogRecord, ModelSummary, ServiceState, ServiceStatus,
};
pub use ports::{
    ExitInfo, HealthProbe, LaunchSpec, LogTarget, ManagedChild, ModelRegistryPort, ProcessError,
    ProcessLauncher, RegistryError, ServerLogSinkPort, SupervisorError,
};
