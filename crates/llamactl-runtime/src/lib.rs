//! Process runtime and OS-level concerns for llamactl.
//!
//! Implements the core ports against real processes and HTTP, and hosts the
//! process supervisor that drives them.

#![deny(unsafe_code)]

pub mod args;
mod health;
pub mod logs;
pub mod metrics;
pub mod process;
mod registry;
pub mod supervisor;

#[cfg(test)]
mod test_support;

pub use args::{build_args, launch_spec};
pub use health::{HttpHealthProber, check_http_health};
pub use logs::{DEFAULT_LOG_SOURCE, LOG_CAPACITY, LogBroadcaster};
pub use metrics::{GpuMetrics, HostMetrics, MetricsCollector};
pub use process::TokioProcessLauncher;
pub use registry::{HttpModelRegistry, parse_model_list};
pub use supervisor::{ObserverHandle, Supervisor, SupervisorParts};
