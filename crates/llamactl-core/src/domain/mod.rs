//! Domain types shared by the supervisor, the control plane and adapters.

mod log;
mod model;
mod state;

pub use log::{LogInput, LogMessage, LogRecord};
pub use model::ModelSummary;
pub use state::{ServiceState, ServiceStatus};
