//! Control plane for llamactl.
//!
//! Many callers share one link to the control server. Each call is tagged
//! with an id and correlated with its reply; standing subscriptions carry
//! pushed state, log and metrics events. The client keeps the link alive
//! across drops and restores its subscriptions after recovery.

#![deny(unsafe_code)]

pub mod client;
pub mod correlator;
pub mod error;
pub mod frame;
pub mod operation;
pub mod reconnect;
pub mod server;
pub mod service;
pub mod transport;

pub use client::ControlClient;
pub use correlator::Correlator;
pub use error::{CallError, OperationError, TransportError};
pub use frame::{Frame, PushEvent, Subscription};
pub use operation::{LONG_TIMEOUT, LogQuery, ModelTarget, Operation, SHORT_TIMEOUT, TimeoutClass};
pub use reconnect::{ConnectionState, ConnectionStatus, ReconnectionController, SubscriptionSet};
pub use server::ControlServer;
pub use service::ControlService;
pub use transport::{Connector, Link, MemoryConnector, TcpConnector};
