//! Control-plane error types.

use thiserror::Error;

/// Why a control-plane call did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// No reply arrived before the call's deadline.
    #[error("Timeout: {event}")]
    Timeout { event: String },

    /// The bus did not connect within the dispatch bound.
    #[error("Connection timeout: control channel not connected")]
    ConnectionTimeout,

    /// The server answered with `success: false`.
    #[error("{0}")]
    Remote(String),

    /// The request could not be handed to the transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The client shut down while the call was pending.
    #[error("Call cancelled")]
    Cancelled,
}

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },
}

/// A request frame that does not name a known operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Invalid payload for {event}: {reason}")]
    InvalidPayload { event: String, reason: String },
}
