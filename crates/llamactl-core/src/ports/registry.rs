//! Model registry port.
//!
//! The managed process owns the model list. This port exposes its
//! list/load/unload surface.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ModelSummary;

/// Errors from the managed process model endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The requested model does not exist.
    #[error("Model not found: {0}")]
    NotFound(String),

    /// The managed process could not be reached.
    #[error("llama-server unavailable: {0}")]
    Unavailable(String),

    /// The managed process answered with a failure status.
    #[error("llama-server returned {status}: {message}")]
    Http { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("Invalid response from llama-server: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ModelRegistryPort: Send + Sync {
    /// Current model list, in server order.
    async fn list_models(&self) -> Result<Vec<ModelSummary>, RegistryError>;

    async fn load_model(&self, model_id: &str) -> Result<(), RegistryError>;

    async fn unload_model(&self, model_id: &str) -> Result<(), RegistryError>;
}
