//! Model entries reported by the managed process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A model known to the managed inference server.
///
/// The managed process is the source of truth for this list; the supervisor
/// only mirrors it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    /// Identifier used for load/unload calls.
    pub id: String,
    /// Display name.
    pub name: String,
    /// File size in bytes (0 when the server does not report it).
    pub size: u64,
    /// Type tag such as "llama" or "qwen2" ("unknown" when absent).
    #[serde(rename = "type")]
    pub model_type: String,
    /// Last modification time of the model file, when reported.
    pub modified_at: Option<DateTime<Utc>>,
    /// Whether the managed process can serve this model.
    pub available: bool,
}

impl ModelSummary {
    /// Create an available model entry with an unknown type tag.
    pub fn new(id: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size,
            model_type: "unknown".to_string(),
            modified_at: None,
            available: true,
        }
    }

    /// Set the type tag.
    #[must_use]
    pub fn with_type(mut self, model_type: impl Into<String>) -> Self {
        self.model_type = model_type.into();
        self
    }
}
