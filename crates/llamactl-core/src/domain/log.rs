//! Log records fanned out to remote observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single log record as kept in the ring buffer and broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Unique record id.
    pub id: String,
    /// Level string, matched exactly and case-sensitively.
    pub level: String,
    /// Free text. Structured payloads are serialized to JSON text.
    pub message: String,
    /// When the record was produced.
    pub timestamp: DateTime<Utc>,
    /// Fixed source tag of the broadcaster that produced the record.
    pub source: String,
    /// Optional structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
}

/// Message body before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogMessage {
    Text(String),
    Structured(Value),
}

impl LogMessage {
    /// Render to text. Strings pass through unchanged, anything else is
    /// serialized as JSON.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) | Self::Structured(Value::String(text)) => text,
            Self::Structured(value) => value.to_string(),
        }
    }
}

impl From<&str> for LogMessage {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for LogMessage {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Value> for LogMessage {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

/// Caller-provided log entry. Missing fields are filled in by the broadcaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogInput {
    pub id: Option<String>,
    pub level: Option<String>,
    pub message: LogMessage,
    pub timestamp: Option<DateTime<Utc>>,
    pub context: Option<Map<String, Value>>,
}

impl LogInput {
    pub fn new(message: impl Into<LogMessage>) -> Self {
        Self {
            id: None,
            level: None,
            message: message.into(),
            timestamp: None,
            context: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Add one context entry, creating the map if needed.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }
}
