//! HTTP client for the llama-server model API.
//!
//! llama-server owns the model list. `/models` is read and replaced
//! wholesale by the supervisor; load and unload are forwarded as-is.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use llamactl_core::{ModelRegistryPort, ModelSummary, RegistryError, ServerConfig};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::debug;

/// Model registry backed by the llama-server HTTP API.
#[derive(Debug, Clone)]
pub struct HttpModelRegistry {
    client: Client,
    base_url: String,
}

impl HttpModelRegistry {
    /// Default request timeout. Loading multi-gigabyte weights is slow.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(server: &ServerConfig) -> reqwest::Result<Self> {
        Self::new(server.base_url(), Self::DEFAULT_TIMEOUT)
    }

    async fn post_model(&self, path: &str, model_id: &str) -> Result<(), RegistryError> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, model = %model_id, "Forwarding model operation");

        let response = self
            .client
            .post(&url)
            .json(&json!({ "model": model_id }))
            .send()
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(model_id.to_string()));
        }
        Err(RegistryError::Http {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }
}

#[async_trait]
impl ModelRegistryPort for HttpModelRegistry {
    async fn list_models(&self) -> Result<Vec<ModelSummary>, RegistryError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Http {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;
        parse_model_list(&body)
    }

    async fn load_model(&self, model_id: &str) -> Result<(), RegistryError> {
        self.post_model("/models/load", model_id).await
    }

    async fn unload_model(&self, model_id: &str) -> Result<(), RegistryError> {
        self.post_model("/models/unload", model_id).await
    }
}

/// Parse a `/models` response: a bare array, `{"models": [..]}` or
/// `{"data": [..]}`. Entries without an id or a name are skipped.
pub fn parse_model_list(body: &Value) -> Result<Vec<ModelSummary>, RegistryError> {
    let entries = match body {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("models").or_else(|| map.get("data")) {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(RegistryError::Decode(
                    "expected a model array, `models` or `data`".to_string(),
                ));
            }
        },
        _ => {
            return Err(RegistryError::Decode(
                "expected a JSON array or object".to_string(),
            ));
        }
    };

    Ok(entries.iter().filter_map(parse_entry).collect())
}

fn parse_entry(entry: &Value) -> Option<ModelSummary> {
    let id = str_field(entry, "id");
    let name = str_field(entry, "name");
    let (id, name) = match (id, name) {
        (Some(id), Some(name)) => (id, name),
        (Some(id), None) => (id.clone(), id),
        (None, Some(name)) => (name.clone(), name),
        (None, None) => return None,
    };

    let size = entry.get("size").and_then(Value::as_u64).unwrap_or(0);
    let model_type = str_field(entry, "type").unwrap_or_else(|| "unknown".to_string());
    let modified_at = entry
        .get("modified_at")
        .or_else(|| entry.get("modifiedAt"))
        .and_then(parse_timestamp);
    let available = entry
        .get("available")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    Some(ModelSummary {
        id,
        name,
        size,
        model_type,
        modified_at,
        available,
    })
}

fn str_field(entry: &Value, key: &str) -> Option<String> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// RFC 3339 strings or unix seconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

/// Pull `error.message` or `error` out of a llama-server error body.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    match value.get("error") {
        Some(Value::String(message)) => message.clone(),
        Some(err) => err
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| err.to_string(), str::to_string),
        None => body.trim().to_string(),
    }
}
