//! The closed set of control-plane operations.
//!
//! Every request frame names one of these by its `<domain>:<verb>` event
//! string. Parsing happens once at the edge; everything past it matches
//! exhaustively on [`Operation`].

use std::time::Duration;

use llamactl_core::ServerConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OperationError;

/// Deadline for quick configuration reads and writes.
pub const SHORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for everything else, model loads included.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(120);

/// Deadline tier of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    Short,
    Long,
}

impl TimeoutClass {
    pub const fn duration(self) -> Duration {
        match self {
            Self::Short => SHORT_TIMEOUT,
            Self::Long => LONG_TIMEOUT,
        }
    }
}

/// Payload naming a single model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTarget {
    pub model_id: String,
}

/// Optional filter for `logs:get`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// A control-plane operation with its decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    ConfigGet,
    ConfigUpdate(Box<ServerConfig>),
    SettingsGet,
    ServiceStart,
    ServiceStop,
    ServiceStatus,
    ServiceHealth,
    ModelsList,
    ModelsRefresh,
    ModelsLoad(ModelTarget),
    ModelsUnload(ModelTarget),
    LogsGet(LogQuery),
    LogsClear,
    MetricsGet,
}

impl Operation {
    /// Every event name the server understands.
    pub const EVENTS: [&'static str; 14] = [
        "config:get",
        "config:update",
        "settings:get",
        "service:start",
        "service:stop",
        "service:status",
        "service:health",
        "models:list",
        "models:refresh",
        "models:load",
        "models:unload",
        "logs:get",
        "logs:clear",
        "metrics:get",
    ];

    pub fn load(model_id: impl Into<String>) -> Self {
        Self::ModelsLoad(ModelTarget {
            model_id: model_id.into(),
        })
    }

    pub fn unload(model_id: impl Into<String>) -> Self {
        Self::ModelsUnload(ModelTarget {
            model_id: model_id.into(),
        })
    }

    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::ConfigGet => "config:get",
            Self::ConfigUpdate(_) => "config:update",
            Self::SettingsGet => "settings:get",
            Self::ServiceStart => "service:start",
            Self::ServiceStop => "service:stop",
            Self::ServiceStatus => "service:status",
            Self::ServiceHealth => "service:health",
            Self::ModelsList => "models:list",
            Self::ModelsRefresh => "models:refresh",
            Self::ModelsLoad(_) => "models:load",
            Self::ModelsUnload(_) => "models:unload",
            Self::LogsGet(_) => "logs:get",
            Self::LogsClear => "logs:clear",
            Self::MetricsGet => "metrics:get",
        }
    }

    /// Configuration reads and writes get the short deadline.
    pub const fn timeout_class(&self) -> TimeoutClass {
        match self {
            Self::ConfigGet | Self::ConfigUpdate(_) | Self::SettingsGet => TimeoutClass::Short,
            Self::ServiceStart
            | Self::ServiceStop
            | Self::ServiceStatus
            | Self::ServiceHealth
            | Self::ModelsList
            | Self::ModelsRefresh
            | Self::ModelsLoad(_)
            | Self::ModelsUnload(_)
            | Self::LogsGet(_)
            | Self::LogsClear
            | Self::MetricsGet => TimeoutClass::Long,
        }
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout_class().duration()
    }

    /// Payload as sent on the wire. Operations without arguments send none.
    pub fn payload(&self) -> Option<Value> {
        let encoded = match self {
            Self::ConfigUpdate(config) => serde_json::to_value(config),
            Self::ModelsLoad(target) | Self::ModelsUnload(target) => serde_json::to_value(target),
            Self::LogsGet(query) if query.level.is_some() => serde_json::to_value(query),
            _ => return None,
        };
        encoded.ok()
    }

    /// Decode an event name and optional payload.
    pub fn parse(event: &str, payload: Option<Value>) -> Result<Self, OperationError> {
        let op = match event {
            "config:get" => Self::ConfigGet,
            "config:update" => Self::ConfigUpdate(Box::new(decode(event, payload)?)),
            "settings:get" => Self::SettingsGet,
            "service:start" => Self::ServiceStart,
            "service:stop" => Self::ServiceStop,
            "service:status" => Self::ServiceStatus,
            "service:health" => Self::ServiceHealth,
            "models:list" => Self::ModelsList,
            "models:refresh" => Self::ModelsRefresh,
            "models:load" => Self::ModelsLoad(decode(event, payload)?),
            "models:unload" => Self::ModelsUnload(decode(event, payload)?),
            "logs:get" => Self::LogsGet(match payload {
                None | Some(Value::Null) => LogQuery::default(),
                payload => decode(event, payload)?,
            }),
            "logs:clear" => Self::LogsClear,
            "metrics:get" => Self::MetricsGet,
            other => return Err(OperationError::UnknownEvent(other.to_string())),
        };
        Ok(op)
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    event: &str,
    payload: Option<Value>,
) -> Result<T, OperationError> {
    let invalid = |reason: String| OperationError::InvalidPayload {
        event: event.to_string(),
        reason,
    };
    let value = payload.ok_or_else(|| invalid("missing payload".to_string()))?;
    serde_json::from_value(value).map_err(|e| invalid(e.to_string()))
}
