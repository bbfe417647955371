//! Wire frames exchanged over a control link.

use chrono::Utc;
use llamactl_core::{LogRecord, ModelSummary, ServiceState};
use llamactl_runtime::HostMetrics;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A standing subscription stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subscription {
    Status,
    Models,
    Logs,
    Metrics,
}

impl Subscription {
    pub const ALL: [Self; 4] = [Self::Status, Self::Models, Self::Logs, Self::Metrics];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Models => "models",
            Self::Logs => "logs",
            Self::Metrics => "metrics",
        }
    }
}

impl std::str::FromStr for Subscription {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|sub| sub.as_str() == s)
            .ok_or_else(|| format!("unknown stream '{s}'"))
    }
}

/// Server-initiated event on a subscribed stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PushEvent {
    Log { data: LogRecord, timestamp: i64 },
    Status { data: ServiceState, timestamp: i64 },
    Models { data: Vec<ModelSummary>, timestamp: i64 },
    Metrics { data: HostMetrics, timestamp: i64 },
}

impl PushEvent {
    pub fn log(record: LogRecord) -> Self {
        Self::Log {
            data: record,
            timestamp: now_ms(),
        }
    }

    pub fn status(state: ServiceState) -> Self {
        Self::Status {
            data: state,
            timestamp: now_ms(),
        }
    }

    pub fn models(models: Vec<ModelSummary>) -> Self {
        Self::Models {
            data: models,
            timestamp: now_ms(),
        }
    }

    pub fn metrics(metrics: HostMetrics) -> Self {
        Self::Metrics {
            data: metrics,
            timestamp: now_ms(),
        }
    }

    /// The stream this event belongs to.
    pub const fn subscription(&self) -> Subscription {
        match self {
            Self::Log { .. } => Subscription::Logs,
            Self::Status { .. } => Subscription::Status,
            Self::Models { .. } => Subscription::Models,
            Self::Metrics { .. } => Subscription::Metrics,
        }
    }
}

/// One JSON object on the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "lowercase")]
pub enum Frame {
    Request {
        id: String,
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Reply {
        id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Subscribe {
        stream: Subscription,
    },
    Unsubscribe {
        stream: Subscription,
    },
    Push {
        event: PushEvent,
    },
}

impl Frame {
    /// Build the reply for request `id` from a handler result.
    pub fn reply(id: String, result: Result<Value, String>) -> Self {
        match result {
            Ok(data) => Self::Reply {
                id,
                success: true,
                data: Some(data),
                error: None,
            },
            Err(error) => Self::Reply {
                id,
                success: false,
                data: None,
                error: Some(error),
            },
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let frame = Frame::Request {
            id: "abc".to_string(),
            event: "models:list".to_string(),
            payload: None,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"frame": "request", "id": "abc", "event": "models:list"})
        );
    }

    #[test]
    fn test_error_reply_wire_shape() {
        let frame = Frame::reply("1".to_string(), Err("Model not found: x".to_string()));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"frame": "reply", "id": "1", "success": false, "error": "Model not found: x"})
        );
    }

    #[test]
    fn test_push_event_tagged_by_type() {
        let frame = Frame::Push {
            event: PushEvent::Models {
                data: Vec::new(),
                timestamp: 42,
            },
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"frame": "push", "event": {"type": "models", "data": [], "timestamp": 42}})
        );
        let back: Frame = serde_json::from_value(value).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_subscribe_parses() {
        let frame: Frame =
            serde_json::from_str(r#"{"frame":"subscribe","stream":"metrics"}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Subscribe {
                stream: Subscription::Metrics
            }
        );
    }

    #[test]
    fn test_subscription_from_str() {
        assert_eq!("logs".parse::<Subscription>(), Ok(Subscription::Logs));
        assert!("gpu".parse::<Subscription>().is_err());
    }

    #[test]
    fn test_push_subscription_mapping() {
        assert_eq!(
            PushEvent::status(ServiceState::default()).subscription(),
            Subscription::Status
        );
    }
}
