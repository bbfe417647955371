//! Server-side operation dispatch.

use std::sync::Arc;

use llamactl_core::{ControlSettings, LlamactlConfig, ServerConfig, validate_config};
use llamactl_runtime::{HostMetrics, LogBroadcaster, MetricsCollector, Supervisor};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::operation::{LogQuery, ModelTarget, Operation};

/// Executes control operations against one supervisor.
pub struct ControlService {
    supervisor: Arc<Supervisor>,
    logs: Arc<LogBroadcaster>,
    metrics: MetricsCollector,
    control: ControlSettings,
}

impl ControlService {
    pub fn new(
        supervisor: Arc<Supervisor>,
        logs: Arc<LogBroadcaster>,
        control: ControlSettings,
    ) -> Self {
        Self {
            supervisor,
            logs,
            metrics: MetricsCollector::new(),
            control,
        }
    }

    pub const fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub const fn logs(&self) -> &Arc<LogBroadcaster> {
        &self.logs
    }

    pub const fn control_settings(&self) -> &ControlSettings {
        &self.control
    }

    pub async fn sample_metrics(&self) -> HostMetrics {
        self.metrics.sample(&self.supervisor.get_state()).await
    }

    /// Run `op`. Errors are rendered to the message sent back to the caller.
    pub async fn handle(&self, op: Operation) -> Result<Value, String> {
        debug!(event = op.event_name(), "Handling control operation");
        match op {
            Operation::ConfigGet => to_json(&self.supervisor.config()),
            Operation::ConfigUpdate(config) => self.update_config(*config),
            Operation::SettingsGet => Ok(json!({
                "supervisor": self.supervisor.settings(),
                "control": self.control,
            })),
            Operation::ServiceStart => {
                self.supervisor.start().await.map_err(|e| e.to_string())?;
                to_json(&self.supervisor.get_state())
            }
            Operation::ServiceStop => {
                self.supervisor.stop().await.map_err(|e| e.to_string())?;
                to_json(&self.supervisor.get_state())
            }
            Operation::ServiceStatus => to_json(&self.supervisor.get_state()),
            Operation::ServiceHealth => {
                let healthy = self.supervisor.health_check().await;
                Ok(json!({ "healthy": healthy }))
            }
            Operation::ModelsList => to_json(&self.supervisor.get_state().models),
            Operation::ModelsRefresh => {
                let models = self
                    .supervisor
                    .load_models()
                    .await
                    .map_err(|e| e.to_string())?;
                to_json(&models)
            }
            Operation::ModelsLoad(ModelTarget { model_id }) => {
                self.supervisor
                    .load_model(&model_id)
                    .await
                    .map_err(|e| e.to_string())?;
                to_json(&self.supervisor.get_state().models)
            }
            Operation::ModelsUnload(ModelTarget { model_id }) => {
                self.supervisor
                    .unload_model(&model_id)
                    .await
                    .map_err(|e| e.to_string())?;
                to_json(&self.supervisor.get_state().models)
            }
            Operation::LogsGet(LogQuery { level }) => match level {
                Some(level) => to_json(&self.logs.get_logs_by_level(&level)),
                None => to_json(&self.logs.get_logs()),
            },
            Operation::LogsClear => {
                self.logs.clear_queue();
                Ok(Value::Null)
            }
            Operation::MetricsGet => to_json(&self.sample_metrics().await),
        }
    }

    fn update_config(&self, server: ServerConfig) -> Result<Value, String> {
        let candidate = LlamactlConfig {
            server,
            supervisor: self.supervisor.settings().clone(),
            control: self.control.clone(),
        };
        validate_config(&candidate).map_err(|e| e.to_string())?;
        self.supervisor
            .update_config(candidate.server.clone())
            .map_err(|e| e.to_string())?;
        info!("Configuration replaced over the control plane");
        to_json(&candidate.server)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| format!("Failed to encode reply: {e}"))
}
