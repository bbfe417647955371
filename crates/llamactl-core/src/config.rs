//! Configuration types and validation.
//!
//! These are pure data types with no infrastructure dependencies. The binary
//! loads them from an optional JSON file and then applies environment
//! overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backoff::BackoffPolicy;

/// Default host the managed process binds to.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default port of the managed process HTTP surface.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default address of the control-plane endpoint.
pub const DEFAULT_CONTROL_LISTEN: &str = "127.0.0.1:7070";

/// Launch configuration for the managed inference server.
///
/// Every optional field maps to exactly one command-line flag. A `None`
/// field never produces a flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Path or name of the server executable (not passed as an argument).
    pub binary: PathBuf,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Single model to serve.
    pub model_path: Option<PathBuf>,
    /// Directory of models (router mode).
    pub models_dir: Option<PathBuf>,
    /// Maximum number of models loaded at once (router mode).
    pub models_max: Option<u32>,
    /// `Some(false)` disables automatic loading of requested models.
    pub models_autoload: Option<bool>,
    pub ctx_size: Option<u32>,
    pub batch_size: Option<u32>,
    pub ubatch_size: Option<u32>,
    pub threads: Option<u32>,
    pub threads_http: Option<u32>,
    pub gpu_layers: Option<i32>,
    pub main_gpu: Option<u32>,
    pub split_mode: Option<String>,
    pub tensor_split: Option<String>,
    pub flash_attn: Option<bool>,
    /// `Some(false)` disables memory mapping of the weights.
    pub mmap: Option<bool>,
    pub mlock: Option<bool>,
    pub jinja: Option<bool>,
    /// Expose the Prometheus-style metrics endpoint.
    pub metrics: Option<bool>,
    pub temperature: Option<f32>,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
    pub min_p: Option<f32>,
    pub repeat_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub mirostat: Option<u8>,
    pub mirostat_lr: Option<f32>,
    pub mirostat_ent: Option<f32>,
    pub seed: Option<i64>,
    /// Appended verbatim after all generated flags.
    pub extra_args: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("llama-server"),
            host: Some(DEFAULT_SERVER_HOST.to_string()),
            port: Some(DEFAULT_SERVER_PORT),
            model_path: None,
            models_dir: None,
            models_max: None,
            models_autoload: None,
            ctx_size: None,
            batch_size: None,
            ubatch_size: None,
            threads: None,
            threads_http: None,
            gpu_layers: None,
            main_gpu: None,
            split_mode: None,
            tensor_split: None,
            flash_attn: None,
            mmap: None,
            mlock: None,
            jinja: None,
            metrics: Some(true),
            temperature: None,
            top_k: None,
            top_p: None,
            min_p: None,
            repeat_penalty: None,
            presence_penalty: None,
            frequency_penalty: None,
            mirostat: None,
            mirostat_lr: None,
            mirostat_ent: None,
            seed: None,
            extra_args: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Host used to reach the managed process (with default fallback).
    pub fn effective_host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_SERVER_HOST)
    }

    /// Port used to reach the managed process (with default fallback).
    pub const fn effective_port(&self) -> u16 {
        match self.port {
            Some(port) => port,
            None => DEFAULT_SERVER_PORT,
        }
    }

    /// Base URL of the managed process HTTP surface.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.effective_host(), self.effective_port())
    }
}

/// Lifecycle policy of the process supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SupervisorSettings {
    /// Automatic restarts allowed after a crash before giving up.
    pub max_retries: u32,
    /// Interval between readiness probes while starting.
    pub poll_interval_ms: u64,
    /// Overall bound on the starting phase.
    pub startup_timeout_secs: u64,
    /// Timeout of a single readiness probe.
    pub probe_timeout_ms: u64,
    /// Grace period between SIGTERM and SIGKILL.
    pub stop_grace_secs: u64,
    /// Delay before a crash-triggered restart.
    pub restart_delay_ms: u64,
    /// Readiness path on the managed process.
    pub readiness_path: String,
    /// Source tag attached to every log record.
    pub log_source: String,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            poll_interval_ms: 1000,
            startup_timeout_secs: 60,
            probe_timeout_ms: 2000,
            stop_grace_secs: 5,
            restart_delay_ms: 1000,
            readiness_path: "/health".to_string(),
            log_source: "llama-service".to_string(),
        }
    }
}

impl SupervisorSettings {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub const fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub const fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Crash recovery backoff: `restart_delay` doubling per attempt, capped at 30s.
    pub const fn restart_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.restart_delay(), Duration::from_secs(30))
    }
}

/// Control-plane endpoint and client timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControlSettings {
    /// Address the control endpoint listens on (and clients connect to).
    pub listen: String,
    /// How long a call waits for the bus to connect before failing.
    pub connect_wait_ms: u64,
    /// Base delay of the reconnection backoff.
    pub reconnect_base_ms: u64,
    /// Cap of the reconnection backoff.
    pub reconnect_max_secs: u64,
    /// Interval of the `metrics` push stream.
    pub metrics_interval_secs: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            listen: DEFAULT_CONTROL_LISTEN.to_string(),
            connect_wait_ms: 5000,
            reconnect_base_ms: 1000,
            reconnect_max_secs: 30,
            metrics_interval_secs: 3,
        }
    }
}

impl ControlSettings {
    pub const fn connect_wait(&self) -> Duration {
        Duration::from_millis(self.connect_wait_ms)
    }

    pub const fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub const fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_secs)
    }

    pub const fn reconnect_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.reconnect_base(), self.reconnect_max())
    }

    pub const fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LlamactlConfig {
    pub server: ServerConfig,
    pub supervisor: SupervisorSettings,
    pub control: ControlSettings,
}

impl LlamactlConfig {
    /// Load a configuration file. Missing sections fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// Recognized keys: `LLAMA_SERVER_BIN`, `LLAMA_SERVER_HOST`,
    /// `LLAMA_SERVER_PORT`, `LLAMACTL_LISTEN`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bin) = lookup("LLAMA_SERVER_BIN") {
            debug!(%bin, "llama-server binary overridden from environment");
            self.server.binary = PathBuf::from(bin);
        }
        if let Some(host) = lookup("LLAMA_SERVER_HOST") {
            self.server.host = Some(host);
        }
        if let Some(raw) = lookup("LLAMA_SERVER_PORT") {
            let port = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: "LLAMA_SERVER_PORT".to_string(),
                value: raw.clone(),
            })?;
            self.server.port = Some(port);
        }
        if let Some(listen) = lookup("LLAMACTL_LISTEN") {
            self.control.listen = listen;
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {reason}", path.display())]
    Io { path: PathBuf, reason: String },

    #[error("Invalid config file {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid value '{value}' for {key}")]
    InvalidEnv { key: String, value: String },

    #[error("Port should be >= 1024 (privileged ports require root), got {0}")]
    InvalidPort(u16),

    #[error("Host cannot be empty")]
    EmptyHost,

    #[error("Context size must be between 512 and 1,000,000, got {0}")]
    InvalidContextSize(u32),

    #[error("Batch size must be greater than zero")]
    InvalidBatchSize,

    #[error("Readiness poll interval must be greater than zero")]
    InvalidPollInterval,

    #[error("Startup timeout ({timeout_ms}ms) is shorter than the poll interval ({poll_ms}ms)")]
    StartupTimeoutTooShort { timeout_ms: u64, poll_ms: u64 },

    #[error("Reconnect backoff base and cap must be greater than zero")]
    InvalidReconnectBackoff,
}

/// Validate a configuration.
pub fn validate_config(config: &LlamactlConfig) -> Result<(), ConfigError> {
    let server = &config.server;

    if let Some(port) = server.port
        && port < 1024
    {
        return Err(ConfigError::InvalidPort(port));
    }

    if server.host.as_deref().is_some_and(|h| h.trim().is_empty()) {
        return Err(ConfigError::EmptyHost);
    }

    if let Some(ctx) = server.ctx_size
        && !(512..=1_000_000).contains(&ctx)
    {
        return Err(ConfigError::InvalidContextSize(ctx));
    }

    if server.batch_size == Some(0) || server.ubatch_size == Some(0) {
        return Err(ConfigError::InvalidBatchSize);
    }

    let supervisor = &config.supervisor;
    if supervisor.poll_interval_ms == 0 {
        return Err(ConfigError::InvalidPollInterval);
    }

    let timeout_ms = supervisor.startup_timeout_secs.saturating_mul(1000);
    if timeout_ms < supervisor.poll_interval_ms {
        return Err(ConfigError::StartupTimeoutTooShort {
            timeout_ms,
            poll_ms: supervisor.poll_interval_ms,
        });
    }

    let control = &config.control;
    if control.reconnect_base_ms == 0 || control.reconnect_max_secs == 0 {
        return Err(ConfigError::InvalidReconnectBackoff);
    }

    Ok(())
}
