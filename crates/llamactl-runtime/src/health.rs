//! HTTP readiness probe for the managed llama-server.
//!
//! One bounded GET per call. Retry policy lives in the supervisor's polling
//! loop, never here.

use std::time::Duration;

use async_trait::async_trait;
use llamactl_core::{HealthProbe, ServerConfig, SupervisorSettings};
use reqwest::Client;
use tracing::debug;

/// Readiness probe against `http://host:port{readiness_path}`.
#[derive(Debug, Clone)]
pub struct HttpHealthProber {
    client: Client,
    url: String,
}

impl HttpHealthProber {
    /// Create a prober for `url` with a per-request `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Create a prober for the configured server and readiness path.
    pub fn from_config(
        server: &ServerConfig,
        settings: &SupervisorSettings,
    ) -> reqwest::Result<Self> {
        let url = format!("{}{}", server.base_url(), settings.readiness_path);
        Self::new(url, settings.probe_timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Check HTTP health at `url`. Network errors and non-success statuses are
/// both "not healthy".
pub async fn check_http_health(client: &Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(response) if response.status().is_success() => true,
        Ok(response) => {
            debug!(status = %response.status(), %url, "Health check returned non-success status");
            false
        }
        Err(e) => {
            debug!(%url, error = %e, "Health check failed");
            false
        }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProber {
    async fn probe(&self) -> bool {
        check_http_health(&self.client, &self.url).await
    }
}
