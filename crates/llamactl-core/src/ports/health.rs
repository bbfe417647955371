//! Readiness probe port.

use async_trait::async_trait;

/// Answers whether the managed process is ready to serve.
///
/// Implementations must never error: an unreachable or unhealthy process is
/// simply `false`.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> bool;
}
