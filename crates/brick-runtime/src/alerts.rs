//! Deployment alerting for flagged step failures.

use async_trait::async_trait;
use brick_types::{RegistryId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentAlert {
    pub deployment_id: String,
    pub run_id: Uuid,
    pub brick_id: RegistryId,
    /// Serialized failure, see `BrickError::to_serialized`.
    pub error: Value,
    pub timestamp: DateTime<Utc>,
}

/// Best-effort channel notified when a step with `onError.alert` fails.
///
/// Errors returned here are logged by the executor and never replace the
/// step failure.
#[async_trait]
pub trait DeploymentAlerter: Send + Sync {
    async fn send_deployment_alert(&self, alert: DeploymentAlert) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAlerter;

#[async_trait]
impl DeploymentAlerter for NoopAlerter {
    async fn send_deployment_alert(&self, _alert: DeploymentAlert) -> Result<()> {
        Ok(())
    }
}

/// Reports alerts as `tracing` error events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlerter;

#[async_trait]
impl DeploymentAlerter for TracingAlerter {
    async fn send_deployment_alert(&self, alert: DeploymentAlert) -> Result<()> {
        tracing::error!(
            deployment_id = %alert.deployment_id,
            run_id = %alert.run_id,
            brick_id = %alert.brick_id,
            error = %alert.error,
            "Deployment alert"
        );
        Ok(())
    }
}
