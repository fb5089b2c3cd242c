//! Health and service-info records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::service::SERVICE_NAME;

/// Outcome of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Service info could not be assembled.
    Error,
}

/// Snapshot returned by `EmbeddingService::health_check`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    pub initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Report for a loaded model.
    #[must_use]
    pub fn healthy(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            status: HealthStatus::Healthy,
            model: Some(model.into()),
            dimension: Some(dimension),
            initialized: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Report for a failed check.
    #[must_use]
    pub fn unhealthy(error: impl Into<String>, initialized: bool) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            model: None,
            dimension: None,
            initialized,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    /// Whether the check passed.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Descriptive metadata about the running service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub model: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    /// Where inference runs.
    pub execution: String,
    pub cost: String,
    pub rate_limit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceInfo {
    /// Build from a health report.
    ///
    /// An unhealthy report collapses into `status: error` carrying its message.
    #[must_use]
    pub fn from_health(model: impl Into<String>, health: &HealthReport) -> Self {
        let (status, error) = if health.is_healthy() {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Error,
                Some(
                    health
                        .error
                        .clone()
                        .unwrap_or_else(|| "health check failed".to_string()),
                ),
            )
        };

        Self {
            name: SERVICE_NAME.to_string(),
            model: model.into(),
            status,
            dimension: health.dimension,
            execution: "local".to_string(),
            cost: "free".to_string(),
            rate_limit: "none".to_string(),
            error,
        }
    }
}
