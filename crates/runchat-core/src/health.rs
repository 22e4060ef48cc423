//! Readiness of a workflow provider.

use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// Whether a provider can take executions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceStatus {
    /// Requests can be sent.
    #[default]
    Healthy,
    /// Requests would fail, see [`ServiceHealth::message`].
    Unhealthy,
}

/// Result of [`WorkflowService::health_check`](crate::provider::WorkflowService::health_check).
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    /// Readiness of the provider.
    pub status: ServiceStatus,
    /// Why the provider is not ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the check ran.
    pub checked_at: Timestamp,
}

impl ServiceHealth {
    /// A provider ready for requests.
    pub fn healthy() -> Self {
        Self {
            status: ServiceStatus::Healthy,
            message: None,
            checked_at: Timestamp::now(),
        }
    }

    /// A provider that cannot take requests, with the reason.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ServiceStatus::Unhealthy,
            message: Some(message.into()),
            checked_at: Timestamp::now(),
        }
    }

    /// Whether executions can be sent.
    pub fn is_available(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }
}

impl fmt::Display for ServiceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {message}", self.status),
            None => write!(f, "{}", self.status),
        }
    }
}
