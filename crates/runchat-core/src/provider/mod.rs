//! Remote workflow service abstraction.

mod service;

pub use service::WorkflowService;

use crate::mapper::ExecutionRequest;
use crate::response::{ExecutionResponse, StatusReport, WorkflowExample};
use crate::schema::{WorkflowId, WorkflowSchema};
use crate::{Result, ServiceHealth};

/// Core trait for talking to the workflow service.
///
/// Implement this trait to provide a transport. Implementations map HTTP
/// statuses onto [`ErrorKind`](crate::ErrorKind) and never retry.
#[async_trait::async_trait]
pub trait WorkflowProvider: Send + Sync {
    /// Fetches and parses the schema of a workflow.
    async fn fetch_schema(&self, workflow_id: &WorkflowId) -> Result<WorkflowSchema>;

    /// Executes a workflow with a prepared payload.
    ///
    /// `instance_id` is forwarded verbatim; `None` requests a fresh instance.
    async fn execute(
        &self,
        workflow_id: &WorkflowId,
        request: &ExecutionRequest,
        instance_id: Option<&str>,
    ) -> Result<ExecutionResponse>;

    /// Polls server-side progress of an instance.
    ///
    /// Returns `None` when the service does not support status polling.
    async fn poll_status(
        &self,
        workflow_id: &WorkflowId,
        instance_id: &str,
    ) -> Result<Option<StatusReport>> {
        let _ = (workflow_id, instance_id);
        Ok(None)
    }

    /// Lists curated example workflows for a plugin.
    async fn list_examples(&self, plugin: &str) -> Result<Vec<WorkflowExample>> {
        let _ = plugin;
        Ok(Vec::new())
    }

    /// Performs a health check on the provider.
    async fn health_check(&self) -> Result<ServiceHealth>;
}
