//! Workflow service wrapper with observability.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use super::WorkflowProvider;
use crate::mapper::ExecutionRequest;
use crate::response::{ExecutionResponse, StatusReport, WorkflowExample};
use crate::schema::{WorkflowId, WorkflowSchema};
use crate::{Result, ServiceHealth, TRACING_TARGET_PROVIDER};

/// Workflow service wrapper with observability.
///
/// Adds structured logging to any [`WorkflowProvider`]. The provider is kept
/// behind an `Arc`, so clones share it.
#[derive(Clone)]
pub struct WorkflowService {
    inner: Arc<dyn WorkflowProvider>,
}

impl fmt::Debug for WorkflowService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowService").finish_non_exhaustive()
    }
}

impl WorkflowService {
    /// Creates a new service wrapper.
    pub fn new<P>(provider: P) -> Self
    where
        P: WorkflowProvider + 'static,
    {
        Self {
            inner: Arc::new(provider),
        }
    }

    /// Creates a service wrapper around a shared provider.
    pub fn from_arc(provider: Arc<dyn WorkflowProvider>) -> Self {
        Self { inner: provider }
    }

    /// Fetches and parses the schema of a workflow.
    pub async fn fetch_schema(&self, workflow_id: &WorkflowId) -> Result<WorkflowSchema> {
        let started_at = Instant::now();

        tracing::debug!(
            target: TRACING_TARGET_PROVIDER,
            workflow_id = %workflow_id,
            "Fetching workflow schema"
        );

        let result = self.inner.fetch_schema(workflow_id).await;
        let elapsed = started_at.elapsed();

        match &result {
            Ok(schema) => {
                tracing::debug!(
                    target: TRACING_TARGET_PROVIDER,
                    workflow_id = %workflow_id,
                    inputs = schema.inputs.len(),
                    outputs = schema.outputs.len(),
                    elapsed_ms = elapsed.as_millis(),
                    "Workflow schema fetched"
                );
            }
            Err(error) => {
                tracing::warn!(
                    target: TRACING_TARGET_PROVIDER,
                    workflow_id = %workflow_id,
                    error = %error,
                    elapsed_ms = elapsed.as_millis(),
                    "Failed to fetch workflow schema"
                );
            }
        }

        result
    }

    /// Executes a workflow with a prepared payload.
    pub async fn execute(
        &self,
        workflow_id: &WorkflowId,
        request: &ExecutionRequest,
        instance_id: Option<&str>,
    ) -> Result<ExecutionResponse> {
        let started_at = Instant::now();

        tracing::debug!(
            target: TRACING_TARGET_PROVIDER,
            workflow_id = %workflow_id,
            values = request.len(),
            has_instance = instance_id.is_some(),
            "Executing workflow"
        );

        let result = self.inner.execute(workflow_id, request, instance_id).await;
        let elapsed = started_at.elapsed();

        match &result {
            Ok(response) => {
                tracing::debug!(
                    target: TRACING_TARGET_PROVIDER,
                    workflow_id = %workflow_id,
                    outputs = response.outputs.len(),
                    instance_id = response.instance_id.as_deref(),
                    elapsed_ms = elapsed.as_millis(),
                    "Workflow executed"
                );
            }
            Err(error) => {
                tracing::error!(
                    target: TRACING_TARGET_PROVIDER,
                    workflow_id = %workflow_id,
                    error = %error,
                    status = error.status,
                    elapsed_ms = elapsed.as_millis(),
                    "Workflow execution failed"
                );
            }
        }

        result
    }

    /// Polls server-side progress of an instance.
    pub async fn poll_status(
        &self,
        workflow_id: &WorkflowId,
        instance_id: &str,
    ) -> Result<Option<StatusReport>> {
        let result = self.inner.poll_status(workflow_id, instance_id).await;

        match &result {
            Ok(Some(report)) => {
                tracing::trace!(
                    target: TRACING_TARGET_PROVIDER,
                    workflow_id = %workflow_id,
                    status = %report.status,
                    progress = report.progress,
                    "Polled workflow status"
                );
            }
            Ok(None) => {
                tracing::debug!(
                    target: TRACING_TARGET_PROVIDER,
                    workflow_id = %workflow_id,
                    "Status polling not supported"
                );
            }
            Err(error) => {
                tracing::debug!(
                    target: TRACING_TARGET_PROVIDER,
                    workflow_id = %workflow_id,
                    error = %error,
                    "Status polling failed"
                );
            }
        }

        result
    }

    /// Lists curated example workflows for a plugin.
    pub async fn list_examples(&self, plugin: &str) -> Result<Vec<WorkflowExample>> {
        let result = self.inner.list_examples(plugin).await;

        if let Err(error) = &result {
            tracing::warn!(
                target: TRACING_TARGET_PROVIDER,
                plugin,
                error = %error,
                "Failed to list example workflows"
            );
        }

        result
    }

    /// Performs a health check on the provider.
    pub async fn health_check(&self) -> Result<ServiceHealth> {
        self.inner.health_check().await
    }
}
