//! Mock workflow provider.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use runchat_core::mapper::ExecutionRequest;
use runchat_core::provider::WorkflowProvider;
use runchat_core::response::{ExecutionResponse, StatusReport, WorkflowExample};
use runchat_core::schema::{WorkflowId, WorkflowSchema};
use runchat_core::{Error, ErrorKind, Result, ServiceHealth};
use serde_json::{Value, json};

use super::lock;

/// One call to [`WorkflowProvider::execute`] seen by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedExecution {
    /// Workflow that was executed.
    pub workflow_id: WorkflowId,
    /// Payload that was sent.
    pub request: ExecutionRequest,
    /// Instance id that was forwarded.
    pub instance_id: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    schemas: HashMap<WorkflowId, WorkflowSchema>,
    schema_error: Option<(ErrorKind, Option<u16>)>,
    response: Option<Value>,
    execute_error: Option<(ErrorKind, Option<u16>)>,
    execute_delay: Option<Duration>,
    status_reports: VecDeque<StatusReport>,
    status_stalled: bool,
    examples: Vec<WorkflowExample>,
    schema_fetches: Vec<WorkflowId>,
    executions: Vec<RecordedExecution>,
    polls: usize,
}

/// In-memory [`WorkflowProvider`].
///
/// Serves registered schemas, answers every execution with the configured
/// response body and records what it was asked.
#[derive(Debug, Clone, Default)]
pub struct MockWorkflowProvider {
    state: Arc<Mutex<State>>,
}

impl MockWorkflowProvider {
    /// Creates a provider that knows no workflows and returns no outputs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema, served for its workflow id.
    #[must_use]
    pub fn with_schema(self, schema: WorkflowSchema) -> Self {
        lock(&self.state)
            .schemas
            .insert(schema.workflow_id.clone(), schema);
        self
    }

    /// Sets the execution response body.
    #[must_use]
    pub fn with_response(self, body: Value) -> Self {
        lock(&self.state).response = Some(body);
        self
    }

    /// Makes every schema fetch fail with the given kind and HTTP status.
    #[must_use]
    pub fn with_schema_error(self, kind: ErrorKind, status: Option<u16>) -> Self {
        lock(&self.state).schema_error = Some((kind, status));
        self
    }

    /// Makes every execution fail with the given kind and HTTP status.
    #[must_use]
    pub fn with_execute_error(self, kind: ErrorKind, status: Option<u16>) -> Self {
        lock(&self.state).execute_error = Some((kind, status));
        self
    }

    /// Delays every execution.
    #[must_use]
    pub fn with_execute_delay(self, delay: Duration) -> Self {
        lock(&self.state).execute_delay = Some(delay);
        self
    }

    /// Queues status reports, returned one per poll.
    #[must_use]
    pub fn with_status_reports(self, reports: impl IntoIterator<Item = StatusReport>) -> Self {
        lock(&self.state).status_reports.extend(reports);
        self
    }

    /// Makes every status poll hang without answering.
    #[must_use]
    pub fn with_stalled_status(self) -> Self {
        lock(&self.state).status_stalled = true;
        self
    }

    /// Sets the example workflows.
    #[must_use]
    pub fn with_examples(self, examples: Vec<WorkflowExample>) -> Self {
        lock(&self.state).examples = examples;
        self
    }

    /// Workflow ids whose schema was requested, in call order.
    pub fn schema_fetches(&self) -> Vec<WorkflowId> {
        lock(&self.state).schema_fetches.clone()
    }

    /// Executions seen so far, in call order.
    pub fn executions(&self) -> Vec<RecordedExecution> {
        lock(&self.state).executions.clone()
    }

    /// Number of status polls seen so far.
    pub fn polls(&self) -> usize {
        lock(&self.state).polls
    }
}

fn failure(kind: ErrorKind, status: Option<u16>) -> Error {
    let error = Error::new(kind).with_message("mock failure");
    match status {
        Some(status) => error.with_status(status),
        None => error,
    }
}

#[async_trait::async_trait]
impl WorkflowProvider for MockWorkflowProvider {
    async fn fetch_schema(&self, workflow_id: &WorkflowId) -> Result<WorkflowSchema> {
        let mut state = lock(&self.state);
        state.schema_fetches.push(workflow_id.clone());

        if let Some((kind, status)) = state.schema_error {
            return Err(failure(kind, status));
        }

        state
            .schemas
            .get(workflow_id)
            .cloned()
            .ok_or_else(Error::not_found)
    }

    async fn execute(
        &self,
        workflow_id: &WorkflowId,
        request: &ExecutionRequest,
        instance_id: Option<&str>,
    ) -> Result<ExecutionResponse> {
        let delay = {
            let mut state = lock(&self.state);
            state.executions.push(RecordedExecution {
                workflow_id: workflow_id.clone(),
                request: request.clone(),
                instance_id: instance_id.map(str::to_owned),
            });
            state.execute_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = lock(&self.state);
        if let Some((kind, status)) = state.execute_error {
            return Err(failure(kind, status));
        }

        let body = state
            .response
            .clone()
            .unwrap_or_else(|| json!({ "outputs": [] }));
        ExecutionResponse::from_value(&body)
    }

    async fn poll_status(
        &self,
        _workflow_id: &WorkflowId,
        _instance_id: &str,
    ) -> Result<Option<StatusReport>> {
        let stalled = {
            let mut state = lock(&self.state);
            state.polls += 1;
            state.status_stalled
        };

        if stalled {
            std::future::pending::<()>().await;
        }

        Ok(lock(&self.state).status_reports.pop_front())
    }

    async fn list_examples(&self, _plugin: &str) -> Result<Vec<WorkflowExample>> {
        Ok(lock(&self.state).examples.clone())
    }

    async fn health_check(&self) -> Result<ServiceHealth> {
        Ok(ServiceHealth::healthy())
    }
}
