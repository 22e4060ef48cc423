//! Background execution of a workflow run.

use std::future::Future;
use std::time::Instant;

use futures::StreamExt;
use runchat_core::input::{InputValue, InputValues};
use runchat_core::mapper::{DeliveryMode, build_payload};
use runchat_core::output::ExecutionResult;
use runchat_core::progress::{self, Phase, Progress, ProgressTracker};
use runchat_core::schema::{WorkflowId, WorkflowSchema};
use runchat_core::{Error, ErrorKind, Result};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::router::Delivery;
use crate::session::Session;
use crate::upload::UploadSummary;
use crate::TRACING_TARGET_EXECUTION;

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Classified outputs.
    pub result: ExecutionResult,
    /// What each output was delivered as, in routing order.
    pub deliveries: Vec<Delivery>,
    /// Instance id the next execution will forward.
    pub instance_id: Option<String>,
    /// Upload totals for this run.
    pub uploads: UploadSummary,
}

/// Event emitted by a running execution.
#[derive(Debug)]
pub enum ExecutionEvent {
    /// Progress update; fractions never decrease.
    Progress(Progress),
    /// Terminal event, sent exactly once.
    Finished(Result<RunReport>),
}

/// Handle to an execution running in the background.
///
/// Dropping the handle detaches the execution; use [`cancel`](Self::cancel)
/// to stop it.
#[derive(Debug)]
pub struct ExecutionHandle {
    events: UnboundedReceiverStream<ExecutionEvent>,
    cancel: CancellationToken,
}

impl ExecutionHandle {
    /// Spawns `task` on the current tokio runtime.
    pub(crate) fn spawn(task: ExecutionTask) -> Self {
        let cancel = task.cancel.clone();
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(task.run(sender));

        Self {
            events: UnboundedReceiverStream::new(receiver),
            cancel,
        }
    }

    /// Stream of progress events, ending with one [`ExecutionEvent::Finished`].
    pub fn events(&mut self) -> &mut UnboundedReceiverStream<ExecutionEvent> {
        &mut self.events
    }

    /// Requests cancellation.
    ///
    /// In-flight requests are dropped and a late response is discarded. The
    /// run finishes with [`ErrorKind::Cancelled`] unless it already finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns a token that cancels this execution when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for the run to finish, skipping progress events.
    pub async fn wait(mut self) -> Result<RunReport> {
        while let Some(event) = self.events.next().await {
            if let ExecutionEvent::Finished(result) = event {
                return result;
            }
        }

        Err(Error::new(ErrorKind::Unknown).with_message("execution task ended without a result"))
    }
}

/// One run of the loaded workflow.
pub(crate) struct ExecutionTask {
    session: Session,
    values: InputValues,
    mode: DeliveryMode,
    cancel: CancellationToken,
    progress: ProgressTracker,
}

impl ExecutionTask {
    pub(crate) fn new(session: Session, values: InputValues, mode: DeliveryMode) -> Self {
        Self {
            session,
            values,
            mode,
            cancel: CancellationToken::new(),
            progress: ProgressTracker::new(),
        }
    }

    async fn run(mut self, events: mpsc::UnboundedSender<ExecutionEvent>) {
        let started = Instant::now();
        let cancel = self.cancel.clone();

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::cancelled().with_message("execution cancelled")),
            outcome = self.execute(&events) => outcome,
        };

        let elapsed_ms = started.elapsed().as_millis();
        match &outcome {
            Ok(report) => tracing::info!(
                target: TRACING_TARGET_EXECUTION,
                outputs = report.result.outputs.len(),
                elapsed_ms,
                "Execution finished"
            ),
            Err(error) if error.kind == ErrorKind::Cancelled => tracing::info!(
                target: TRACING_TARGET_EXECUTION,
                elapsed_ms,
                "Execution cancelled"
            ),
            Err(error) => tracing::warn!(
                target: TRACING_TARGET_EXECUTION,
                error = %error,
                elapsed_ms,
                "Execution failed"
            ),
        }

        let _ = events.send(ExecutionEvent::Finished(outcome));
    }

    async fn execute(
        &mut self,
        events: &mpsc::UnboundedSender<ExecutionEvent>,
    ) -> Result<RunReport> {
        let schema = self.session.schema().ok_or_else(|| {
            Error::invalid_input().with_message("no workflow schema is loaded")
        })?;
        self.report(events, Phase::Schema, progress::SCHEMA_LOADED, "Schema loaded");

        let uploads = self.upload(&schema, events).await?;
        let request = build_payload(&schema, &self.values, &self.mode)?;

        let instance_id = self.session.instance_id();
        let workflow_id = &schema.workflow_id;
        tracing::debug!(
            target: TRACING_TARGET_EXECUTION,
            workflow_id = %workflow_id,
            inputs = request.len(),
            instance_id = instance_id.as_deref(),
            "Sending execution"
        );
        self.report(events, Phase::Execute, progress::EXECUTION_START, "Executing workflow");

        let service = self.session.service().clone();
        let timeout = self.session.config().execute_timeout;
        let started = Instant::now();
        let call = tokio::time::timeout(
            timeout,
            service.execute(workflow_id, &request, instance_id.as_deref()),
        );
        let response = self
            .with_polling(events, call, workflow_id, instance_id.as_deref())
            .await
            .map_err(|_| {
                Error::timeout().with_message(format!("execution timed out after {timeout:?}"))
            })??;

        let result = ExecutionResult::from_response(&schema, response, started.elapsed());
        let instance_id = self.session.record_instance(result.instance_id.clone());

        self.report(events, Phase::Route, progress::EXECUTION_END, "Routing outputs");
        let router = self.session.router();
        let routed = router.route(&schema, &result)?;
        let deliveries = router.dispatch(routed).await?;
        self.report(events, Phase::Complete, progress::COMPLETE, "Complete");

        Ok(RunReport {
            result,
            deliveries,
            instance_id,
            uploads,
        })
    }

    /// Uploads every image input that has no URL yet and waits for all of them.
    async fn upload(
        &mut self,
        schema: &WorkflowSchema,
        events: &mpsc::UnboundedSender<ExecutionEvent>,
    ) -> Result<UploadSummary> {
        let mut uploads = self.session.uploads().scoped();
        for spec in &schema.inputs {
            let port = spec.port_ref();
            if let Some(InputValue::Image(image)) = self.values.get(&port)
                && image.needs_upload()
            {
                uploads.enqueue(port, image)?;
            }
        }

        let total = uploads.pending();
        if total == 0 {
            return Ok(UploadSummary::default());
        }

        send(events, self.progress.uploads(0, total));
        let tracker = &mut self.progress;
        let mut done = 0;
        let summary = uploads
            .join_with(&mut self.values, |_, _| {
                done += 1;
                send(events, tracker.uploads(done, total));
            })
            .await;

        tracing::debug!(
            target: TRACING_TARGET_EXECUTION,
            uploaded = summary.uploaded,
            failed = summary.failed,
            "Uploads joined"
        );

        Ok(summary)
    }

    /// Drives `call` to completion, polling the server for progress meanwhile.
    ///
    /// Polling needs an instance id and stops at the first poll that is
    /// unsupported, fails or outlives the schema timeout. A poll in flight
    /// never holds up `call`.
    async fn with_polling<F>(
        &mut self,
        events: &mpsc::UnboundedSender<ExecutionEvent>,
        call: F,
        workflow_id: &WorkflowId,
        instance_id: Option<&str>,
    ) -> F::Output
    where
        F: Future,
    {
        let (Some(interval), Some(instance_id)) = (self.session.config().poll_interval(), instance_id)
        else {
            return call.await;
        };

        let service = self.session.service().clone();
        let poll_timeout = self.session.config().schema_timeout;
        let start_poll = || {
            tokio::time::timeout(poll_timeout, service.poll_status(workflow_id, instance_id))
        };

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polling = true;
        let mut in_flight = false;

        let poll = start_poll();
        tokio::pin!(call, poll);
        loop {
            tokio::select! {
                output = &mut call => return output,
                _ = ticker.tick(), if polling && !in_flight => {
                    poll.set(start_poll());
                    in_flight = true;
                }
                answer = &mut poll, if in_flight => {
                    in_flight = false;
                    match answer {
                        Ok(Ok(Some(report))) => {
                            send(events, self.progress.server(&report.status, report.fraction()));
                        }
                        Ok(Ok(None)) => polling = false,
                        Ok(Err(error)) => {
                            tracing::debug!(
                                target: TRACING_TARGET_EXECUTION,
                                error = %error,
                                "Status polling stopped"
                            );
                            polling = false;
                        }
                        Err(_) => {
                            tracing::debug!(
                                target: TRACING_TARGET_EXECUTION,
                                timeout = ?poll_timeout,
                                "Status poll timed out, polling stopped"
                            );
                            polling = false;
                        }
                    }
                }
            }
        }
    }

    fn report(
        &mut self,
        events: &mpsc::UnboundedSender<ExecutionEvent>,
        phase: Phase,
        fraction: f32,
        message: &str,
    ) {
        send(events, self.progress.report(phase, fraction, message));
    }
}

fn send(events: &mpsc::UnboundedSender<ExecutionEvent>, progress: Progress) {
    tracing::trace!(
        target: TRACING_TARGET_EXECUTION,
        phase = %progress.phase,
        fraction = progress.fraction,
        "Progress"
    );
    let _ = events.send(ExecutionEvent::Progress(progress));
}
