//! The session context shared by every operation on one workflow.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use runchat_core::capability::{
    AssetImporter, BlobUploader, ClipboardWriter, ImageSink, JsonSink, MediaFetcher,
    ViewportCapture,
};
use runchat_core::input::{ImageValue, InputValues, sniff_content_type};
use runchat_core::instance::{InstanceState, InstanceTracker};
use runchat_core::mapper::DeliveryMode;
use runchat_core::provider::WorkflowService;
use runchat_core::schema::{PortRef, WorkflowId, WorkflowSchema};
use runchat_core::{Error, Result};

use crate::execution::{ExecutionHandle, ExecutionTask};
use crate::router::OutputRouter;
use crate::upload::UploadCoordinator;
use crate::{SessionConfig, TRACING_TARGET_SESSION};

struct SessionInner {
    service: WorkflowService,
    uploads: UploadCoordinator,
    router: OutputRouter,
    viewport: Option<Arc<dyn ViewportCapture>>,
    schema: RwLock<Option<Arc<WorkflowSchema>>>,
    instance: Mutex<InstanceTracker>,
    config: SessionConfig,
}

/// Holds the state of one workflow between executions.
///
/// The session owns the provider, the upload pool, the output router, the
/// current schema and the instance tracker. Clones share all of it.
///
/// # Examples
///
/// ```rust,ignore
/// let session = Session::builder(client.clone().into_service(), Arc::new(client))
///     .config(SessionConfig::default())
///     .build()?;
///
/// session.load_schema(&"my-workflow".parse()?).await?;
/// let report = session.execute(values, DeliveryMode::Schema).wait().await?;
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("workflow_id", &self.schema().map(|s| s.workflow_id.clone()))
            .field("instance_id", &self.instance_id())
            .field("router", &self.inner.router)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Starts building a session on top of a provider and an upload capability.
    pub fn builder(service: WorkflowService, uploader: Arc<dyn BlobUploader>) -> SessionBuilder {
        SessionBuilder {
            service,
            uploader,
            router: OutputRouter::new(),
            viewport: None,
            config: SessionConfig::default(),
        }
    }

    /// Fetches and installs the schema of `workflow_id`.
    ///
    /// The previous schema stays in place when the fetch fails. Loading a
    /// different workflow discards the instance id.
    pub async fn load_schema(&self, workflow_id: &WorkflowId) -> Result<Arc<WorkflowSchema>> {
        let timeout = self.inner.config.schema_timeout;
        let schema = tokio::time::timeout(timeout, self.inner.service.fetch_schema(workflow_id))
            .await
            .map_err(|_| {
                Error::timeout().with_message(format!("schema fetch timed out after {timeout:?}"))
            })??;

        let schema = Arc::new(schema);
        let previous = write(&self.inner.schema).replace(Arc::clone(&schema));

        let switched = previous.is_some_and(|previous| previous.workflow_id != schema.workflow_id);
        if switched && lock(&self.inner.instance).reset().is_some() {
            tracing::info!(
                target: TRACING_TARGET_SESSION,
                workflow_id = %schema.workflow_id,
                "Workflow changed, instance reset"
            );
        }

        tracing::info!(
            target: TRACING_TARGET_SESSION,
            workflow_id = %schema.workflow_id,
            inputs = schema.inputs.len(),
            outputs = schema.outputs.len(),
            "Schema loaded"
        );

        Ok(schema)
    }

    /// Returns the current schema, if one is loaded.
    pub fn schema(&self) -> Option<Arc<WorkflowSchema>> {
        read(&self.inner.schema)
    }

    /// Starts an execution of the loaded workflow in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn execute(&self, values: InputValues, mode: DeliveryMode) -> ExecutionHandle {
        ExecutionHandle::spawn(ExecutionTask::new(self.clone(), values, mode))
    }

    /// Returns the instance id the next execution will forward.
    pub fn instance_id(&self) -> Option<String> {
        lock(&self.inner.instance).instance_id().map(str::to_owned)
    }

    /// Returns the full instance state.
    pub fn instance_state(&self) -> Option<InstanceState> {
        lock(&self.inner.instance).state().cloned()
    }

    /// Discards the instance id so the next execution starts fresh.
    pub fn reset_instance(&self) -> Option<InstanceState> {
        let previous = lock(&self.inner.instance).reset();
        if let Some(previous) = &previous {
            tracing::info!(
                target: TRACING_TARGET_SESSION,
                instance_id = %previous.instance_id,
                "Instance reset"
            );
        }
        previous
    }

    /// Continues an existing instance; an empty id resets instead.
    pub fn adopt_instance(&self, instance_id: impl Into<String>) {
        let instance_id = instance_id.into();
        tracing::debug!(
            target: TRACING_TARGET_SESSION,
            instance_id = %instance_id,
            "Instance adopted"
        );
        lock(&self.inner.instance).adopt(instance_id);
    }

    /// Captures the host viewport as an image input for `port`.
    pub async fn capture_viewport(&self, port: &PortRef) -> Result<ImageValue> {
        let capture = self
            .inner
            .viewport
            .as_ref()
            .ok_or_else(|| Error::capability().with_message("no viewport capture configured"))?;

        let data = capture.capture().await?;
        if data.is_empty() {
            return Err(Error::capability().with_message("viewport capture returned no image"));
        }

        let content_type = sniff_content_type(&data).unwrap_or("image/png");
        let extension = content_type.trim_start_matches("image/");
        let filename = format!("viewport_capture_{}.{extension}", port.param_id);

        tracing::debug!(
            target: TRACING_TARGET_SESSION,
            port = %port,
            size = data.len(),
            "Viewport captured"
        );

        Ok(ImageValue::from_bytes(data, filename).with_content_type(content_type))
    }

    /// Writes `text` to the clipboard capability.
    pub async fn copy_text(&self, text: &str) -> Result<()> {
        self.inner.router.copy_text(text).await
    }

    /// Returns the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Returns the workflow service.
    pub fn service(&self) -> &WorkflowService {
        &self.inner.service
    }

    /// Returns the output router.
    pub fn router(&self) -> &OutputRouter {
        &self.inner.router
    }

    pub(crate) fn uploads(&self) -> &UploadCoordinator {
        &self.inner.uploads
    }

    /// Records a successful execution and returns the id to forward next.
    pub(crate) fn record_instance(&self, instance_id: Option<String>) -> Option<String> {
        let mut tracker = lock(&self.inner.instance);
        tracker.record(instance_id);
        tracker.instance_id().map(str::to_owned)
    }
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    service: WorkflowService,
    uploader: Arc<dyn BlobUploader>,
    router: OutputRouter,
    viewport: Option<Arc<dyn ViewportCapture>>,
    config: SessionConfig,
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("router", &self.router)
            .field("viewport", &self.viewport.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the output router.
    #[must_use]
    pub fn router(mut self, router: OutputRouter) -> Self {
        self.router = router;
        self
    }

    /// Sets the image sink.
    #[must_use]
    pub fn image_sink(mut self, sink: Arc<dyn ImageSink>) -> Self {
        self.router = self.router.with_image_sink(sink);
        self
    }

    /// Sets the asset importer.
    #[must_use]
    pub fn asset_importer(mut self, importer: Arc<dyn AssetImporter>) -> Self {
        self.router = self.router.with_asset_importer(importer);
        self
    }

    /// Sets the JSON sink.
    #[must_use]
    pub fn json_sink(mut self, sink: Arc<dyn JsonSink>) -> Self {
        self.router = self.router.with_json_sink(sink);
        self
    }

    /// Sets the clipboard writer.
    #[must_use]
    pub fn clipboard(mut self, clipboard: Arc<dyn ClipboardWriter>) -> Self {
        self.router = self.router.with_clipboard(clipboard);
        self
    }

    /// Sets the fetcher for image outputs delivered by URL.
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn MediaFetcher>) -> Self {
        self.router = self.router.with_fetcher(fetcher);
        self
    }

    /// Sets the viewport capture.
    #[must_use]
    pub fn viewport(mut self, capture: Arc<dyn ViewportCapture>) -> Self {
        self.viewport = Some(capture);
        self
    }

    /// Validates the configuration and creates the session.
    pub fn build(self) -> Result<Session> {
        self.config.validate()?;

        let uploads = UploadCoordinator::new(
            self.uploader,
            self.config.max_concurrent_uploads,
            self.config.upload_timeout,
        );

        tracing::info!(
            target: TRACING_TARGET_SESSION,
            max_concurrent_uploads = self.config.max_concurrent_uploads,
            poll_interval_ms = self.config.poll_interval_ms,
            "Session initialized"
        );

        let inner = SessionInner {
            service: self.service,
            uploads,
            router: self.router,
            viewport: self.viewport,
            schema: RwLock::new(None),
            instance: Mutex::new(InstanceTracker::new()),
            config: self.config,
        };

        Ok(Session {
            inner: Arc::new(inner),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use runchat_core::ErrorKind;
    use runchat_core::schema::{PortKind, PortSpec};
    use runchat_test::{
        MockBlobUploader, MockViewportCapture, MockWorkflowProvider, RecordingClipboard, TINY_PNG,
    };

    use super::*;

    fn schema(id: &str) -> WorkflowSchema {
        WorkflowSchema::new(
            WorkflowId::new(id).unwrap(),
            vec![PortSpec::new("prompt", "1", PortKind::Text)],
            vec![],
        )
    }

    fn session(provider: &MockWorkflowProvider) -> SessionBuilder {
        Session::builder(
            WorkflowService::new(provider.clone()),
            Arc::new(MockBlobUploader::new()),
        )
    }

    #[tokio::test]
    async fn test_load_schema_installs_schema() {
        let provider = MockWorkflowProvider::new().with_schema(schema("wf-1"));
        let session = session(&provider).build().unwrap();
        assert!(session.schema().is_none());

        let loaded = session.load_schema(&schema("wf-1").workflow_id).await.unwrap();
        assert_eq!(*loaded, schema("wf-1"));
        assert_eq!(session.schema().as_deref(), Some(&schema("wf-1")));
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_schema() {
        let provider = MockWorkflowProvider::new().with_schema(schema("wf-1"));
        let session = session(&provider).build().unwrap();
        session.load_schema(&schema("wf-1").workflow_id).await.unwrap();

        let error = session
            .load_schema(&WorkflowId::new("missing").unwrap())
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::NotFound);
        assert_eq!(session.schema().unwrap().workflow_id.as_str(), "wf-1");
    }

    #[tokio::test]
    async fn test_switching_workflow_resets_instance() {
        let provider = MockWorkflowProvider::new()
            .with_schema(schema("wf-1"))
            .with_schema(schema("wf-2"));
        let session = session(&provider).build().unwrap();

        session.load_schema(&schema("wf-1").workflow_id).await.unwrap();
        session.adopt_instance("inst-1");

        // Reloading the same workflow keeps the instance.
        session.load_schema(&schema("wf-1").workflow_id).await.unwrap();
        assert_eq!(session.instance_id().as_deref(), Some("inst-1"));

        session.load_schema(&schema("wf-2").workflow_id).await.unwrap();
        assert_eq!(session.instance_id(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schema_timeout() {
        #[derive(Debug)]
        struct Stalled;

        #[async_trait::async_trait]
        impl runchat_core::provider::WorkflowProvider for Stalled {
            async fn fetch_schema(&self, _: &WorkflowId) -> Result<WorkflowSchema> {
                std::future::pending().await
            }

            async fn execute(
                &self,
                _: &WorkflowId,
                _: &runchat_core::mapper::ExecutionRequest,
                _: Option<&str>,
            ) -> Result<runchat_core::response::ExecutionResponse> {
                std::future::pending().await
            }

            async fn health_check(&self) -> Result<runchat_core::ServiceHealth> {
                Ok(runchat_core::ServiceHealth::healthy())
            }
        }

        let config = SessionConfig::builder()
            .schema_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let session =
            Session::builder(WorkflowService::new(Stalled), Arc::new(MockBlobUploader::new()))
                .config(config)
                .build()
                .unwrap();

        let error = session
            .load_schema(&WorkflowId::new("wf-1").unwrap())
            .await
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::Timeout);
    }

    #[test]
    fn test_instance_management() {
        let provider = MockWorkflowProvider::new();
        let session = session(&provider).build().unwrap();

        session.adopt_instance("inst-7");
        assert_eq!(session.instance_id().as_deref(), Some("inst-7"));
        assert!(session.instance_state().is_some());

        let previous = session.reset_instance().unwrap();
        assert_eq!(previous.instance_id, "inst-7");
        assert_eq!(session.instance_id(), None);

        session.adopt_instance("inst-8");
        session.adopt_instance("");
        assert_eq!(session.instance_id(), None);
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let provider = MockWorkflowProvider::new();
        let config = SessionConfig::default().with_max_concurrent_uploads(0);
        let error = session(&provider).config(config).build().unwrap_err();
        assert_eq!(error.kind, ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_capture_viewport() {
        let provider = MockWorkflowProvider::new();
        let session = session(&provider)
            .viewport(Arc::new(MockViewportCapture::default()))
            .build()
            .unwrap();

        let image = session
            .capture_viewport(&PortRef::new("reference", "4"))
            .await
            .unwrap();

        assert_eq!(image.filename(), "viewport_capture_reference.png");
        assert!(image.needs_upload());
        assert_eq!(
            image.source,
            runchat_core::input::ImageSource::Bytes {
                data: bytes::Bytes::from_static(TINY_PNG),
                content_type: Some("image/png".into()),
                filename: "viewport_capture_reference.png".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_capture_viewport_requires_capability() {
        let provider = MockWorkflowProvider::new();
        let bare = session(&provider).build().unwrap();

        let error = bare
            .capture_viewport(&PortRef::new("reference", "4"))
            .await
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::Capability);

        let empty = session(&provider)
            .viewport(Arc::new(MockViewportCapture::new(Vec::<u8>::new())))
            .build()
            .unwrap();
        let error = empty
            .capture_viewport(&PortRef::new("reference", "4"))
            .await
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::Capability);
    }

    #[tokio::test]
    async fn test_copy_text() {
        let provider = MockWorkflowProvider::new();
        let clipboard = RecordingClipboard::new();
        let session = session(&provider)
            .clipboard(Arc::new(clipboard.clone()))
            .build()
            .unwrap();

        session.copy_text("https://cdn.test/out.png").await.unwrap();
        assert_eq!(clipboard.history(), vec!["https://cdn.test/out.png".to_owned()]);
    }
}
