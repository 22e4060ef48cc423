//! Convenient re-exports for common use.

pub use crate::capability::{
    AssetImporter, AssetPayload, BlobUploader, ClipboardWriter, ImageData, ImageSink,
    ImportedAsset, JsonSink, MediaFetcher, ModelAsset, ViewportCapture,
};
pub use crate::error::{BoxedError, Error, ErrorKind, Result};
pub use crate::input::{ImageSource, ImageValue, InputKey, InputValue, InputValues, RawData};
pub use crate::instance::{InstanceState, InstanceTracker};
pub use crate::mapper::{DeliveryMode, ExecutionRequest, build_payload};
pub use crate::output::{ExecutionResult, MediaSource, ModelFormat, OutputValue, TypedOutput};
pub use crate::progress::{Phase, Progress, ProgressTracker};
pub use crate::provider::{WorkflowProvider, WorkflowService};
pub use crate::response::{ExecutionResponse, StatusReport, WorkflowExample};
pub use crate::schema::{PortKind, PortRef, PortSpec, WorkflowId, WorkflowSchema};
pub use crate::upload::UploadStatus;
pub use crate::{ServiceHealth, ServiceStatus};
