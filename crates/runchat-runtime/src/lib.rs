#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;
pub mod execution;
pub mod router;
mod session;
pub mod upload;

pub use crate::config::{
    DEFAULT_MAX_CONCURRENT_UPLOADS, DEFAULT_POLL_INTERVAL_MS, MAX_CONCURRENT_UPLOADS,
    SessionConfig, SessionConfigBuilder, SessionConfigBuilderError,
};
pub use crate::execution::{ExecutionEvent, ExecutionHandle, RunReport};
pub use crate::router::{Consumer, Delivery, OutputRouter, RoutedOutput};
pub use crate::session::{Session, SessionBuilder};
pub use crate::upload::{UploadCoordinator, UploadHandle, UploadSummary};

/// Tracing target for session lifecycle events.
pub const TRACING_TARGET_SESSION: &str = "runchat_runtime::session";

/// Tracing target for image uploads.
pub const TRACING_TARGET_UPLOAD: &str = "runchat_runtime::upload";

/// Tracing target for workflow executions.
pub const TRACING_TARGET_EXECUTION: &str = "runchat_runtime::execution";

/// Tracing target for output routing.
pub const TRACING_TARGET_ROUTER: &str = "runchat_runtime::router";
