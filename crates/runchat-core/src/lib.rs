#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for parameter mapping.
pub const TRACING_TARGET_MAPPER: &str = "runchat_core::mapper";

/// Tracing target for output classification.
pub const TRACING_TARGET_OUTPUT: &str = "runchat_core::output";

/// Tracing target for workflow provider calls.
pub const TRACING_TARGET_PROVIDER: &str = "runchat_core::provider";

mod error;
mod health;

pub mod capability;
pub mod input;
pub mod instance;
pub mod mapper;
pub mod output;
pub mod prelude;
pub mod progress;
pub mod provider;
pub mod response;
pub mod schema;
pub mod upload;

pub use error::{BoxedError, Error, ErrorKind, Result};
pub use health::{ServiceHealth, ServiceStatus};
