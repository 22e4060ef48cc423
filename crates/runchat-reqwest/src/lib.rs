#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod client;
mod config;
mod error;
mod provider;
mod status;

pub use crate::client::RunchatClient;
pub use crate::config::{
    DEFAULT_BASE_URL, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_EXECUTE_TIMEOUT_SECS,
    DEFAULT_SCHEMA_TIMEOUT_SECS, DEFAULT_UPLOAD_TIMEOUT_SECS, RunchatConfig,
};
pub use crate::error::{Error, Result};
pub use crate::status::{MAX_ERROR_MESSAGE_CHARS, classify};

/// Tracing target for HTTP client operations.
pub const TRACING_TARGET: &str = "runchat_reqwest::client";
