//! Structured error handling for workflow operations.

use std::time::Duration;

use strum::{AsRefStr, Display, EnumString, IntoStaticStr};
use thiserror::Error;

use crate::schema::PortRef;

/// Boxed error kept as the source of an [`Error`].
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Result of workflow operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Words that show up in the service's 403 responses when the account ran
/// out of execution credits.
const CREDIT_KEYWORDS: &[&str] = &[
    "credit",
    "remaining",
    "exhausted",
    "usage",
    "limit",
    "subscription",
    "upgrade",
    "plan",
];

/// Categories of errors that can occur in workflow operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(AsRefStr, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// The API key was rejected (HTTP 401).
    Authentication,
    /// The workflow or endpoint does not exist (HTTP 404).
    NotFound,
    /// Too many requests (HTTP 429).
    RateLimited,
    /// Any other non-success HTTP status.
    Http,
    /// DNS failure, refused connection or a broken transfer.
    Network,
    /// A client-side timeout elapsed.
    Timeout,
    /// The schema response lacks well-formed `inputs`/`outputs`.
    SchemaParse,
    /// A required input has no value.
    MissingRequiredInput,
    /// An image input has not reached the `Uploaded` state.
    UploadIncomplete,
    /// Two distinct ports map to the same payload key.
    AmbiguousKey,
    /// The operation was cancelled by the caller.
    Cancelled,
    /// Caller-supplied data is invalid.
    InvalidInput,
    /// Client or session settings are invalid.
    Configuration,
    /// A JSON or base64 document could not be read or written.
    Serialization,
    /// A host capability (sink, importer, clipboard) failed.
    Capability,
    /// The task running an execution ended without reporting.
    #[default]
    Unknown,
}

impl ErrorKind {
    /// Check if the caller may reasonably try again later.
    ///
    /// This is a hint only; nothing in this workspace retries on its own.
    /// Timeouts are excluded because the service may already have accepted
    /// the execution.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::RateLimited)
    }
}

/// Failure of a schema load, upload, execution or delivery.
///
/// Displays as `[kind]: message (at context)`; the HTTP status, port and
/// retry hint are carried as fields for callers that branch on them.
#[must_use]
#[derive(Debug, Error)]
#[error(
    "[{kind}]{}{}",
    message.as_ref().map(|m| format!(": {m}")).unwrap_or_default(),
    context.as_ref().map(|c| format!(" (at {c})")).unwrap_or_default()
)]
pub struct Error {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Human readable description.
    pub message: Option<String>,
    /// Lower-level cause.
    #[source]
    pub source: Option<BoxedError>,
    /// Where in a document the failure was found, e.g. `inputs[2]`.
    pub context: Option<String>,
    /// HTTP status code, when the error came from a response.
    pub status: Option<u16>,
    /// The port the error refers to, for mapping errors.
    pub port: Option<PortRef>,
    /// Server-suggested wait before the next attempt (HTTP 429).
    pub retry_after: Option<Duration>,
}

impl Error {
    /// Creates an error of `kind` without details.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            context: None,
            status: None,
            port: None,
            retry_after: None,
        }
    }

    /// Sets the description.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the lower-level cause.
    pub fn with_source(mut self, source: impl Into<BoxedError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Records where in a document the failure was found.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Attaches the HTTP status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attaches the port the error refers to.
    pub fn with_port(mut self, port: PortRef) -> Self {
        self.port = Some(port);
        self
    }

    /// Attaches a server-suggested wait.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// The API key was rejected.
    pub fn authentication() -> Self {
        Self::new(ErrorKind::Authentication).with_status(401)
    }

    /// The workflow or endpoint does not exist.
    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound).with_status(404)
    }

    /// The service asked the client to slow down.
    pub fn rate_limited() -> Self {
        Self::new(ErrorKind::RateLimited).with_status(429)
    }

    /// Creates an error for any other non-success HTTP status.
    pub fn http(status: u16) -> Self {
        Self::new(ErrorKind::Http).with_status(status)
    }

    /// A per-call deadline elapsed.
    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    /// Creates a new schema parse error.
    pub fn schema_parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SchemaParse).with_message(message)
    }

    /// Creates an error for a required input without a value.
    pub fn missing_required_input(port: PortRef) -> Self {
        let message = format!("missing required input {port}");
        Self::new(ErrorKind::MissingRequiredInput)
            .with_message(message)
            .with_port(port)
    }

    /// Creates an error for an image input whose upload has not completed.
    pub fn upload_incomplete(port: PortRef) -> Self {
        let message = format!("upload for {port} has not completed");
        Self::new(ErrorKind::UploadIncomplete)
            .with_message(message)
            .with_port(port)
    }

    /// Creates an error for a payload key claimed by two distinct ports.
    pub fn ambiguous_key(key: &str, first: &PortRef, second: PortRef) -> Self {
        let message = format!("payload key '{key}' is produced by both {first} and {second}");
        Self::new(ErrorKind::AmbiguousKey)
            .with_message(message)
            .with_port(second)
    }

    /// The caller cancelled the operation.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Caller-supplied data was rejected before anything was sent.
    pub fn invalid_input() -> Self {
        Self::new(ErrorKind::InvalidInput)
    }

    /// Settings are out of range or unparsable.
    pub fn configuration() -> Self {
        Self::new(ErrorKind::Configuration)
    }

    /// A document could not be encoded or decoded.
    pub fn serialization() -> Self {
        Self::new(ErrorKind::Serialization)
    }

    /// A host capability is missing or failed.
    pub fn capability() -> Self {
        Self::new(ErrorKind::Capability)
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// See [`ErrorKind::is_retryable`].
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Whether this is a 403 caused by exhausted execution credits.
    #[must_use]
    pub fn is_credit_exhausted(&self) -> bool {
        if self.status != Some(403) {
            return false;
        }

        let Some(message) = self.message.as_deref() else {
            return false;
        };

        let lower = message.to_lowercase();
        CREDIT_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::new(ErrorKind::Serialization).with_source(error).with_message("Invalid JSON document")
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::new(ErrorKind::InvalidInput).with_source(error).with_message("I/O operation failed")
    }
}

impl From<base64::DecodeError> for Error {
    fn from(error: base64::DecodeError) -> Self {
        Self::new(ErrorKind::Serialization).with_source(error).with_message("Invalid base64 data")
    }
}

impl From<url::ParseError> for Error {
    fn from(error: url::ParseError) -> Self {
        Self::new(ErrorKind::InvalidInput).with_source(error).with_message("Invalid URL")
    }
}
