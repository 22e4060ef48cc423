//! Transport-level failures and their mapping onto [`runchat_core::Error`].

use runchat_core::ErrorKind;
use thiserror::Error;

/// Result type alias for transport operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure raised below the HTTP status layer.
#[derive(Debug, Error)]
pub enum Error {
    /// The request could not be built, sent, or its body read.
    #[error("request to the Runchat API failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// A response body was not the expected JSON.
    #[error("unexpected response body: {0}")]
    Json(#[from] serde_json::Error),
    /// An endpoint could not be resolved against the base URL.
    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),
    /// Invalid client configuration.
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl Error {
    /// Kind of the core error this failure becomes.
    ///
    /// Timeouts are told apart from connection failures so callers can avoid
    /// re-sending an execution the service may already have accepted.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(error) if error.is_timeout() => ErrorKind::Timeout,
            Self::Transport(error) if error.is_builder() => ErrorKind::Configuration,
            Self::Transport(_) => ErrorKind::Network,
            Self::Json(_) => ErrorKind::Serialization,
            Self::Url(_) | Self::Config(_) => ErrorKind::Configuration,
        }
    }
}

impl From<Error> for runchat_core::Error {
    fn from(error: Error) -> Self {
        let kind = error.kind();
        let message = match (&error, kind) {
            (_, ErrorKind::Timeout) => "Runchat API did not answer in time".to_owned(),
            (Error::Transport(inner), ErrorKind::Network) if inner.is_connect() => {
                "could not connect to the Runchat API".to_owned()
            }
            _ => error.to_string(),
        };

        match error {
            Error::Config(_) => runchat_core::Error::new(kind).with_message(message),
            other => runchat_core::Error::new(kind)
                .with_message(message)
                .with_source(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_has_no_source() {
        let error: runchat_core::Error = Error::Config("bad base URL".into()).into();

        assert_eq!(error.kind, ErrorKind::Configuration);
        assert!(error.source.is_none());
        assert_eq!(
            error.message.as_deref(),
            Some("invalid client configuration: bad base URL")
        );
    }

    #[test]
    fn test_json_error_is_serialization() {
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: runchat_core::Error = Error::from(json).into();

        assert_eq!(error.kind, ErrorKind::Serialization);
        assert!(error.source.is_some());
    }
}
