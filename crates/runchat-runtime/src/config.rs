//! Session configuration.

use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use derive_builder::Builder;
use runchat_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default number of concurrent uploads.
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 3;

/// Upper bound on concurrent uploads.
pub const MAX_CONCURRENT_UPLOADS: usize = 8;

/// Default status polling interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Configuration for a [`Session`](crate::Session).
///
/// The timeouts wrap each call on top of whatever the transport enforces, so
/// they also apply to providers without their own deadlines.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[cfg_attr(feature = "config", derive(Args))]
pub struct SessionConfig {
    /// Maximum number of images uploaded at once (1-8)
    #[cfg_attr(
        feature = "config",
        arg(long = "max-uploads", env = "RUNCHAT_MAX_UPLOADS", default_value = "3")
    )]
    #[builder(default = "DEFAULT_MAX_CONCURRENT_UPLOADS")]
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,

    /// Status polling interval in milliseconds, 0 disables polling
    #[cfg_attr(
        feature = "config",
        arg(long = "poll-interval", env = "RUNCHAT_POLL_INTERVAL", default_value = "2000")
    )]
    #[builder(default = "DEFAULT_POLL_INTERVAL_MS")]
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Schema fetch timeout
    #[cfg_attr(feature = "config", arg(skip = Duration::from_secs(30)))]
    #[builder(default = "Duration::from_secs(30)")]
    #[serde(default = "default_schema_timeout", with = "duration_secs")]
    pub schema_timeout: Duration,

    /// Execution timeout
    #[cfg_attr(feature = "config", arg(skip = Duration::from_secs(300)))]
    #[builder(default = "Duration::from_secs(300)")]
    #[serde(default = "default_execute_timeout", with = "duration_secs")]
    pub execute_timeout: Duration,

    /// Timeout for a single upload
    #[cfg_attr(feature = "config", arg(skip = Duration::from_secs(60)))]
    #[builder(default = "Duration::from_secs(60)")]
    #[serde(default = "default_upload_timeout", with = "duration_secs")]
    pub upload_timeout: Duration,
}

fn default_max_concurrent_uploads() -> usize {
    DEFAULT_MAX_CONCURRENT_UPLOADS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_schema_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_execute_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(60)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

impl SessionConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_concurrent_uploads
            && !(1..=MAX_CONCURRENT_UPLOADS).contains(&max)
        {
            return Err(format!(
                "max_concurrent_uploads must be between 1 and {MAX_CONCURRENT_UPLOADS}"
            ));
        }

        for (name, timeout) in [
            ("schema_timeout", self.schema_timeout),
            ("execute_timeout", self.execute_timeout),
            ("upload_timeout", self.upload_timeout),
        ] {
            if timeout.is_some_and(|timeout| timeout.is_zero()) {
                return Err(format!("{name} must be greater than zero"));
            }
        }

        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            schema_timeout: default_schema_timeout(),
            execute_timeout: default_execute_timeout(),
            upload_timeout: default_upload_timeout(),
        }
    }
}

impl SessionConfig {
    /// Creates a builder for the configuration.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Returns the polling interval, or `None` when polling is disabled.
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }

    /// Copies the per-call timeouts, typically from the transport configuration.
    #[must_use]
    pub fn with_timeouts(mut self, schema: Duration, execute: Duration, upload: Duration) -> Self {
        self.schema_timeout = schema;
        self.execute_timeout = execute;
        self.upload_timeout = upload;
        self
    }

    /// Sets the number of concurrent uploads.
    #[must_use]
    pub fn with_max_concurrent_uploads(mut self, max: usize) -> Self {
        self.max_concurrent_uploads = max;
        self
    }

    /// Sets the polling interval in milliseconds.
    #[must_use]
    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_CONCURRENT_UPLOADS).contains(&self.max_concurrent_uploads) {
            return Err(Error::configuration().with_message(format!(
                "max_concurrent_uploads must be between 1 and {MAX_CONCURRENT_UPLOADS}, got {}",
                self.max_concurrent_uploads
            )));
        }

        if self.schema_timeout.is_zero()
            || self.execute_timeout.is_zero()
            || self.upload_timeout.is_zero()
        {
            return Err(Error::configuration().with_message("timeouts must be greater than zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use runchat_core::ErrorKind;

    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = SessionConfig::builder().build().unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.max_concurrent_uploads, 3);
        assert_eq!(config.poll_interval(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_builder_rejects_out_of_range_uploads() {
        assert!(SessionConfig::builder().max_concurrent_uploads(0usize).build().is_err());
        assert!(SessionConfig::builder().max_concurrent_uploads(9usize).build().is_err());
        assert!(SessionConfig::builder().max_concurrent_uploads(8usize).build().is_ok());
    }

    #[test]
    fn test_builder_rejects_zero_timeout() {
        let result = SessionConfig::builder()
            .execute_timeout(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        let config = SessionConfig::default().with_max_concurrent_uploads(12);
        assert_eq!(config.validate().unwrap_err().kind, ErrorKind::Configuration);
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_poll_interval_disables_polling() {
        let config = SessionConfig::default().with_poll_interval_ms(0);
        assert_eq!(config.poll_interval(), None);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"max_concurrent_uploads": 5, "upload_timeout": 10}"#)
                .unwrap();
        assert_eq!(config.max_concurrent_uploads, 5);
        assert_eq!(config.upload_timeout, Duration::from_secs(10));
        assert_eq!(config.execute_timeout, Duration::from_secs(300));
    }
}
