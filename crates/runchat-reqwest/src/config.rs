//! Runchat client configuration.

use std::fmt;
use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://runchat.app/api";

/// Default schema fetch timeout: 30 seconds.
pub const DEFAULT_SCHEMA_TIMEOUT_SECS: u64 = 30;

/// Default execution timeout: 5 minutes.
pub const DEFAULT_EXECUTE_TIMEOUT_SECS: u64 = 300;

/// Default upload timeout: 60 seconds.
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 60;

/// Default connect timeout: 10 seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Configuration for the Runchat HTTP client.
///
/// Every call kind has its own timeout; a timeout is reported as
/// [`ErrorKind::Timeout`](runchat_core::ErrorKind::Timeout) and never retried.
#[derive(Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct RunchatConfig {
    /// API key sent as a bearer token
    #[cfg_attr(
        feature = "config",
        arg(long = "api-key", env = "RUNCHAT_API_KEY", hide_env_values = true, default_value = "")
    )]
    #[serde(default)]
    pub api_key: String,

    /// Base URL of the Runchat API
    #[cfg_attr(
        feature = "config",
        arg(long = "base-url", env = "RUNCHAT_BASE_URL", default_value = DEFAULT_BASE_URL)
    )]
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Schema fetch timeout in seconds
    #[cfg_attr(
        feature = "config",
        arg(long = "schema-timeout", env = "RUNCHAT_SCHEMA_TIMEOUT", default_value = "30")
    )]
    #[serde(default = "default_schema_timeout_secs")]
    pub schema_timeout: u64,

    /// Execution timeout in seconds
    #[cfg_attr(
        feature = "config",
        arg(long = "execute-timeout", env = "RUNCHAT_EXECUTE_TIMEOUT", default_value = "300")
    )]
    #[serde(default = "default_execute_timeout_secs")]
    pub execute_timeout: u64,

    /// Upload timeout in seconds
    #[cfg_attr(
        feature = "config",
        arg(long = "upload-timeout", env = "RUNCHAT_UPLOAD_TIMEOUT", default_value = "60")
    )]
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout: u64,

    /// Connect timeout in seconds
    #[cfg_attr(
        feature = "config",
        arg(long = "connect-timeout", env = "RUNCHAT_CONNECT_TIMEOUT", default_value = "10")
    )]
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout: u64,

    /// User-Agent header to send with requests
    #[cfg_attr(
        feature = "config",
        arg(long = "user-agent", env = "RUNCHAT_USER_AGENT")
    )]
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_owned()
}

fn default_schema_timeout_secs() -> u64 {
    DEFAULT_SCHEMA_TIMEOUT_SECS
}

fn default_execute_timeout_secs() -> u64 {
    DEFAULT_EXECUTE_TIMEOUT_SECS
}

fn default_upload_timeout_secs() -> u64 {
    DEFAULT_UPLOAD_TIMEOUT_SECS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl Default for RunchatConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            schema_timeout: default_schema_timeout_secs(),
            execute_timeout: default_execute_timeout_secs(),
            upload_timeout: default_upload_timeout_secs(),
            connect_timeout: default_connect_timeout_secs(),
            user_agent: None,
        }
    }
}

impl fmt::Debug for RunchatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunchatConfig")
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("base_url", &self.base_url)
            .field("schema_timeout", &self.schema_timeout)
            .field("execute_timeout", &self.execute_timeout)
            .field("upload_timeout", &self.upload_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl RunchatConfig {
    /// Creates a configuration with the given API key and default settings.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Whether an API key is configured.
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Parses the base URL, normalized to end with `/` so relative joins keep its path.
    pub fn base_url(&self) -> Result<Url> {
        let mut raw = self.base_url.trim().to_owned();
        if !raw.ends_with('/') {
            raw.push('/');
        }

        let url = Url::parse(&raw)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "base URL must use http or https, got '{}'",
                url.scheme()
            )));
        }

        Ok(url)
    }

    /// Returns the schema fetch timeout.
    pub fn schema_timeout(&self) -> Duration {
        effective(self.schema_timeout, DEFAULT_SCHEMA_TIMEOUT_SECS)
    }

    /// Returns the execution timeout.
    pub fn execute_timeout(&self) -> Duration {
        effective(self.execute_timeout, DEFAULT_EXECUTE_TIMEOUT_SECS)
    }

    /// Returns the upload timeout.
    pub fn upload_timeout(&self) -> Duration {
        effective(self.upload_timeout, DEFAULT_UPLOAD_TIMEOUT_SECS)
    }

    /// Returns the connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        effective(self.connect_timeout, DEFAULT_CONNECT_TIMEOUT_SECS)
    }

    /// Returns the effective user agent, using default if not set.
    pub fn effective_user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(Self::default_user_agent)
    }

    /// Returns the default user agent string.
    fn default_user_agent() -> String {
        format!("runchat-rs/{}", env!("CARGO_PKG_VERSION"))
    }

    /// Checks that the configuration can be used to build a client.
    pub fn validate(&self) -> Result<()> {
        self.base_url()?;
        Ok(())
    }

    /// Set the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// Set the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the schema fetch timeout in seconds.
    #[must_use]
    pub fn with_schema_timeout(mut self, timeout_secs: u64) -> Self {
        self.schema_timeout = timeout_secs;
        self
    }

    /// Set the execution timeout in seconds.
    #[must_use]
    pub fn with_execute_timeout(mut self, timeout_secs: u64) -> Self {
        self.execute_timeout = timeout_secs;
        self
    }

    /// Set the upload timeout in seconds.
    #[must_use]
    pub fn with_upload_timeout(mut self, timeout_secs: u64) -> Self {
        self.upload_timeout = timeout_secs;
        self
    }

    /// Set the connect timeout in seconds.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout_secs: u64) -> Self {
        self.connect_timeout = timeout_secs;
        self
    }

    /// Set the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Zero means "use the default".
fn effective(secs: u64, default_secs: u64) -> Duration {
    if secs == 0 {
        Duration::from_secs(default_secs)
    } else {
        Duration::from_secs(secs)
    }
}
