//! Reqwest-based client for the Runchat API.

use std::sync::Arc;

use reqwest::{Client, RequestBuilder, Response};
use runchat_core::provider::WorkflowService;
use runchat_core::schema::WorkflowId;
use runchat_core::{ErrorKind, Result};
use serde_json::Value;
use url::Url;

use crate::{Error, RunchatConfig, TRACING_TARGET, status};

/// Inner client that holds the HTTP client and configuration.
struct RunchatClientInner {
    http: Client,
    base_url: Url,
    config: RunchatConfig,
}

/// Reqwest-based HTTP client for the Runchat workflow API.
///
/// Implements [`WorkflowProvider`](runchat_core::provider::WorkflowProvider),
/// [`BlobUploader`](runchat_core::capability::BlobUploader) and
/// [`MediaFetcher`](runchat_core::capability::MediaFetcher). Clones share the
/// underlying connection pool.
///
/// # Examples
///
/// ```rust,ignore
/// use runchat_reqwest::{RunchatClient, RunchatConfig};
///
/// let client = RunchatClient::new(RunchatConfig::new(api_key))?;
/// let schema = client.fetch_schema(&"my-workflow".parse()?).await?;
/// ```
#[derive(Clone)]
pub struct RunchatClient {
    inner: Arc<RunchatClientInner>,
}

impl std::fmt::Debug for RunchatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunchatClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl RunchatClient {
    /// Creates a new client with the given configuration.
    pub fn new(config: RunchatConfig) -> Result<Self> {
        config.validate()?;
        let base_url = config.base_url()?;
        let user_agent = config.effective_user_agent();

        tracing::debug!(
            target: TRACING_TARGET,
            base_url = %base_url,
            connect_timeout_ms = config.connect_timeout().as_millis(),
            schema_timeout_ms = config.schema_timeout().as_millis(),
            execute_timeout_ms = config.execute_timeout().as_millis(),
            upload_timeout_ms = config.upload_timeout().as_millis(),
            "Creating Runchat client"
        );

        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .user_agent(&user_agent)
            .build()
            .map_err(Error::from)?;

        let inner = RunchatClientInner {
            http,
            base_url,
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Gets the client configuration.
    pub fn config(&self) -> &RunchatConfig {
        &self.inner.config
    }

    /// Gets the normalized base URL.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Converts this client into a [`WorkflowService`] for use with dependency injection.
    pub fn into_service(self) -> WorkflowService {
        WorkflowService::new(self)
    }

    /// Gets the underlying HTTP client.
    pub(crate) fn http(&self) -> &Client {
        &self.inner.http
    }

    /// Resolves a path relative to the base URL.
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.inner.base_url.join(path).map_err(Error::from)?)
    }

    /// Resolves `v1/{workflowId}` followed by an optional suffix.
    pub(crate) fn workflow_endpoint(&self, workflow_id: &WorkflowId, suffix: &str) -> Result<Url> {
        let path = if suffix.is_empty() {
            format!("v1/{workflow_id}")
        } else {
            format!("v1/{workflow_id}/{suffix}")
        };
        self.endpoint(&path)
    }

    /// Adds the bearer token, failing early when no key is configured.
    pub(crate) fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let config = &self.inner.config;
        if !config.has_api_key() {
            return Err(runchat_core::Error::new(ErrorKind::Authentication)
                .with_message("API key is not configured"));
        }
        Ok(request.bearer_auth(config.api_key.trim()))
    }

    /// Sends a request and classifies the response status.
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(Error::from)?;
        status::check(response).await
    }

    /// Reads a response body as JSON.
    pub(crate) async fn read_json(response: Response) -> Result<Value> {
        let body = response.bytes().await.map_err(Error::from)?;
        Ok(serde_json::from_slice(&body).map_err(Error::from)?)
    }
}
