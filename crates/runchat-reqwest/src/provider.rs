//! Capability implementations for [`RunchatClient`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use runchat_core::capability::{BlobUploader, MediaFetcher};
use runchat_core::mapper::ExecutionRequest;
use runchat_core::provider::WorkflowProvider;
use runchat_core::response::{ExecutionResponse, StatusReport, WorkflowExample};
use runchat_core::schema::{WorkflowId, WorkflowSchema};
use runchat_core::{ErrorKind, Result, ServiceHealth};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use crate::{Error, RunchatClient, TRACING_TARGET};

/// Body of the upload endpoint.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadBody<'a> {
    base64_image: String,
    filename: &'a str,
}

/// Response of the upload endpoint.
#[derive(Deserialize)]
struct UploadResponse {
    url: Option<String>,
}

/// Response of the examples endpoint.
#[derive(Deserialize)]
struct ExamplesResponse {
    #[serde(default)]
    examples: Vec<WorkflowExample>,
}

#[async_trait::async_trait]
impl WorkflowProvider for RunchatClient {
    async fn fetch_schema(&self, workflow_id: &WorkflowId) -> Result<WorkflowSchema> {
        let url = self.workflow_endpoint(workflow_id, "schema")?;

        tracing::debug!(
            target: TRACING_TARGET,
            workflow_id = %workflow_id,
            "Requesting workflow schema"
        );

        let request = self
            .http()
            .get(url)
            .timeout(self.config().schema_timeout());
        let response = self.send(self.authorized(request)?).await?;

        let body = Self::read_json(response).await.map_err(|error| {
            if error.kind == ErrorKind::Serialization {
                runchat_core::Error::schema_parse("schema response is not valid JSON")
                    .with_source(error)
            } else {
                error
            }
        })?;

        WorkflowSchema::from_value(workflow_id.clone(), &body)
    }

    async fn execute(
        &self,
        workflow_id: &WorkflowId,
        request: &ExecutionRequest,
        instance_id: Option<&str>,
    ) -> Result<ExecutionResponse> {
        let url = self.workflow_endpoint(workflow_id, "")?;

        let mut body = json!({ "inputs": request.to_value() });
        if let Some(instance_id) = instance_id {
            body["runchat_instance_id"] = Value::String(instance_id.to_owned());
        }

        tracing::debug!(
            target: TRACING_TARGET,
            workflow_id = %workflow_id,
            values = request.len(),
            webhook = matches!(request, ExecutionRequest::Webhook(_)),
            has_instance = instance_id.is_some(),
            "Sending execution request"
        );

        let http_request = self
            .http()
            .post(url)
            .json(&body)
            .timeout(self.config().execute_timeout());
        let response = self.send(self.authorized(http_request)?).await?;
        let body = Self::read_json(response).await?;

        ExecutionResponse::from_value(&body)
    }

    async fn poll_status(
        &self,
        workflow_id: &WorkflowId,
        instance_id: &str,
    ) -> Result<Option<StatusReport>> {
        let url = self.workflow_endpoint(workflow_id, "status")?;

        let request = self
            .http()
            .post(url)
            .json(&json!({ "runchat_instance_id": instance_id }))
            .timeout(self.config().schema_timeout());

        let response = match self.send(self.authorized(request)?).await {
            Ok(response) => response,
            Err(error) if error.kind == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error),
        };

        let body = Self::read_json(response).await?;
        if !body.is_object() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_value(body).map_err(Error::from)?))
    }

    async fn list_examples(&self, plugin: &str) -> Result<Vec<WorkflowExample>> {
        let url = self.endpoint("v1/examples")?;

        let request = self
            .http()
            .get(url)
            .query(&[("plugin", plugin)])
            .timeout(self.config().schema_timeout());
        let response = self.send(request).await?;
        let body = Self::read_json(response).await?;

        let parsed: ExamplesResponse = serde_json::from_value(body).map_err(Error::from)?;
        Ok(parsed.examples)
    }

    async fn health_check(&self) -> Result<ServiceHealth> {
        // No dedicated health endpoint exists; report configuration problems only.
        if self.config().has_api_key() {
            Ok(ServiceHealth::healthy())
        } else {
            Ok(ServiceHealth::unhealthy("API key is not configured"))
        }
    }
}

#[async_trait::async_trait]
impl BlobUploader for RunchatClient {
    async fn upload(&self, data: Bytes, content_type: &str, filename: &str) -> Result<Url> {
        let url = self.endpoint("upload/supabase")?;

        tracing::debug!(
            target: TRACING_TARGET,
            filename,
            content_type,
            size = data.len(),
            "Uploading image"
        );

        let body = UploadBody {
            base64_image: STANDARD.encode(&data),
            filename,
        };

        let request = self
            .http()
            .post(url)
            .json(&body)
            .timeout(self.config().upload_timeout());
        let response = self.send(self.authorized(request)?).await?;
        let body = Self::read_json(response).await?;

        let parsed: UploadResponse = serde_json::from_value(body).map_err(Error::from)?;
        let uploaded = parsed.url.filter(|url| !url.is_empty()).ok_or_else(|| {
            runchat_core::Error::serialization().with_message("upload response has no URL")
        })?;

        Ok(Url::parse(&uploaded)?)
    }
}

#[async_trait::async_trait]
impl MediaFetcher for RunchatClient {
    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        tracing::debug!(
            target: TRACING_TARGET,
            host = url.host_str(),
            "Fetching media output"
        );

        // Output media lives on third-party storage; no credentials are sent.
        let request = self
            .http()
            .get(url.clone())
            .timeout(self.config().upload_timeout());
        let response = self.send(request).await?;

        Ok(response.bytes().await.map_err(Error::from)?)
    }
}
