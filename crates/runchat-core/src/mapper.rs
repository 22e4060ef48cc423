//! Maps input values onto the execution payload.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};

use crate::input::{InputValue, InputValues};
use crate::schema::{PortRef, WorkflowSchema};
use crate::{Error, Result, TRACING_TARGET_MAPPER};

/// How the execution payload is built.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DeliveryMode {
    /// Key values by `paramId_nodeId` according to the schema.
    #[default]
    Schema,
    /// Send the given document as is, ignoring the schema.
    Webhook(Value),
}

/// Payload of one execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionRequest {
    /// Values keyed by `paramId_nodeId`.
    Keyed(Map<String, Value>),
    /// A caller-supplied document.
    Webhook(Value),
}

impl ExecutionRequest {
    /// Returns the JSON document sent as the execution inputs.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Keyed(map) => Value::Object(map.clone()),
            Self::Webhook(document) => document.clone(),
        }
    }

    /// Number of keyed values, or one for a webhook document.
    pub fn len(&self) -> usize {
        match self {
            Self::Keyed(map) => map.len(),
            Self::Webhook(_) => 1,
        }
    }

    /// Whether the keyed payload is empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Keyed(map) if map.is_empty())
    }
}

/// Builds the execution payload for `schema` from `values`.
///
/// In schema mode every required input must have a value and every image
/// must already be uploaded. Nothing is returned on failure.
pub fn build_payload(
    schema: &WorkflowSchema,
    values: &InputValues,
    mode: &DeliveryMode,
) -> Result<ExecutionRequest> {
    if let DeliveryMode::Webhook(document) = mode {
        tracing::debug!(
            target: TRACING_TARGET_MAPPER,
            workflow_id = %schema.workflow_id,
            "Using webhook payload"
        );
        return Ok(ExecutionRequest::Webhook(document.clone()));
    }

    let keys = payload_keys(schema)?;
    let mut payload = Map::with_capacity(schema.inputs.len());

    for (spec, key) in schema.inputs.iter().zip(keys) {
        let port = spec.port_ref();

        let Some(value) = values.get(&port) else {
            if spec.required {
                return Err(Error::missing_required_input(port));
            }
            continue;
        };

        let encoded = match value {
            InputValue::Text(text) => Value::String(text.clone()),
            InputValue::Webhook(document) => document.clone(),
            InputValue::Raw(raw) => json!({
                "contentType": raw.content_type,
                "data": STANDARD.encode(&raw.data),
            }),
            InputValue::Tree(tree) => Value::Object(
                tree.iter()
                    .map(|(path, value)| (path.clone(), value.clone()))
                    .collect(),
            ),
            InputValue::Image(image) => match image.uploaded_url() {
                Some(url) => Value::String(url.to_string()),
                None if spec.required => return Err(Error::upload_incomplete(port)),
                None => {
                    tracing::debug!(
                        target: TRACING_TARGET_MAPPER,
                        port = %port,
                        status = %image.status,
                        "Omitting optional image without upload"
                    );
                    continue;
                }
            },
        };

        payload.insert(key, encoded);
    }

    tracing::debug!(
        target: TRACING_TARGET_MAPPER,
        workflow_id = %schema.workflow_id,
        keys = payload.len(),
        "Built keyed payload"
    );

    Ok(ExecutionRequest::Keyed(payload))
}

/// Computes the payload key of every input, failing on collisions.
fn payload_keys(schema: &WorkflowSchema) -> Result<Vec<String>> {
    let mut owners: HashMap<String, PortRef> = HashMap::with_capacity(schema.inputs.len());
    let mut keys = Vec::with_capacity(schema.inputs.len());

    for spec in &schema.inputs {
        let key = spec.key();
        let port = spec.port_ref();

        if let Some(owner) = owners.get(&key)
            && owner != &port
        {
            return Err(Error::ambiguous_key(&key, owner, port));
        }

        owners.insert(key.clone(), port);
        keys.push(key);
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use url::Url;

    use super::*;
    use crate::ErrorKind;
    use crate::input::{ImageValue, RawData};
    use crate::schema::{PortKind, PortSpec, WorkflowId};
    use crate::upload::UploadStatus;

    fn schema(inputs: Vec<PortSpec>) -> WorkflowSchema {
        WorkflowSchema::new(
            WorkflowId::new("wf").unwrap(),
            inputs,
            vec![PortSpec::new("out", "2", PortKind::Image)],
        )
    }

    fn prompt_schema() -> WorkflowSchema {
        schema(vec![PortSpec::new("prompt", "1", PortKind::Text).required()])
    }

    #[test]
    fn test_text_payload() {
        let values = InputValues::new().with("prompt", "a cat");

        let request = build_payload(&prompt_schema(), &values, &DeliveryMode::Schema).unwrap();

        assert_eq!(request.to_value(), json!({"prompt_1": "a cat"}));
    }

    #[test]
    fn test_missing_required_input() {
        let error = build_payload(&prompt_schema(), &InputValues::new(), &DeliveryMode::Schema)
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::MissingRequiredInput);
        assert_eq!(error.port, Some(PortRef::new("prompt", "1")));
    }

    #[test]
    fn test_optional_inputs_skipped_and_extras_ignored() {
        let schema = schema(vec![
            PortSpec::new("prompt", "1", PortKind::Text).required(),
            PortSpec::new("seed", "4", PortKind::Data),
        ]);
        let values = InputValues::new()
            .with("prompt", "a cat")
            .with("undeclared", "ignored");

        let request = build_payload(&schema, &values, &DeliveryMode::Schema).unwrap();

        assert_eq!(request.to_value(), json!({"prompt_1": "a cat"}));
    }

    #[test]
    fn test_ambiguous_key() {
        // ("a_b", "c") and ("a", "b_c") both produce "a_b_c".
        let schema = schema(vec![
            PortSpec::new("a_b", "c", PortKind::Text),
            PortSpec::new("a", "b_c", PortKind::Text),
        ]);
        let values = InputValues::new()
            .with(PortRef::new("a_b", "c"), "first")
            .with(PortRef::new("a", "b_c"), "second");

        let error = build_payload(&schema, &values, &DeliveryMode::Schema).unwrap_err();

        assert_eq!(error.kind, ErrorKind::AmbiguousKey);
    }

    #[test]
    fn test_ambiguous_key_wins_over_missing_input() {
        let schema = schema(vec![
            PortSpec::new("x", "1", PortKind::Text).required(),
            PortSpec::new("a_b", "c", PortKind::Text),
            PortSpec::new("a", "b_c", PortKind::Text),
        ]);

        let error = build_payload(&schema, &InputValues::new(), &DeliveryMode::Schema).unwrap_err();

        assert_eq!(error.kind, ErrorKind::AmbiguousKey);
    }

    #[test]
    fn test_image_requires_upload() {
        let schema = schema(vec![PortSpec::new("image", "3", PortKind::Image).required()]);

        let pending = InputValues::new().with("image", ImageValue::from_path("cat.png"));
        let error = build_payload(&schema, &pending, &DeliveryMode::Schema).unwrap_err();
        assert_eq!(error.kind, ErrorKind::UploadIncomplete);

        let mut uploading = ImageValue::from_path("cat.png");
        uploading.status = UploadStatus::Uploading(0.5);
        let values = InputValues::new().with("image", uploading);
        let error = build_payload(&schema, &values, &DeliveryMode::Schema).unwrap_err();
        assert_eq!(error.kind, ErrorKind::UploadIncomplete);

        let url = Url::parse("https://cdn.example.com/cat.png").unwrap();
        let values = InputValues::new().with("image", ImageValue::from_url(url));
        let request = build_payload(&schema, &values, &DeliveryMode::Schema).unwrap();
        assert_eq!(
            request.to_value(),
            json!({"image_3": "https://cdn.example.com/cat.png"})
        );
    }

    #[test]
    fn test_optional_failed_image_is_omitted() {
        let schema = schema(vec![
            PortSpec::new("prompt", "1", PortKind::Text).required(),
            PortSpec::new("image", "3", PortKind::Image),
        ]);
        let mut failed = ImageValue::from_path("cat.png");
        failed.status = UploadStatus::Failed("too large".into());
        let values = InputValues::new()
            .with("prompt", "a cat")
            .with("image", failed);

        let request = build_payload(&schema, &values, &DeliveryMode::Schema).unwrap();

        assert_eq!(request.to_value(), json!({"prompt_1": "a cat"}));
    }

    #[test]
    fn test_raw_tree_and_webhook_values() {
        let schema = schema(vec![
            PortSpec::new("raw", "1", PortKind::Data),
            PortSpec::new("tree", "2", PortKind::Data),
            PortSpec::new("doc", "3", PortKind::Webhook),
        ]);
        let tree = BTreeMap::from([
            ("0".to_owned(), json!("a")),
            ("0:1".to_owned(), json!(["b", "c"])),
        ]);
        let values = InputValues::new()
            .with("raw", RawData::new(b"hi".to_vec(), "text/plain"))
            .with("tree", tree)
            .with("doc", json!({"nested": true}));

        let request = build_payload(&schema, &values, &DeliveryMode::Schema).unwrap();

        assert_eq!(
            request.to_value(),
            json!({
                "raw_1": {"contentType": "text/plain", "data": "aGk="},
                "tree_2": {"0": "a", "0:1": ["b", "c"]},
                "doc_3": {"nested": true}
            })
        );
    }

    #[test]
    fn test_webhook_mode_passes_document_through() {
        let document = json!({"event": "render", "frames": [1, 2]});

        let request = build_payload(
            &prompt_schema(),
            &InputValues::new(),
            &DeliveryMode::Webhook(document.clone()),
        )
        .unwrap();

        assert_eq!(request, ExecutionRequest::Webhook(document));
    }
}
