//! Workflow schema model.
//!
//! A [`WorkflowSchema`] is the declared list of input and output ports of a
//! remote workflow. It is immutable once parsed; callers replace it wholesale
//! when the workflow is reloaded.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Opaque identifier of a remote workflow.
///
/// The identifier is interpolated into request paths, so only ASCII
/// alphanumerics, `_` and `-` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Creates a workflow id, rejecting empty values and path-unsafe characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();

        if trimmed.is_empty() {
            return Err(Error::invalid_input().with_message("workflow id is empty"));
        }

        if let Some(invalid) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(Error::invalid_input()
                .with_message(format!("workflow id contains invalid character '{invalid}'")));
        }

        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkflowId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for WorkflowId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<WorkflowId> for String {
    fn from(id: WorkflowId) -> Self {
        id.0
    }
}

impl AsRef<str> for WorkflowId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Declared kind of a port.
///
/// Unrecognized kinds are kept as [`PortKind::Other`] and handled as generic
/// data, so newer server-side kinds do not break older clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PortKind {
    /// Plain text.
    Text,
    /// An image, delivered to the service as an uploaded URL.
    Image,
    /// A 3D model.
    Model,
    /// A raw JSON document.
    Webhook,
    /// Generic structured data.
    Data,
    /// A kind this client does not know, with the raw server string.
    Other(String),
}

impl PortKind {
    /// Parses a kind string, accepting the aliases the service emits.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "string" => Self::Text,
            "image" | "screenshot" => Self::Image,
            "model" => Self::Model,
            "webhook" => Self::Webhook,
            "data" | "json" | "generic-data" => Self::Data,
            _ => Self::Other(raw.to_owned()),
        }
    }

    /// Returns the display string of the kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Model => "model",
            Self::Webhook => "webhook",
            Self::Data => "data",
            Self::Other(raw) => raw,
        }
    }

    /// Whether values of this kind are treated as generic data.
    pub fn is_generic(&self) -> bool {
        matches!(self, Self::Data | Self::Other(_))
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for PortKind {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for PortKind {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<PortKind> for String {
    fn from(kind: PortKind) -> Self {
        kind.as_str().to_owned()
    }
}

/// Identifies a port by its parameter and node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRef {
    /// Parameter identifier within the node.
    pub param_id: String,
    /// Node identifier within the workflow graph.
    pub node_id: String,
}

impl PortRef {
    /// Creates a new port reference.
    pub fn new(param_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            param_id: param_id.into(),
            node_id: node_id.into(),
        }
    }

    /// Parses a composite `paramId_nodeId` key, splitting at the first `_`.
    pub fn from_key(key: &str) -> Option<Self> {
        let (param_id, node_id) = key.split_once('_')?;
        if param_id.is_empty() || node_id.is_empty() {
            return None;
        }
        Some(Self::new(param_id, node_id))
    }

    /// Returns the payload key, `"{paramId}_{nodeId}"`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.param_id, self.node_id)
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.param_id, self.node_id)
    }
}

/// A declared input or output port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    /// Parameter identifier within the node.
    pub param_id: String,
    /// Node identifier within the workflow graph.
    pub node_id: String,
    /// Declared kind.
    pub kind: PortKind,
    /// Whether a value must be supplied.
    #[serde(default)]
    pub required: bool,
    /// Human readable label.
    pub label: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PortSpec {
    /// Creates a port spec with the label defaulting to the parameter id.
    pub fn new(param_id: impl Into<String>, node_id: impl Into<String>, kind: PortKind) -> Self {
        let param_id = param_id.into();
        Self {
            label: param_id.clone(),
            param_id,
            node_id: node_id.into(),
            kind,
            required: false,
            description: None,
        }
    }

    /// Marks the port as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Returns the reference of this port.
    pub fn port_ref(&self) -> PortRef {
        PortRef::new(&self.param_id, &self.node_id)
    }

    /// Returns the payload key of this port.
    pub fn key(&self) -> String {
        format!("{}_{}", self.param_id, self.node_id)
    }

    /// Whether this port matches the given reference.
    pub fn matches(&self, port: &PortRef) -> bool {
        self.param_id == port.param_id && self.node_id == port.node_id
    }
}

/// Declared inputs and outputs of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSchema {
    /// The workflow this schema describes.
    pub workflow_id: WorkflowId,
    /// Display name reported by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Input ports in declared order.
    pub inputs: Vec<PortSpec>,
    /// Output ports in declared order.
    pub outputs: Vec<PortSpec>,
}

impl WorkflowSchema {
    /// Creates a schema from already validated port lists.
    pub fn new(workflow_id: WorkflowId, inputs: Vec<PortSpec>, outputs: Vec<PortSpec>) -> Self {
        Self {
            workflow_id,
            name: None,
            inputs,
            outputs,
        }
    }

    /// Parses the body of a schema response.
    ///
    /// Both `inputs` and `outputs` must be arrays. Each port may use the
    /// canonical `{paramId, nodeId, kind, ...}` form or the `{id, type, ...}`
    /// form with a composite `paramId_nodeId` id.
    pub fn from_value(workflow_id: WorkflowId, value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::schema_parse("schema response is not a JSON object"))?;

        let inputs = parse_ports(object, "inputs")?;
        let outputs = parse_ports(object, "outputs")?;
        let name = object
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_owned);

        Ok(Self {
            workflow_id,
            name,
            inputs,
            outputs,
        })
    }

    /// Finds an input port by reference.
    pub fn input(&self, port: &PortRef) -> Option<&PortSpec> {
        self.inputs.iter().find(|spec| spec.matches(port))
    }

    /// Finds an output port by reference.
    pub fn output(&self, port: &PortRef) -> Option<&PortSpec> {
        self.outputs.iter().find(|spec| spec.matches(port))
    }

    /// Finds an output port by its payload key.
    pub fn output_by_key(&self, key: &str) -> Option<&PortSpec> {
        self.outputs.iter().find(|spec| spec.key() == key)
    }

    /// Returns the required input ports in declared order.
    pub fn required_inputs(&self) -> impl Iterator<Item = &PortSpec> {
        self.inputs.iter().filter(|spec| spec.required)
    }
}

fn parse_ports(object: &Map<String, Value>, list: &str) -> Result<Vec<PortSpec>> {
    let items = object
        .get(list)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::schema_parse(format!("schema response has no '{list}' array")))?;

    let mut seen = HashSet::with_capacity(items.len());
    let mut ports = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let port = parse_port(item)
            .map_err(|e| e.with_context(format!("{list}[{index}]")))?;

        if !seen.insert(port.port_ref()) {
            return Err(Error::schema_parse(format!(
                "duplicate port {} in '{list}'",
                port.port_ref()
            ))
            .with_port(port.port_ref()));
        }

        ports.push(port);
    }

    Ok(ports)
}

fn parse_port(item: &Value) -> Result<PortSpec> {
    let object = item
        .as_object()
        .ok_or_else(|| Error::schema_parse("port entry is not a JSON object"))?;

    let (param_id, node_id) = match object.get("paramId") {
        Some(param_id) => {
            let param_id = identifier(param_id)
                .ok_or_else(|| Error::schema_parse("port 'paramId' is not a string"))?;
            let node_id = object
                .get("nodeId")
                .and_then(identifier)
                .ok_or_else(|| Error::schema_parse("port has no 'nodeId'"))?;
            (param_id, node_id)
        }
        None => {
            let id = object
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::schema_parse("port has neither 'paramId' nor 'id'"))?;
            let port = PortRef::from_key(id).ok_or_else(|| {
                Error::schema_parse(format!("port id '{id}' is not of the form paramId_nodeId"))
            })?;
            (port.param_id, port.node_id)
        }
    };

    let kind = object
        .get("kind")
        .or_else(|| object.get("type"))
        .and_then(Value::as_str)
        .map(PortKind::parse)
        .unwrap_or(PortKind::Text);

    let required = object
        .get("required")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let label = object
        .get("label")
        .and_then(Value::as_str)
        .filter(|label| !label.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| param_id.clone());

    let description = object
        .get("description")
        .and_then(Value::as_str)
        .filter(|description| !description.is_empty())
        .map(str::to_owned);

    Ok(PortSpec {
        param_id,
        node_id,
        kind,
        required,
        label,
        description,
    })
}

/// Node ids are sometimes sent as numbers.
fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ErrorKind;

    fn workflow() -> WorkflowId {
        WorkflowId::new("wf_123").unwrap()
    }

    #[test]
    fn test_workflow_id_validation() {
        assert!(WorkflowId::new("abc-DEF_123").is_ok());
        assert_eq!(WorkflowId::new("  abc ").unwrap().as_str(), "abc");

        assert_eq!(
            WorkflowId::new("").unwrap_err().kind,
            ErrorKind::InvalidInput
        );
        assert!(WorkflowId::new("../etc").is_err());
        assert!(WorkflowId::new("a b").is_err());
    }

    #[test]
    fn test_port_kind_aliases() {
        assert_eq!(PortKind::parse("String"), PortKind::Text);
        assert_eq!(PortKind::parse("screenshot"), PortKind::Image);
        assert_eq!(PortKind::parse("MODEL"), PortKind::Model);
        assert_eq!(PortKind::parse("generic-data"), PortKind::Data);
        assert_eq!(PortKind::parse("json"), PortKind::Data);

        let other = PortKind::parse("pointcloud");
        assert_eq!(other, PortKind::Other("pointcloud".into()));
        assert_eq!(other.as_str(), "pointcloud");
        assert!(other.is_generic());
    }

    #[test]
    fn test_port_ref_key() {
        let port = PortRef::new("prompt", "1");
        assert_eq!(port.key(), "prompt_1");

        assert_eq!(PortRef::from_key("prompt_1"), Some(port));
        assert_eq!(
            PortRef::from_key("a_b_c"),
            Some(PortRef::new("a", "b_c"))
        );
        assert_eq!(PortRef::from_key("prompt"), None);
    }

    #[test]
    fn test_parse_canonical_schema() {
        let body = json!({
            "inputs": [{"paramId": "prompt", "nodeId": "1", "kind": "text", "required": true}],
            "outputs": [{"paramId": "out", "nodeId": "2", "kind": "image"}]
        });

        let schema = WorkflowSchema::from_value(workflow(), &body).unwrap();

        assert_eq!(schema.inputs.len(), 1);
        assert_eq!(schema.inputs[0].param_id, "prompt");
        assert_eq!(schema.inputs[0].label, "prompt");
        assert!(schema.inputs[0].required);
        assert_eq!(schema.outputs[0].kind, PortKind::Image);
        assert!(!schema.outputs[0].required);
    }

    #[test]
    fn test_parse_basic_parameter_schema() {
        let body = json!({
            "name": "Image to 3D",
            "inputs": [{"id": "image_abc", "label": "Image", "type": "image", "description": "source"}],
            "outputs": [{"id": "mesh_def", "label": "Mesh", "type": "model"}]
        });

        let schema = WorkflowSchema::from_value(workflow(), &body).unwrap();

        assert_eq!(schema.name.as_deref(), Some("Image to 3D"));
        assert_eq!(schema.inputs[0].port_ref(), PortRef::new("image", "abc"));
        assert_eq!(schema.inputs[0].description.as_deref(), Some("source"));
        assert_eq!(schema.outputs[0].kind, PortKind::Model);
    }

    #[test]
    fn test_parse_rejects_missing_arrays() {
        let missing = json!({"inputs": []});
        let error = WorkflowSchema::from_value(workflow(), &missing).unwrap_err();
        assert_eq!(error.kind, ErrorKind::SchemaParse);

        let not_array = json!({"inputs": {}, "outputs": []});
        let error = WorkflowSchema::from_value(workflow(), &not_array).unwrap_err();
        assert_eq!(error.kind, ErrorKind::SchemaParse);
    }

    #[test]
    fn test_parse_rejects_duplicate_ports() {
        let body = json!({
            "inputs": [
                {"paramId": "prompt", "nodeId": "1", "kind": "text"},
                {"id": "prompt_1", "type": "text"}
            ],
            "outputs": []
        });

        let error = WorkflowSchema::from_value(workflow(), &body).unwrap_err();
        assert_eq!(error.kind, ErrorKind::SchemaParse);
        assert_eq!(error.port, Some(PortRef::new("prompt", "1")));
    }

    #[test]
    fn test_same_pair_allowed_across_lists() {
        let body = json!({
            "inputs": [{"paramId": "value", "nodeId": "1", "kind": "text"}],
            "outputs": [{"paramId": "value", "nodeId": "1", "kind": "text"}]
        });

        assert!(WorkflowSchema::from_value(workflow(), &body).is_ok());
    }

    #[test]
    fn test_parse_rejects_id_without_separator() {
        let body = json!({"inputs": [{"id": "prompt", "type": "text"}], "outputs": []});

        let error = WorkflowSchema::from_value(workflow(), &body).unwrap_err();
        assert_eq!(error.kind, ErrorKind::SchemaParse);
        assert_eq!(error.context.as_deref(), Some("inputs[0]"));
    }

    #[test]
    fn test_numeric_node_id() {
        let body = json!({
            "inputs": [{"paramId": "seed", "nodeId": 7, "kind": "data"}],
            "outputs": []
        });

        let schema = WorkflowSchema::from_value(workflow(), &body).unwrap();
        assert_eq!(schema.inputs[0].key(), "seed_7");
    }

    #[test]
    fn test_serde_round_trip_preserves_order() {
        let schema = WorkflowSchema::new(
            workflow(),
            vec![
                PortSpec::new("b", "2", PortKind::Text).required(),
                PortSpec::new("a", "1", PortKind::Image),
                PortSpec::new("c", "3", PortKind::Other("voxels".into())),
            ],
            vec![PortSpec::new("out", "9", PortKind::Model).with_label("Mesh")],
        );

        let encoded = serde_json::to_value(&schema).unwrap();
        let decoded: WorkflowSchema = serde_json::from_value(encoded.clone()).unwrap();
        assert_eq!(decoded, schema);

        let reparsed = WorkflowSchema::from_value(workflow(), &encoded).unwrap();
        assert_eq!(reparsed.inputs, schema.inputs);
        assert_eq!(reparsed.outputs, schema.outputs);
    }
}
