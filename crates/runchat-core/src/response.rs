//! Raw responses of the workflow service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{PortKind, PortRef};
use crate::{Error, Result};

/// One output entry as found in an execution response, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputEntry {
    /// Identifier used by the response, either `paramId_nodeId` or a bare parameter id.
    pub id: String,
    /// Port parsed from the identifier, when it has both parts.
    pub port: Option<PortRef>,
    /// Kind reported next to the value, if any.
    pub kind: Option<PortKind>,
    /// Format tag reported next to the value, if any.
    pub format: Option<String>,
    /// The value.
    pub value: Value,
}

impl OutputEntry {
    fn new(id: impl Into<String>, value: Value) -> Self {
        let id = id.into();
        Self {
            port: PortRef::from_key(&id),
            id,
            kind: None,
            format: None,
            value,
        }
    }
}

/// Parsed body of an execution response.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResponse {
    /// Output entries in response order.
    pub outputs: Vec<OutputEntry>,
    /// Instance id assigned or continued by the service.
    pub instance_id: Option<String>,
    /// Execution time reported by the service.
    pub execution_time_ms: Option<u64>,
}

impl ExecutionResponse {
    /// Parses an execution response body.
    ///
    /// Outputs are read from an `outputs` array of typed entries, a `data`
    /// array of `{id, data}` entries, or a legacy `outputs` object keyed by
    /// `paramId_nodeId`, in that order of preference.
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            Error::serialization().with_message("execution response is not a JSON object")
        })?;

        let outputs = match (object.get("outputs"), object.get("data")) {
            (Some(Value::Array(items)), _) => items
                .iter()
                .enumerate()
                .map(|(index, item)| typed_entry(item, index))
                .collect::<Result<Vec<_>>>()?,
            (_, Some(Value::Array(items))) => items
                .iter()
                .enumerate()
                .map(|(index, item)| data_entry(item, index))
                .collect::<Result<Vec<_>>>()?,
            (Some(Value::Object(map)), _) => map
                .iter()
                .map(|(key, value)| OutputEntry::new(key.as_str(), value.clone()))
                .collect(),
            _ => Vec::new(),
        };

        let instance_id = ["runchat_instance_id", "instance_id", "instanceId"]
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str))
            .filter(|id| !id.is_empty())
            .map(str::to_owned);

        let execution_time_ms = object.get("executionTimeMs").and_then(Value::as_u64);

        Ok(Self {
            outputs,
            instance_id,
            execution_time_ms,
        })
    }
}

fn typed_entry(item: &Value, index: usize) -> Result<OutputEntry> {
    let object = entry_object(item, index)?;

    let param_id = object.get("paramId").and_then(Value::as_str);
    let node_id = object.get("nodeId").and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    let mut entry = match (param_id, node_id) {
        (Some(param_id), Some(node_id)) => {
            let port = PortRef::new(param_id, node_id);
            OutputEntry {
                id: port.key(),
                port: Some(port),
                kind: None,
                format: None,
                value: Value::Null,
            }
        }
        (Some(param_id), None) => OutputEntry::new(param_id, Value::Null),
        (None, _) => {
            let id = object.get("id").and_then(Value::as_str).ok_or_else(|| {
                Error::serialization()
                    .with_message(format!("output entry {index} has neither 'paramId' nor 'id'"))
            })?;
            OutputEntry::new(id, Value::Null)
        }
    };

    entry.kind = object
        .get("kind")
        .or_else(|| object.get("type"))
        .and_then(Value::as_str)
        .map(PortKind::parse);
    entry.format = object
        .get("format")
        .and_then(Value::as_str)
        .map(str::to_owned);
    entry.value = object
        .get("value")
        .or_else(|| object.get("data"))
        .cloned()
        .unwrap_or(Value::Null);

    Ok(entry)
}

fn data_entry(item: &Value, index: usize) -> Result<OutputEntry> {
    let object = entry_object(item, index)?;

    let id = object.get("id").and_then(Value::as_str).ok_or_else(|| {
        Error::serialization().with_message(format!("output entry {index} has no 'id'"))
    })?;

    let value = match object.get("data") {
        Some(Value::Array(items)) if items.len() == 1 => items[0].clone(),
        Some(value) => value.clone(),
        None => Value::Null,
    };

    Ok(OutputEntry::new(id, value))
}

fn entry_object(item: &Value, index: usize) -> Result<&Map<String, Value>> {
    item.as_object().ok_or_else(|| {
        Error::serialization().with_message(format!("output entry {index} is not a JSON object"))
    })
}

/// Progress reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Server-side state, such as `running` or `completed`.
    #[serde(default = "unknown_status")]
    pub status: String,
    /// Server-side progress. Either a fraction or a percentage.
    #[serde(default)]
    pub progress: f64,
}

fn unknown_status() -> String {
    "unknown".to_owned()
}

impl StatusReport {
    /// Returns the progress as a fraction in `0.0..=1.0`.
    pub fn fraction(&self) -> f32 {
        let progress = if self.progress > 1.0 {
            self.progress / 100.0
        } else {
            self.progress
        };
        progress.clamp(0.0, 1.0) as f32
    }

    /// Whether the service reports the execution as finished.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "completed" | "complete" | "done" | "finished" | "failed" | "error"
        )
    }
}

/// A curated workflow listed by the examples endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExample {
    /// Workflow id to load.
    #[serde(alias = "runchat_id", alias = "runchatId", alias = "workflowId")]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Short description.
    #[serde(default)]
    pub description: Option<String>,
    /// Preview image, if any.
    #[serde(default, alias = "thumbnail_url", alias = "thumbnailUrl")]
    pub thumbnail: Option<String>,
}
