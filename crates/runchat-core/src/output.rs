//! Typed workflow outputs and their classification.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};
use url::Url;

use crate::response::{ExecutionResponse, OutputEntry};
use crate::schema::{PortKind, PortRef, PortSpec, WorkflowSchema};
use crate::TRACING_TARGET_OUTPUT;

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "tif", "tiff", "exr", "hdr",
];

/// Where the bytes of a media output can be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Downloadable from a URL.
    Url(Url),
    /// Inline base64 data, without any `data:` prefix.
    Base64(String),
}

impl MediaSource {
    /// Interprets a string as a URL or inline base64 data.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if raw.starts_with("http://") || raw.starts_with("https://") {
            if let Ok(url) = Url::parse(raw) {
                return Self::Url(url);
            }
        }

        match raw.strip_prefix("data:").and_then(|rest| rest.split_once(',')) {
            Some((_, data)) => Self::Base64(data.to_owned()),
            None => Self::Base64(raw.to_owned()),
        }
    }

    /// Returns the URL, if this source is remote.
    pub fn url(&self) -> Option<&Url> {
        match self {
            Self::Url(url) => Some(url),
            Self::Base64(_) => None,
        }
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{url}"),
            Self::Base64(data) => write!(f, "<base64, {} chars>", data.len()),
        }
    }
}

/// Recognized 3D model formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(AsRefStr, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ModelFormat {
    /// Wavefront OBJ.
    Obj,
    /// Autodesk FBX.
    Fbx,
    /// Stanford PLY.
    Ply,
    /// Stereolithography.
    Stl,
    /// glTF, JSON flavour.
    Gltf,
    /// glTF, binary flavour.
    Glb,
    /// Native scene file of the host application.
    Blend,
}

impl ModelFormat {
    /// Parses a format tag such as `"glb"`, `".GLB"` or `"model/gltf-binary"`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().trim_start_matches('.');
        match tag.to_ascii_lowercase().as_str() {
            "model/gltf+json" => Some(Self::Gltf),
            "model/gltf-binary" => Some(Self::Glb),
            "model/obj" => Some(Self::Obj),
            "model/stl" => Some(Self::Stl),
            other => Self::from_str(other).ok(),
        }
    }

    /// Infers the format from the extension of a URL path.
    pub fn from_url(url: &Url) -> Option<Self> {
        extension(url).and_then(|ext| Self::from_tag(&ext))
    }

    /// File extension for this format.
    pub fn extension(&self) -> &'static str {
        self.into()
    }
}

/// A classified output value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedOutput {
    /// An image.
    Image(MediaSource),
    /// A 3D model.
    Model {
        /// Model format.
        format: ModelFormat,
        /// Where the model data is.
        source: MediaSource,
    },
    /// Plain text.
    Text(String),
    /// Anything else, preserved as JSON.
    Structured(Value),
}

impl TypedOutput {
    /// Short name of the variant, for logs.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Model { .. } => "model",
            Self::Text(_) => "text",
            Self::Structured(_) => "structured",
        }
    }

    /// Returns the text, if this is a text output.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// An output value together with the port it was produced on.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputValue {
    /// Identifier used by the response.
    pub id: String,
    /// The declared output port, when the response id matches one.
    pub port: Option<PortRef>,
    /// Label of the declared port, or the response id.
    pub label: String,
    /// The classified value.
    pub output: TypedOutput,
}

/// Final result of one successful execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Classified outputs in response order.
    pub outputs: Vec<OutputValue>,
    /// Instance id returned by the service.
    pub instance_id: Option<String>,
    /// Time spent executing, as reported by the service or measured locally.
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    /// Classifies the outputs of a response against the schema.
    ///
    /// `elapsed` is used when the service does not report an execution time.
    pub fn from_response(
        schema: &WorkflowSchema,
        response: ExecutionResponse,
        elapsed: Duration,
    ) -> Self {
        let mut outputs = Vec::with_capacity(response.outputs.len());

        for entry in response.outputs {
            let spec = resolve_output(schema, &entry);
            let label = spec.map_or_else(|| entry.id.clone(), |spec| spec.label.clone());
            let port = spec.map(PortSpec::port_ref);

            for output in classify(spec, &entry) {
                outputs.push(OutputValue {
                    id: entry.id.clone(),
                    port: port.clone(),
                    label: label.clone(),
                    output,
                });
            }
        }

        let execution_time_ms = response
            .execution_time_ms
            .unwrap_or_else(|| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));

        Self {
            outputs,
            instance_id: response.instance_id,
            execution_time_ms,
        }
    }
}

/// Finds the declared output an entry belongs to.
fn resolve_output<'a>(schema: &'a WorkflowSchema, entry: &OutputEntry) -> Option<&'a PortSpec> {
    schema
        .output_by_key(&entry.id)
        .or_else(|| entry.port.as_ref().and_then(|port| schema.output(port)))
        .or_else(|| {
            let mut matches = schema
                .outputs
                .iter()
                .filter(|spec| spec.param_id == entry.id);
            match (matches.next(), matches.next()) {
                (Some(spec), None) => Some(spec),
                _ => None,
            }
        })
}

/// Classifies one response entry into typed outputs.
///
/// A declared image or model port forces that kind. Other values are sniffed.
/// Arrays expand into one output per element.
pub fn classify(spec: Option<&PortSpec>, entry: &OutputEntry) -> Vec<TypedOutput> {
    let declared = spec.map(|spec| &spec.kind).or(entry.kind.as_ref());
    let format = entry.format.as_deref();

    match &entry.value {
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| classify_value(declared, format, item))
            .collect(),
        value => vec![classify_value(declared, format, value)],
    }
}

fn classify_value(declared: Option<&PortKind>, format: Option<&str>, value: &Value) -> TypedOutput {
    let output = match declared {
        Some(PortKind::Image) => image(value),
        Some(PortKind::Model) => model(value, format),
        Some(PortKind::Text) => text(value),
        _ => sniff(value, format),
    };

    tracing::trace!(
        target: TRACING_TARGET_OUTPUT,
        declared = declared.map(PortKind::as_str),
        classified = output.variant_name(),
        "Classified output value"
    );

    output
}

fn image(value: &Value) -> TypedOutput {
    match media_string(value) {
        Some(raw) => TypedOutput::Image(MediaSource::parse(raw)),
        None => TypedOutput::Structured(value.clone()),
    }
}

fn model(value: &Value, format: Option<&str>) -> TypedOutput {
    let Some(raw) = media_string(value) else {
        return TypedOutput::Structured(value.clone());
    };

    let source = MediaSource::parse(raw);
    let format = format
        .or_else(|| value.get("format").and_then(Value::as_str))
        .and_then(ModelFormat::from_tag)
        .or_else(|| source.url().and_then(ModelFormat::from_url));

    match format {
        Some(format) => TypedOutput::Model { format, source },
        None => TypedOutput::Structured(value.clone()),
    }
}

fn text(value: &Value) -> TypedOutput {
    match value {
        Value::String(s) => TypedOutput::Text(s.clone()),
        Value::Null => TypedOutput::Text(String::new()),
        Value::Number(_) | Value::Bool(_) => TypedOutput::Text(value.to_string()),
        other => TypedOutput::Structured(other.clone()),
    }
}

fn sniff(value: &Value, format: Option<&str>) -> TypedOutput {
    match value {
        Value::String(s) => {
            let Ok(url) = Url::parse(s.trim()) else {
                return TypedOutput::Text(s.clone());
            };
            if !matches!(url.scheme(), "http" | "https") {
                return TypedOutput::Text(s.clone());
            }

            if let Some(ext) = extension(&url) {
                if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                    return TypedOutput::Image(MediaSource::Url(url));
                }
                if let Some(format) = format
                    .and_then(ModelFormat::from_tag)
                    .or_else(|| ModelFormat::from_tag(&ext))
                {
                    return TypedOutput::Model {
                        format,
                        source: MediaSource::Url(url),
                    };
                }
            }

            TypedOutput::Text(s.clone())
        }
        Value::Object(object) if object.contains_key("type") && object.contains_key("data") => {
            let kind = object
                .get("type")
                .and_then(Value::as_str)
                .map(PortKind::parse);
            match kind {
                Some(PortKind::Image) => image(value),
                Some(PortKind::Model) => model(value, format),
                Some(PortKind::Text) => text(&object["data"]),
                _ => TypedOutput::Structured(value.clone()),
            }
        }
        other => TypedOutput::Structured(other.clone()),
    }
}

/// Returns the string carrying media data, either the value itself or its `data`/`url` field.
fn media_string(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(object) => object
            .get("url")
            .or_else(|| object.get("data"))
            .and_then(Value::as_str),
        _ => None,
    }
}

fn extension(url: &Url) -> Option<String> {
    let name = url.path_segments()?.next_back()?;
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::WorkflowId;

    fn entry(id: &str, value: Value) -> OutputEntry {
        OutputEntry {
            id: id.to_owned(),
            port: PortRef::from_key(id),
            kind: None,
            format: None,
            value,
        }
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn test_model_format_inference() {
        assert_eq!(ModelFormat::from_tag("GLB"), Some(ModelFormat::Glb));
        assert_eq!(ModelFormat::from_tag(".obj"), Some(ModelFormat::Obj));
        assert_eq!(
            ModelFormat::from_tag("model/gltf-binary"),
            Some(ModelFormat::Glb)
        );
        assert_eq!(ModelFormat::from_tag("usdz"), None);
        assert_eq!(
            ModelFormat::from_url(&url("https://cdn/a/scene.blend?sig=1")),
            Some(ModelFormat::Blend)
        );
        assert_eq!(ModelFormat::Gltf.extension(), "gltf");
    }

    #[test]
    fn test_sniff_urls_and_text() {
        let image = classify(None, &entry("x", json!("https://cdn/a.PNG")));
        assert_eq!(image, vec![TypedOutput::Image(MediaSource::Url(url("https://cdn/a.PNG")))]);

        let model = classify(None, &entry("x", json!("https://cdn/mesh.glb")));
        assert_eq!(
            model,
            vec![TypedOutput::Model {
                format: ModelFormat::Glb,
                source: MediaSource::Url(url("https://cdn/mesh.glb")),
            }]
        );

        let page = classify(None, &entry("x", json!("https://runchat.app/docs")));
        assert_eq!(page, vec![TypedOutput::Text("https://runchat.app/docs".into())]);

        let plain = classify(None, &entry("x", json!("hello")));
        assert_eq!(plain, vec![TypedOutput::Text("hello".into())]);
    }

    #[test]
    fn test_declared_image_forces_kind() {
        let spec = PortSpec::new("out", "2", PortKind::Image);

        let outputs = classify(Some(&spec), &entry("out_2", json!("data:image/png;base64,iVBO")));

        assert_eq!(outputs, vec![TypedOutput::Image(MediaSource::Base64("iVBO".into()))]);
    }

    #[test]
    fn test_model_without_format_is_structured() {
        let spec = PortSpec::new("mesh", "3", PortKind::Model);

        let outputs = classify(Some(&spec), &entry("mesh_3", json!("AAAA")));

        assert_eq!(outputs, vec![TypedOutput::Structured(json!("AAAA"))]);
    }

    #[test]
    fn test_typed_object_follows_type() {
        let value = json!({"type": "model", "format": "stl", "data": "c29saWQ="});

        let outputs = classify(None, &entry("x", value));

        assert_eq!(
            outputs,
            vec![TypedOutput::Model {
                format: ModelFormat::Stl,
                source: MediaSource::Base64("c29saWQ=".into()),
            }]
        );
    }

    #[test]
    fn test_arrays_expand() {
        let outputs = classify(
            None,
            &entry("x", json!(["https://cdn/a.png", "https://cdn/b.jpg"])),
        );
        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().all(|o| matches!(o, TypedOutput::Image(_))));

        let empty = classify(None, &entry("x", json!([])));
        assert_eq!(empty, vec![TypedOutput::Structured(json!([]))]);
    }

    #[test]
    fn test_unknown_values_are_structured() {
        let outputs = classify(None, &entry("x", json!({"score": 0.9})));
        assert_eq!(outputs, vec![TypedOutput::Structured(json!({"score": 0.9}))]);
    }

    #[test]
    fn test_result_resolves_declared_ports() {
        let schema = WorkflowSchema::new(
            WorkflowId::new("wf").unwrap(),
            vec![],
            vec![PortSpec::new("out", "2", PortKind::Image).with_label("Render")],
        );
        let response = ExecutionResponse::from_value(&json!({
            "data": [{"id": "out", "data": ["https://cdn/render"]}, {"id": "extra", "data": "note"}]
        }))
        .unwrap();

        let result = ExecutionResult::from_response(&schema, response, Duration::from_millis(350));

        assert_eq!(result.execution_time_ms, 350);
        assert_eq!(result.outputs[0].port, Some(PortRef::new("out", "2")));
        assert_eq!(result.outputs[0].label, "Render");
        assert!(matches!(result.outputs[0].output, TypedOutput::Image(_)));
        assert_eq!(result.outputs[1].port, None);
        assert_eq!(result.outputs[1].output, TypedOutput::Text("note".into()));
    }
}
