//! Caller-supplied input values.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde_json::Value;
use url::Url;

use crate::TRACING_TARGET_MAPPER;
use crate::schema::PortRef;
use crate::upload::UploadStatus;

/// Where the pixels of an image input come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// A file on the local filesystem.
    File(PathBuf),
    /// In-memory encoded image data, such as a viewport capture.
    Bytes {
        /// Encoded image data.
        data: Bytes,
        /// MIME type, sniffed from the data when absent.
        content_type: Option<String>,
        /// File name reported to the upload endpoint.
        filename: String,
    },
    /// An image that is already reachable by the service.
    Remote(Url),
}

/// An image input together with its upload status.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageValue {
    /// Source of the image.
    pub source: ImageSource,
    /// Current upload status.
    pub status: UploadStatus,
}

impl ImageValue {
    /// Creates an image input from a local file.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ImageSource::File(path.into()),
            status: UploadStatus::Pending,
        }
    }

    /// Creates an image input from encoded bytes.
    pub fn from_bytes(data: impl Into<Bytes>, filename: impl Into<String>) -> Self {
        Self {
            source: ImageSource::Bytes {
                data: data.into(),
                content_type: None,
                filename: filename.into(),
            },
            status: UploadStatus::Pending,
        }
    }

    /// Creates an image input that is already hosted; no upload is needed.
    pub fn from_url(url: Url) -> Self {
        Self {
            source: ImageSource::Remote(url.clone()),
            status: UploadStatus::Uploaded(url),
        }
    }

    /// Sets the content type of an in-memory source.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        if let ImageSource::Bytes {
            content_type: slot, ..
        } = &mut self.source
        {
            *slot = Some(content_type.into());
        }
        self
    }

    /// Returns the uploaded URL once the upload finished.
    pub fn uploaded_url(&self) -> Option<&Url> {
        self.status.url()
    }

    /// Whether the image still has to go through the upload endpoint.
    pub fn needs_upload(&self) -> bool {
        !matches!(self.source, ImageSource::Remote(_))
            && matches!(self.status, UploadStatus::Pending | UploadStatus::Failed(_))
    }

    /// File name used when uploading.
    pub fn filename(&self) -> String {
        match &self.source {
            ImageSource::File(path) => file_name(path),
            ImageSource::Bytes { filename, .. } => filename.clone(),
            ImageSource::Remote(url) => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|name| !name.is_empty())
                .unwrap_or("image.png")
                .to_owned(),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("image.png")
        .to_owned()
}

/// Detects the MIME type of encoded image data from its magic bytes.
pub fn sniff_content_type(data: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"BM", "image/bmp"),
        (b"II*\x00", "image/tiff"),
        (b"MM\x00*", "image/tiff"),
        (b"v/1\x01", "image/x-exr"),
    ];

    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }

    SIGNATURES
        .iter()
        .find(|(magic, _)| data.starts_with(magic))
        .map(|(_, content_type)| *content_type)
}

/// Binary data with an explicit content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawData {
    /// The data.
    pub data: Bytes,
    /// MIME type of the data.
    pub content_type: String,
}

impl RawData {
    /// Creates raw data.
    pub fn new(data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.into(),
        }
    }
}

/// A value supplied for one input port.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    /// Plain text.
    Text(String),
    /// An image that must be uploaded before execution.
    Image(ImageValue),
    /// An arbitrary JSON document.
    Webhook(Value),
    /// Binary data, sent base64 encoded.
    Raw(RawData),
    /// A tree of values keyed by path-like strings such as `"0"` or `"0:1"`.
    Tree(BTreeMap<String, Value>),
}

impl InputValue {
    /// Short name of the variant, for logs.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Image(_) => "image",
            Self::Webhook(_) => "webhook",
            Self::Raw(_) => "raw",
            Self::Tree(_) => "tree",
        }
    }

    /// Returns the image value, if this is an image.
    pub fn as_image(&self) -> Option<&ImageValue> {
        match self {
            Self::Image(image) => Some(image),
            _ => None,
        }
    }
}

impl From<String> for InputValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<ImageValue> for InputValue {
    fn from(value: ImageValue) -> Self {
        Self::Image(value)
    }
}

impl From<Value> for InputValue {
    fn from(value: Value) -> Self {
        Self::Webhook(value)
    }
}

impl From<RawData> for InputValue {
    fn from(value: RawData) -> Self {
        Self::Raw(value)
    }
}

impl From<BTreeMap<String, Value>> for InputValue {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Self::Tree(value)
    }
}

/// Key under which a value was supplied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InputKey {
    /// An exact port.
    Port(PortRef),
    /// A parameter id or a composite `paramId_nodeId` key.
    Name(String),
}

impl From<PortRef> for InputKey {
    fn from(port: PortRef) -> Self {
        Self::Port(port)
    }
}

impl From<&PortRef> for InputKey {
    fn from(port: &PortRef) -> Self {
        Self::Port(port.clone())
    }
}

impl From<&str> for InputKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for InputKey {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// Values supplied for one execution.
///
/// Lookups for a port try the exact port first, then the composite
/// `paramId_nodeId` name, then the bare parameter id. A bare id applies to
/// every port with that parameter id, across all nodes; use a [`PortRef`] or
/// the composite name to target a single port.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputValues {
    values: HashMap<InputKey, InputValue>,
}

impl InputValues {
    /// Creates an empty set of values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value for a key, returning the previous one.
    ///
    /// A bare parameter id key is shared by every node with that id.
    pub fn insert(
        &mut self,
        key: impl Into<InputKey>,
        value: impl Into<InputValue>,
    ) -> Option<InputValue> {
        self.values.insert(key.into(), value.into())
    }

    /// Builder-style variant of [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, key: impl Into<InputKey>, value: impl Into<InputValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Removes the value resolved for a port.
    pub fn remove(&mut self, port: &PortRef) -> Option<InputValue> {
        let key = self.resolve(port)?;
        self.values.remove(&key)
    }

    /// Returns the value resolved for a port.
    pub fn get(&self, port: &PortRef) -> Option<&InputValue> {
        let key = self.resolve(port)?;
        self.values.get(&key)
    }

    /// Returns a mutable reference to the value resolved for a port.
    pub fn get_mut(&mut self, port: &PortRef) -> Option<&mut InputValue> {
        let key = self.resolve(port)?;
        self.values.get_mut(&key)
    }

    /// Returns the image resolved for a port.
    pub fn image_mut(&mut self, port: &PortRef) -> Option<&mut ImageValue> {
        match self.get_mut(port)? {
            InputValue::Image(image) => Some(image),
            _ => None,
        }
    }

    /// Number of supplied values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no value was supplied.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over all supplied values.
    pub fn iter(&self) -> impl Iterator<Item = (&InputKey, &InputValue)> {
        self.values.iter()
    }

    fn resolve(&self, port: &PortRef) -> Option<InputKey> {
        let exact = [InputKey::Port(port.clone()), InputKey::Name(port.key())]
            .into_iter()
            .find(|key| self.values.contains_key(key));
        if exact.is_some() {
            return exact;
        }

        let bare = InputKey::Name(port.param_id.clone());
        if !self.values.contains_key(&bare) {
            return None;
        }

        tracing::debug!(
            target: TRACING_TARGET_MAPPER,
            port = %port,
            param_id = %port.param_id,
            "Bare parameter id matched, the value applies to every node with this id"
        );
        Some(bare)
    }
}

impl<K, V> FromIterator<(K, V)> for InputValues
where
    K: Into<InputKey>,
    V: Into<InputValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut values = Self::new();
        for (key, value) in iter {
            values.insert(key, value);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_lookup_precedence() {
        let port = PortRef::new("prompt", "1");
        let values = InputValues::new()
            .with("prompt", "by param")
            .with("prompt_1", "by key")
            .with(port.clone(), "by port");

        assert_eq!(values.get(&port), Some(&InputValue::from("by port")));

        let values = InputValues::new()
            .with("prompt", "by param")
            .with("prompt_1", "by key");
        assert_eq!(values.get(&port), Some(&InputValue::from("by key")));

        let values = InputValues::new().with("prompt", "by param");
        assert_eq!(values.get(&port), Some(&InputValue::from("by param")));
        assert_eq!(values.get(&PortRef::new("other", "1")), None);
    }

    #[test]
    fn test_bare_param_id_matches_every_node() {
        let first = PortRef::new("image", "2");
        let second = PortRef::new("image", "5");
        let values = InputValues::new().with("image", "shared");

        assert_eq!(values.get(&first), Some(&InputValue::from("shared")));
        assert_eq!(values.get(&second), Some(&InputValue::from("shared")));

        let values = InputValues::new()
            .with("image", "shared")
            .with("image_5", "only five");
        assert_eq!(values.get(&first), Some(&InputValue::from("shared")));
        assert_eq!(values.get(&second), Some(&InputValue::from("only five")));
    }

    #[test]
    fn test_remote_image_is_already_uploaded() {
        let url = Url::parse("https://cdn.example.com/photos/cat.jpg").unwrap();
        let image = ImageValue::from_url(url.clone());

        assert!(!image.needs_upload());
        assert_eq!(image.uploaded_url(), Some(&url));
        assert_eq!(image.filename(), "cat.jpg");
    }

    #[test]
    fn test_local_image_needs_upload() {
        let image = ImageValue::from_path("/tmp/render.png");
        assert!(image.needs_upload());
        assert_eq!(image.filename(), "render.png");

        let mut failed = ImageValue::from_bytes(vec![1, 2, 3], "capture.png");
        failed.status = UploadStatus::Failed("timeout".into());
        assert!(failed.needs_upload());
    }

    #[test]
    fn test_sniff_content_type() {
        assert_eq!(
            sniff_content_type(b"\x89PNG\r\n\x1a\n\0\0"),
            Some("image/png")
        );
        assert_eq!(sniff_content_type(b"\xff\xd8\xff\xe0"), Some("image/jpeg"));
        assert_eq!(
            sniff_content_type(b"RIFF\0\0\0\0WEBPVP8 "),
            Some("image/webp")
        );
        assert_eq!(sniff_content_type(b"hello"), None);
    }

    #[test]
    fn test_image_mut_only_returns_images() {
        let port = PortRef::new("image", "3");
        let mut values = InputValues::new()
            .with("image", ImageValue::from_path("a.png"))
            .with("prompt", json!({"a": 1}));

        assert!(values.image_mut(&port).is_some());
        assert!(values.image_mut(&PortRef::new("prompt", "1")).is_none());
    }
}
