//! Capabilities provided by the host environment.
//!
//! The pipeline never touches a UI, a scene or a clipboard directly. Each of
//! those concerns is reached through one of the traits below, injected when
//! the session is built.

use std::fmt;

use bytes::Bytes;
use serde_json::Value;
use url::Url;

use crate::Result;
use crate::output::ModelFormat;

/// Uploads an image and returns a URL the workflow service can read.
#[async_trait::async_trait]
pub trait BlobUploader: Send + Sync {
    /// Uploads `data` and returns its public URL.
    async fn upload(&self, data: Bytes, content_type: &str, filename: &str) -> Result<Url>;
}

/// Downloads media referenced by URL outputs.
#[async_trait::async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetches the bytes behind `url`.
    async fn fetch(&self, url: &Url) -> Result<Bytes>;
}

/// An encoded image handed to an [`ImageSink`].
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    /// Label of the output port the image came from.
    pub name: String,
    /// Encoded image bytes.
    pub data: Bytes,
    /// Sniffed MIME type, if recognizable.
    pub content_type: Option<&'static str>,
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Receives image outputs, for example to show them in an image editor.
#[async_trait::async_trait]
pub trait ImageSink: Send + Sync {
    /// Takes one decoded image output.
    async fn receive(&self, image: ImageData) -> Result<()>;
}

/// Model data handed to an [`AssetImporter`].
#[derive(Clone, PartialEq, Eq)]
pub enum AssetPayload {
    /// The importer downloads the model itself.
    Url(Url),
    /// Inline model data.
    Bytes(Bytes),
}

impl fmt::Debug for AssetPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.debug_tuple("Url").field(&url.as_str()).finish(),
            Self::Bytes(data) => f.debug_tuple("Bytes").field(&data.len()).finish(),
        }
    }
}

/// A model output to import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAsset {
    /// Label of the output port the model came from.
    pub name: String,
    /// Model format.
    pub format: ModelFormat,
    /// Where the model data is.
    pub payload: AssetPayload,
}

/// Handle of an object created by an [`AssetImporter`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImportedAsset(pub String);

impl fmt::Display for ImportedAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Imports model outputs into the host scene.
#[async_trait::async_trait]
pub trait AssetImporter: Send + Sync {
    /// Imports one model and returns a handle to what was created.
    async fn import(&self, asset: ModelAsset) -> Result<ImportedAsset>;
}

/// Receives structured outputs that no other consumer understands.
#[async_trait::async_trait]
pub trait JsonSink: Send + Sync {
    /// Takes one structured output.
    async fn receive(&self, name: &str, value: &Value) -> Result<()>;
}

/// Writes text to the system clipboard.
#[async_trait::async_trait]
pub trait ClipboardWriter: Send + Sync {
    /// Replaces the clipboard contents with `text`.
    async fn write_text(&self, text: &str) -> Result<()>;
}

/// Captures the host viewport as an encoded image.
#[async_trait::async_trait]
pub trait ViewportCapture: Send + Sync {
    /// Renders the current viewport and returns the encoded image.
    async fn capture(&self) -> Result<Bytes>;
}
