//! Mock host capabilities.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use runchat_core::capability::{
    AssetImporter, BlobUploader, ClipboardWriter, ImageData, ImageSink, ImportedAsset, JsonSink,
    MediaFetcher, ModelAsset, ViewportCapture,
};
use runchat_core::{Error, Result};
use serde_json::Value;
use url::Url;

use super::lock;

/// Smallest valid PNG header, enough for content sniffing.
pub const TINY_PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0dIHDR";

/// One upload seen by [`MockBlobUploader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    /// File name sent with the upload.
    pub filename: String,
    /// Content type sent with the upload.
    pub content_type: String,
    /// Number of bytes uploaded.
    pub size: usize,
}

#[derive(Debug, Default)]
struct UploaderState {
    uploads: Vec<RecordedUpload>,
    failing: HashSet<String>,
    delay: Option<Duration>,
}

/// In-memory [`BlobUploader`] returning `https://uploads.test/{filename}`.
///
/// Tracks the highest number of uploads that were in flight at once.
#[derive(Debug, Clone, Default)]
pub struct MockBlobUploader {
    state: Arc<Mutex<UploaderState>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockBlobUploader {
    /// Creates an uploader that accepts everything immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes uploads of `filename` fail.
    #[must_use]
    pub fn failing_on(self, filename: impl Into<String>) -> Self {
        lock(&self.state).failing.insert(filename.into());
        self
    }

    /// Delays every upload.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        lock(&self.state).delay = Some(delay);
        self
    }

    /// Uploads seen so far, in completion order.
    pub fn uploads(&self) -> Vec<RecordedUpload> {
        lock(&self.state).uploads.clone()
    }

    /// Highest number of concurrent uploads observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BlobUploader for MockBlobUploader {
    async fn upload(&self, data: Bytes, content_type: &str, filename: &str) -> Result<Url> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let (delay, fails) = {
            let state = lock(&self.state);
            (state.delay, state.failing.contains(filename))
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        lock(&self.state).uploads.push(RecordedUpload {
            filename: filename.to_owned(),
            content_type: content_type.to_owned(),
            size: data.len(),
        });

        if fails {
            return Err(Error::http(413).with_message("file too large"));
        }

        Ok(Url::parse("https://uploads.test/")?.join(filename)?)
    }
}

/// In-memory [`MediaFetcher`] serving registered bodies, [`TINY_PNG`] otherwise.
#[derive(Debug, Clone, Default)]
pub struct MockMediaFetcher {
    bodies: Arc<Mutex<HashMap<Url, Bytes>>>,
    fetched: Arc<Mutex<Vec<Url>>>,
}

impl MockMediaFetcher {
    /// Creates a fetcher serving [`TINY_PNG`] for every URL.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `body` for `url`.
    #[must_use]
    pub fn with_body(self, url: Url, body: impl Into<Bytes>) -> Self {
        lock(&self.bodies).insert(url, body.into());
        self
    }

    /// URLs fetched so far.
    pub fn fetched(&self) -> Vec<Url> {
        lock(&self.fetched).clone()
    }
}

#[async_trait::async_trait]
impl MediaFetcher for MockMediaFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        lock(&self.fetched).push(url.clone());
        let body = lock(&self.bodies).get(url).cloned();
        Ok(body.unwrap_or_else(|| Bytes::from_static(TINY_PNG)))
    }
}

/// [`ImageSink`] that keeps every image it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingImageSink {
    images: Arc<Mutex<Vec<ImageData>>>,
}

impl RecordingImageSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Images received so far.
    pub fn images(&self) -> Vec<ImageData> {
        lock(&self.images).clone()
    }
}

#[async_trait::async_trait]
impl ImageSink for RecordingImageSink {
    async fn receive(&self, image: ImageData) -> Result<()> {
        lock(&self.images).push(image);
        Ok(())
    }
}

/// [`AssetImporter`] that keeps every asset and names it `{name}.{format}`.
#[derive(Debug, Clone, Default)]
pub struct RecordingAssetImporter {
    assets: Arc<Mutex<Vec<ModelAsset>>>,
    fail: bool,
}

impl RecordingAssetImporter {
    /// Creates an importer that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an importer that rejects everything.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Assets received so far.
    pub fn assets(&self) -> Vec<ModelAsset> {
        lock(&self.assets).clone()
    }
}

#[async_trait::async_trait]
impl AssetImporter for RecordingAssetImporter {
    async fn import(&self, asset: ModelAsset) -> Result<ImportedAsset> {
        if self.fail {
            return Err(Error::capability().with_message("importer unavailable"));
        }

        let handle = ImportedAsset(format!("{}.{}", asset.name, asset.format.extension()));
        lock(&self.assets).push(asset);
        Ok(handle)
    }
}

/// [`JsonSink`] that keeps every value it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingJsonSink {
    values: Arc<Mutex<Vec<(String, Value)>>>,
}

impl RecordingJsonSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Values received so far, with the name they were delivered under.
    pub fn values(&self) -> Vec<(String, Value)> {
        lock(&self.values).clone()
    }
}

#[async_trait::async_trait]
impl JsonSink for RecordingJsonSink {
    async fn receive(&self, name: &str, value: &Value) -> Result<()> {
        lock(&self.values).push((name.to_owned(), value.clone()));
        Ok(())
    }
}

/// [`ClipboardWriter`] that keeps every text written to it.
#[derive(Debug, Clone, Default)]
pub struct RecordingClipboard {
    texts: Arc<Mutex<Vec<String>>>,
}

impl RecordingClipboard {
    /// Creates an empty clipboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last text written, if any.
    pub fn contents(&self) -> Option<String> {
        lock(&self.texts).last().cloned()
    }

    /// Every text written so far.
    pub fn history(&self) -> Vec<String> {
        lock(&self.texts).clone()
    }
}

#[async_trait::async_trait]
impl ClipboardWriter for RecordingClipboard {
    async fn write_text(&self, text: &str) -> Result<()> {
        lock(&self.texts).push(text.to_owned());
        Ok(())
    }
}

/// [`ViewportCapture`] returning a fixed frame.
#[derive(Debug, Clone)]
pub struct MockViewportCapture {
    frame: Bytes,
}

impl MockViewportCapture {
    /// Creates a capture returning `frame`.
    pub fn new(frame: impl Into<Bytes>) -> Self {
        Self {
            frame: frame.into(),
        }
    }
}

impl Default for MockViewportCapture {
    fn default() -> Self {
        Self::new(Bytes::from_static(TINY_PNG))
    }
}

#[async_trait::async_trait]
impl ViewportCapture for MockViewportCapture {
    async fn capture(&self) -> Result<Bytes> {
        Ok(self.frame.clone())
    }
}
