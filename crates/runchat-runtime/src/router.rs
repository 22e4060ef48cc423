//! Delivery of typed outputs to host consumers.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use futures::future::try_join_all;
use runchat_core::capability::{
    AssetImporter, AssetPayload, ClipboardWriter, ImageData, ImageSink, ImportedAsset, JsonSink,
    MediaFetcher, ModelAsset,
};
use runchat_core::input::sniff_content_type;
use runchat_core::output::{ExecutionResult, MediaSource, ModelFormat, OutputValue, TypedOutput};
use runchat_core::schema::WorkflowSchema;
use runchat_core::{Error, Result};
use serde_json::Value;
use strum::{AsRefStr, Display, IntoStaticStr};

use crate::TRACING_TARGET_ROUTER;

/// Kind of consumer an output is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(AsRefStr, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Consumer {
    /// Images go to the [`ImageSink`].
    ImageSink,
    /// Models go to the [`AssetImporter`].
    AssetImporter,
    /// Text is returned to the caller as is.
    Text,
    /// Structured values go to the optional [`JsonSink`].
    Json,
}

impl Consumer {
    /// Returns the consumer responsible for an output.
    pub fn for_output(output: &TypedOutput) -> Self {
        match output {
            TypedOutput::Image(_) => Self::ImageSink,
            TypedOutput::Model { .. } => Self::AssetImporter,
            TypedOutput::Text(_) => Self::Text,
            TypedOutput::Structured(_) => Self::Json,
        }
    }
}

/// An output paired with its consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedOutput {
    /// Consumer that receives the output.
    pub consumer: Consumer,
    /// The output.
    pub output: OutputValue,
}

/// What happened to one output during dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// An image handed to the image sink.
    Image {
        /// Output label.
        label: String,
        /// Encoded size in bytes.
        size: usize,
        /// Sniffed MIME type.
        content_type: Option<&'static str>,
    },
    /// A model imported into the host.
    Model {
        /// Output label.
        label: String,
        /// Model format.
        format: ModelFormat,
        /// Handle returned by the importer.
        asset: ImportedAsset,
    },
    /// A text output.
    Text {
        /// Output label.
        label: String,
        /// The text.
        text: String,
    },
    /// A structured output.
    Json {
        /// Output label.
        label: String,
        /// The value.
        value: Value,
        /// Whether a JSON sink received the value.
        delivered: bool,
    },
}

impl Delivery {
    /// Label of the output this delivery belongs to.
    pub fn label(&self) -> &str {
        match self {
            Self::Image { label, .. }
            | Self::Model { label, .. }
            | Self::Text { label, .. }
            | Self::Json { label, .. } => label,
        }
    }
}

/// An output whose payload was decoded or fetched, ready to hand off.
enum Prepared {
    Image(ImageData),
    Model(ModelAsset),
    Text { label: String, text: String },
    Json { label: String, value: Value },
}

/// Routes typed outputs to the consumers injected by the host.
///
/// Every consumer is optional. Routing fails up front when an output needs a
/// consumer that is not configured, so either all outputs are dispatched or
/// none is.
#[derive(Clone, Default)]
pub struct OutputRouter {
    image_sink: Option<Arc<dyn ImageSink>>,
    asset_importer: Option<Arc<dyn AssetImporter>>,
    json_sink: Option<Arc<dyn JsonSink>>,
    clipboard: Option<Arc<dyn ClipboardWriter>>,
    fetcher: Option<Arc<dyn MediaFetcher>>,
}

impl std::fmt::Debug for OutputRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputRouter")
            .field("image_sink", &self.image_sink.is_some())
            .field("asset_importer", &self.asset_importer.is_some())
            .field("json_sink", &self.json_sink.is_some())
            .field("clipboard", &self.clipboard.is_some())
            .field("fetcher", &self.fetcher.is_some())
            .finish()
    }
}

impl OutputRouter {
    /// Creates a router without consumers; only text and structured outputs can be routed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the image sink.
    #[must_use]
    pub fn with_image_sink(mut self, sink: Arc<dyn ImageSink>) -> Self {
        self.image_sink = Some(sink);
        self
    }

    /// Sets the asset importer.
    #[must_use]
    pub fn with_asset_importer(mut self, importer: Arc<dyn AssetImporter>) -> Self {
        self.asset_importer = Some(importer);
        self
    }

    /// Sets the JSON sink.
    #[must_use]
    pub fn with_json_sink(mut self, sink: Arc<dyn JsonSink>) -> Self {
        self.json_sink = Some(sink);
        self
    }

    /// Sets the clipboard writer.
    #[must_use]
    pub fn with_clipboard(mut self, clipboard: Arc<dyn ClipboardWriter>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    /// Sets the fetcher used for image outputs delivered by URL.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn MediaFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Pairs every output with its consumer.
    ///
    /// Outputs follow the schema's declared output order; undeclared outputs
    /// come last, in response order.
    pub fn route(
        &self,
        schema: &WorkflowSchema,
        result: &ExecutionResult,
    ) -> Result<Vec<RoutedOutput>> {
        let mut ranked: Vec<(usize, &OutputValue)> = result
            .outputs
            .iter()
            .map(|output| {
                let rank = output
                    .port
                    .as_ref()
                    .and_then(|port| schema.outputs.iter().position(|spec| spec.matches(port)))
                    .unwrap_or(usize::MAX);
                (rank, output)
            })
            .collect();
        ranked.sort_by_key(|(rank, _)| *rank);

        let mut routed = Vec::with_capacity(ranked.len());
        for (_, output) in ranked {
            let consumer = Consumer::for_output(&output.output);
            self.ensure_available(consumer, output)?;
            routed.push(RoutedOutput {
                consumer,
                output: output.clone(),
            });
        }

        tracing::debug!(
            target: TRACING_TARGET_ROUTER,
            outputs = routed.len(),
            "Outputs routed"
        );

        Ok(routed)
    }

    fn ensure_available(&self, consumer: Consumer, output: &OutputValue) -> Result<()> {
        let missing = match (consumer, &output.output) {
            (Consumer::ImageSink, _) if self.image_sink.is_none() => Some("image sink"),
            (Consumer::ImageSink, TypedOutput::Image(MediaSource::Url(_)))
                if self.fetcher.is_none() =>
            {
                Some("media fetcher")
            }
            (Consumer::AssetImporter, _) if self.asset_importer.is_none() => Some("asset importer"),
            _ => None,
        };

        let Some(missing) = missing else {
            return Ok(());
        };

        let error = Error::capability().with_message(format!(
            "no {missing} configured for output '{}'",
            output.label
        ));
        Err(match &output.port {
            Some(port) => error.with_port(port.clone()),
            None => error,
        })
    }

    /// Hands routed outputs to their consumers.
    ///
    /// Payloads are decoded and fetched first, so a bad payload fails the
    /// dispatch before any consumer sees an output.
    pub async fn dispatch(&self, routed: Vec<RoutedOutput>) -> Result<Vec<Delivery>> {
        let prepared = try_join_all(routed.into_iter().map(|routed| self.prepare(routed))).await?;

        let mut deliveries = Vec::with_capacity(prepared.len());
        for prepared in prepared {
            deliveries.push(self.deliver(prepared).await?);
        }

        tracing::info!(
            target: TRACING_TARGET_ROUTER,
            deliveries = deliveries.len(),
            "Outputs delivered"
        );

        Ok(deliveries)
    }

    async fn prepare(&self, routed: RoutedOutput) -> Result<Prepared> {
        let OutputValue { label, output, .. } = routed.output;

        let prepared = match output {
            TypedOutput::Image(source) => {
                let data = self.image_bytes(&source).await?;
                Prepared::Image(ImageData {
                    name: label,
                    content_type: sniff_content_type(&data),
                    data,
                })
            }
            TypedOutput::Model { format, source } => {
                let payload = match source {
                    MediaSource::Url(url) => AssetPayload::Url(url),
                    MediaSource::Base64(data) => AssetPayload::Bytes(decode_base64(&data)?),
                };
                Prepared::Model(ModelAsset {
                    name: label,
                    format,
                    payload,
                })
            }
            TypedOutput::Text(text) => Prepared::Text { label, text },
            TypedOutput::Structured(value) => Prepared::Json { label, value },
        };

        Ok(prepared)
    }

    async fn image_bytes(&self, source: &MediaSource) -> Result<Bytes> {
        match source {
            MediaSource::Base64(data) => decode_base64(data),
            MediaSource::Url(url) => {
                let fetcher = self.fetcher.as_ref().ok_or_else(|| {
                    Error::capability().with_message("no media fetcher configured")
                })?;
                tracing::debug!(target: TRACING_TARGET_ROUTER, url = %url, "Fetching image output");
                fetcher.fetch(url).await
            }
        }
    }

    async fn deliver(&self, prepared: Prepared) -> Result<Delivery> {
        match prepared {
            Prepared::Image(image) => {
                let sink = self
                    .image_sink
                    .as_ref()
                    .ok_or_else(|| Error::capability().with_message("no image sink configured"))?;
                let delivery = Delivery::Image {
                    label: image.name.clone(),
                    size: image.data.len(),
                    content_type: image.content_type,
                };
                sink.receive(image).await?;
                Ok(delivery)
            }
            Prepared::Model(asset) => {
                let importer = self.asset_importer.as_ref().ok_or_else(|| {
                    Error::capability().with_message("no asset importer configured")
                })?;
                let label = asset.name.clone();
                let format = asset.format;
                let asset = importer.import(asset).await?;
                tracing::debug!(
                    target: TRACING_TARGET_ROUTER,
                    label = %label,
                    asset = %asset,
                    "Model imported"
                );
                Ok(Delivery::Model {
                    label,
                    format,
                    asset,
                })
            }
            Prepared::Text { label, text } => Ok(Delivery::Text { label, text }),
            Prepared::Json { label, value } => {
                let delivered = match &self.json_sink {
                    Some(sink) => {
                        sink.receive(&label, &value).await?;
                        true
                    }
                    None => false,
                };
                Ok(Delivery::Json {
                    label,
                    value,
                    delivered,
                })
            }
        }
    }

    /// Writes `text` to the clipboard.
    pub async fn copy_text(&self, text: &str) -> Result<()> {
        let clipboard = self
            .clipboard
            .as_ref()
            .ok_or_else(|| Error::capability().with_message("no clipboard configured"))?;
        clipboard.write_text(text).await
    }
}

fn decode_base64(data: &str) -> Result<Bytes> {
    let compact: String = data.split_ascii_whitespace().collect();
    Ok(Bytes::from(STANDARD.decode(compact)?))
}

#[cfg(test)]
mod tests {
    use runchat_core::ErrorKind;
    use runchat_core::schema::{PortKind, PortRef, PortSpec, WorkflowId};
    use runchat_test::{
        MockMediaFetcher, RecordingAssetImporter, RecordingClipboard, RecordingImageSink,
        RecordingJsonSink, TINY_PNG,
    };
    use serde_json::json;
    use url::Url;

    use super::*;

    fn schema() -> WorkflowSchema {
        WorkflowSchema::new(
            WorkflowId::new("wf").unwrap(),
            vec![],
            vec![
                PortSpec::new("render", "3", PortKind::Image).with_label("Render"),
                PortSpec::new("caption", "4", PortKind::Text).with_label("Caption"),
            ],
        )
    }

    fn output(id: &str, port: Option<PortRef>, output: TypedOutput) -> OutputValue {
        OutputValue {
            id: id.to_owned(),
            port,
            label: id.to_owned(),
            output,
        }
    }

    fn result(outputs: Vec<OutputValue>) -> ExecutionResult {
        ExecutionResult {
            outputs,
            instance_id: None,
            execution_time_ms: 10,
        }
    }

    fn png_base64() -> String {
        STANDARD.encode(TINY_PNG)
    }

    #[test]
    fn test_route_follows_schema_order() {
        let router = OutputRouter::new().with_image_sink(Arc::new(RecordingImageSink::new()));
        let result = result(vec![
            output("extra", None, TypedOutput::Structured(json!({"a": 1}))),
            output(
                "caption_4",
                Some(PortRef::new("caption", "4")),
                TypedOutput::Text("hello".into()),
            ),
            output(
                "render_3",
                Some(PortRef::new("render", "3")),
                TypedOutput::Image(MediaSource::Base64(png_base64())),
            ),
        ]);

        let routed = router.route(&schema(), &result).unwrap();
        let order: Vec<_> = routed.iter().map(|r| r.output.id.as_str()).collect();
        assert_eq!(order, ["render_3", "caption_4", "extra"]);
        assert_eq!(routed[0].consumer, Consumer::ImageSink);
        assert_eq!(routed[2].consumer, Consumer::Json);
    }

    #[test]
    fn test_route_is_all_or_nothing() {
        let router = OutputRouter::new();
        let result = result(vec![
            output("caption_4", None, TypedOutput::Text("hello".into())),
            output(
                "render_3",
                Some(PortRef::new("render", "3")),
                TypedOutput::Image(MediaSource::Base64(png_base64())),
            ),
        ]);

        let error = router.route(&schema(), &result).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Capability);
        assert_eq!(error.port, Some(PortRef::new("render", "3")));
    }

    #[test]
    fn test_url_image_requires_fetcher() {
        let router = OutputRouter::new().with_image_sink(Arc::new(RecordingImageSink::new()));
        let url = Url::parse("https://cdn.test/out.png").unwrap();
        let result = result(vec![output("img", None, TypedOutput::Image(MediaSource::Url(url)))]);

        let error = router.route(&schema(), &result).unwrap_err();
        assert!(error.message.unwrap().contains("media fetcher"));
    }

    #[tokio::test]
    async fn test_dispatch_delivers_each_kind() {
        let images = RecordingImageSink::new();
        let importer = RecordingAssetImporter::new();
        let json = RecordingJsonSink::new();
        let url = Url::parse("https://cdn.test/out.png").unwrap();
        let fetcher = MockMediaFetcher::new().with_body(url.clone(), TINY_PNG);

        let router = OutputRouter::new()
            .with_image_sink(Arc::new(images.clone()))
            .with_asset_importer(Arc::new(importer.clone()))
            .with_json_sink(Arc::new(json.clone()))
            .with_fetcher(Arc::new(fetcher.clone()));

        let model_url = Url::parse("https://cdn.test/mesh.glb").unwrap();
        let result = result(vec![
            output("inline", None, TypedOutput::Image(MediaSource::Base64(png_base64()))),
            output("remote", None, TypedOutput::Image(MediaSource::Url(url.clone()))),
            output(
                "mesh",
                None,
                TypedOutput::Model {
                    format: ModelFormat::Glb,
                    source: MediaSource::Url(model_url.clone()),
                },
            ),
            output("caption", None, TypedOutput::Text("a cat".into())),
            output("meta", None, TypedOutput::Structured(json!({"seed": 7}))),
        ]);

        let routed = router.route(&schema(), &result).unwrap();
        let deliveries = router.dispatch(routed).await.unwrap();

        assert_eq!(deliveries.len(), 5);
        assert_eq!(images.images().len(), 2);
        assert_eq!(images.images()[0].content_type, Some("image/png"));
        assert_eq!(fetcher.fetched(), vec![url]);

        let assets = importer.assets();
        assert_eq!(assets[0].payload, AssetPayload::Url(model_url));
        assert_eq!(
            deliveries[2],
            Delivery::Model {
                label: "mesh".into(),
                format: ModelFormat::Glb,
                asset: ImportedAsset("mesh.glb".into()),
            }
        );

        assert_eq!(
            deliveries[3],
            Delivery::Text {
                label: "caption".into(),
                text: "a cat".into(),
            }
        );
        assert_eq!(json.values(), vec![("meta".to_owned(), json!({"seed": 7}))]);
    }

    #[tokio::test]
    async fn test_bad_payload_delivers_nothing() {
        let images = RecordingImageSink::new();
        let router = OutputRouter::new().with_image_sink(Arc::new(images.clone()));

        let result = result(vec![
            output("good", None, TypedOutput::Image(MediaSource::Base64(png_base64()))),
            output("bad", None, TypedOutput::Image(MediaSource::Base64("%%%".into()))),
        ]);

        let routed = router.route(&schema(), &result).unwrap();
        let error = router.dispatch(routed).await.unwrap_err();

        assert_eq!(error.kind, ErrorKind::Serialization);
        assert!(images.images().is_empty());
    }

    #[tokio::test]
    async fn test_structured_without_sink_is_kept() {
        let router = OutputRouter::new();
        let result = result(vec![output("meta", None, TypedOutput::Structured(json!([1, 2])))]);

        let routed = router.route(&schema(), &result).unwrap();
        let deliveries = router.dispatch(routed).await.unwrap();

        assert_eq!(
            deliveries,
            vec![Delivery::Json {
                label: "meta".into(),
                value: json!([1, 2]),
                delivered: false,
            }]
        );
    }

    #[tokio::test]
    async fn test_importer_failure_surfaces() {
        let router =
            OutputRouter::new().with_asset_importer(Arc::new(RecordingAssetImporter::failing()));
        let bytes = STANDARD.encode(b"solid cube");
        let result = result(vec![output(
            "mesh",
            None,
            TypedOutput::Model {
                format: ModelFormat::Stl,
                source: MediaSource::Base64(bytes),
            },
        )]);

        let routed = router.route(&schema(), &result).unwrap();
        let error = router.dispatch(routed).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::Capability);
    }

    #[tokio::test]
    async fn test_copy_text() {
        let clipboard = RecordingClipboard::new();
        let router = OutputRouter::new().with_clipboard(Arc::new(clipboard.clone()));

        router.copy_text("a cat").await.unwrap();
        assert_eq!(clipboard.contents().as_deref(), Some("a cat"));

        let error = OutputRouter::new().copy_text("x").await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::Capability);
    }
}
