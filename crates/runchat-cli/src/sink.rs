//! Output consumers that write to a local directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use runchat_core::capability::{
    AssetImporter, AssetPayload, ImageData, ImageSink, ImportedAsset, JsonSink, MediaFetcher,
    ModelAsset,
};
use runchat_core::{Error, Result};
use serde_json::Value;

use crate::TRACING_TARGET_COMMAND;

/// Writes image, model and structured outputs into a directory.
///
/// Without a directory, images and structured values are only reported and
/// models keep their URL.
pub struct OutputSink {
    dir: Option<PathBuf>,
    fetcher: Arc<dyn MediaFetcher>,
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl OutputSink {
    /// Creates a sink writing into `dir`, if given.
    pub fn new(dir: Option<PathBuf>, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self { dir, fetcher }
    }

    async fn write(&self, dir: &Path, name: &str, extension: &str, data: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await.map_err(|error| {
            Error::capability()
                .with_source(error)
                .with_message(format!("cannot create {}", dir.display()))
        })?;

        let path = dir.join(format!("{}.{extension}", file_stem(name)));
        tokio::fs::write(&path, data).await.map_err(|error| {
            Error::capability()
                .with_source(error)
                .with_message(format!("cannot write {}", path.display()))
        })?;

        tracing::info!(
            target: TRACING_TARGET_COMMAND,
            path = %path.display(),
            size = data.len(),
            "output saved"
        );
        Ok(path)
    }
}

/// Turns an output label into a safe file stem.
fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if stem.is_empty() { "output".to_owned() } else { stem }
}

fn image_extension(content_type: Option<&str>) -> &str {
    match content_type {
        Some("image/jpeg") => "jpg",
        Some("image/x-exr") => "exr",
        Some(content_type) => content_type.strip_prefix("image/").unwrap_or("png"),
        None => "png",
    }
}

#[async_trait::async_trait]
impl ImageSink for OutputSink {
    async fn receive(&self, image: ImageData) -> Result<()> {
        if let Some(dir) = &self.dir {
            let extension = image_extension(image.content_type);
            self.write(dir, &image.name, extension, &image.data).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AssetImporter for OutputSink {
    async fn import(&self, asset: ModelAsset) -> Result<ImportedAsset> {
        let Some(dir) = &self.dir else {
            return Ok(match asset.payload {
                AssetPayload::Url(url) => ImportedAsset(url.to_string()),
                AssetPayload::Bytes(data) => ImportedAsset(format!("{} bytes", data.len())),
            });
        };

        let data: Bytes = match &asset.payload {
            AssetPayload::Url(url) => self.fetcher.fetch(url).await?,
            AssetPayload::Bytes(data) => data.clone(),
        };

        let path = self
            .write(dir, &asset.name, asset.format.extension(), &data)
            .await?;
        Ok(ImportedAsset(path.display().to_string()))
    }
}

#[async_trait::async_trait]
impl JsonSink for OutputSink {
    async fn receive(&self, name: &str, value: &Value) -> Result<()> {
        if let Some(dir) = &self.dir {
            let data = serde_json::to_vec_pretty(value)?;
            self.write(dir, name, "json", &data).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use runchat_core::output::ModelFormat;
    use runchat_test::{MockMediaFetcher, TINY_PNG};
    use serde_json::json;
    use url::Url;

    use super::*;

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("Final render"), "Final_render");
        assert_eq!(file_stem("out_3"), "out_3");
        assert_eq!(file_stem(""), "output");
    }

    #[tokio::test]
    async fn test_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::parse("https://cdn.test/mesh.glb").unwrap();
        let fetcher = MockMediaFetcher::new().with_body(url.clone(), b"glTF".to_vec());
        let sink = OutputSink::new(Some(dir.path().join("out")), Arc::new(fetcher));

        ImageSink::receive(
            &sink,
            ImageData {
                name: "render".into(),
                data: Bytes::from_static(TINY_PNG),
                content_type: Some("image/png"),
            },
        )
        .await
        .unwrap();

        let imported = sink
            .import(ModelAsset {
                name: "mesh".into(),
                format: ModelFormat::Glb,
                payload: AssetPayload::Url(url),
            })
            .await
            .unwrap();

        JsonSink::receive(&sink, "meta", &json!({"seed": 7}))
            .await
            .unwrap();

        let out = dir.path().join("out");
        assert_eq!(std::fs::read(out.join("render.png")).unwrap(), TINY_PNG);
        assert_eq!(std::fs::read(out.join("mesh.glb")).unwrap(), b"glTF");
        assert!(imported.0.ends_with("mesh.glb"));
        let meta: Value =
            serde_json::from_slice(&std::fs::read(out.join("meta.json")).unwrap()).unwrap();
        assert_eq!(meta, json!({"seed": 7}));
    }

    #[tokio::test]
    async fn test_without_directory_keeps_url() {
        let sink = OutputSink::new(None, Arc::new(MockMediaFetcher::new()));
        let url = Url::parse("https://cdn.test/mesh.obj").unwrap();

        let imported = sink
            .import(ModelAsset {
                name: "mesh".into(),
                format: ModelFormat::Obj,
                payload: AssetPayload::Url(url),
            })
            .await
            .unwrap();

        assert_eq!(imported.0, "https://cdn.test/mesh.obj");
    }
}
