//! `runchat upload`

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use runchat_core::capability::BlobUploader;
use runchat_core::input::sniff_content_type;

use super::Context;
use crate::TRACING_TARGET_COMMAND;

/// Arguments of `runchat upload`.
#[derive(Debug, Clone, Args)]
pub struct UploadArgs {
    /// Image file to upload
    pub path: PathBuf,
}

pub async fn execute(args: UploadArgs, context: &Context) -> anyhow::Result<()> {
    let data = tokio::fs::read(&args.path)
        .await
        .with_context(|| format!("failed to read {}", args.path.display()))?;

    let content_type = sniff_content_type(&data)
        .with_context(|| format!("{} is not a recognized image", args.path.display()))?;
    let filename = args
        .path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("image.png")
        .to_owned();

    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        filename = %filename,
        content_type,
        size = data.len(),
        "uploading image"
    );

    let upload = context.client.upload(data.into(), content_type, &filename);
    let url = tokio::time::timeout(context.session.upload_timeout, upload)
        .await
        .context("upload timed out")?
        .context("upload failed")?;

    println!("{url}");
    Ok(())
}
