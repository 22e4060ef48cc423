//! `runchat run`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Args;
use futures::StreamExt;
use runchat_core::input::{ImageValue, InputValues};
use runchat_core::mapper::DeliveryMode;
use runchat_core::schema::WorkflowId;
use runchat_runtime::{Delivery, ExecutionEvent, RunReport, Session};
use serde_json::Value;
use url::Url;

use super::Context;
use crate::TRACING_TARGET_COMMAND;
use crate::sink::OutputSink;

/// Arguments of `runchat run`.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Workflow to execute
    pub workflow_id: WorkflowId,

    /// Text input as `key=value`; the key is `paramId_nodeId` or a unique `paramId`
    #[arg(long = "input", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub inputs: Vec<(String, String)>,

    /// Image input as `key=path`; http(s) URLs are passed through without uploading
    #[arg(long = "image", value_name = "KEY=PATH", value_parser = parse_key_value)]
    pub images: Vec<(String, String)>,

    /// Send this JSON document instead of schema-mapped inputs
    #[arg(long, value_name = "JSON", value_parser = parse_json)]
    pub webhook: Option<Value>,

    /// Continue an existing instance
    #[arg(long = "instance", value_name = "ID")]
    pub instance_id: Option<String>,

    /// Directory that receives image, model and structured outputs
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

impl RunArgs {
    /// Collects the inputs given on the command line.
    fn values(&self) -> anyhow::Result<InputValues> {
        let mut values = InputValues::new();

        for (key, value) in &self.inputs {
            values.insert(key.as_str(), value.as_str());
        }

        for (key, location) in &self.images {
            let image = if location.starts_with("http://") || location.starts_with("https://") {
                let url = Url::parse(location)
                    .with_context(|| format!("invalid image URL for '{key}'"))?;
                ImageValue::from_url(url)
            } else {
                ImageValue::from_path(location)
            };
            values.insert(key.as_str(), image);
        }

        Ok(values)
    }

    fn mode(&self) -> DeliveryMode {
        match &self.webhook {
            Some(document) => DeliveryMode::Webhook(document.clone()),
            None => DeliveryMode::Schema,
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|error| format!("invalid JSON: {error}"))
}

pub async fn execute(args: RunArgs, context: &Context) -> anyhow::Result<()> {
    let client = context.client.clone();
    let sink = Arc::new(OutputSink::new(args.output_dir.clone(), Arc::new(client.clone())));

    let session = Session::builder(client.clone().into_service(), Arc::new(client.clone()))
        .config(context.session.clone())
        .fetcher(Arc::new(client))
        .image_sink(sink.clone())
        .asset_importer(sink.clone())
        .json_sink(sink)
        .build()
        .context("failed to create session")?;

    session
        .load_schema(&args.workflow_id)
        .await
        .with_context(|| format!("failed to load schema of '{}'", args.workflow_id))?;

    if let Some(instance_id) = &args.instance_id {
        session.adopt_instance(instance_id.as_str());
    }

    let mut handle = session.execute(args.values()?, args.mode());
    let cancel = handle.cancellation_token();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    let report = loop {
        tokio::select! {
            event = handle.events().next() => match event {
                Some(ExecutionEvent::Progress(progress)) => {
                    tracing::info!(
                        target: TRACING_TARGET_COMMAND,
                        phase = %progress.phase,
                        percent = (progress.fraction * 100.0).round() as u32,
                        status = %progress.message,
                        "execution progress"
                    );
                }
                Some(ExecutionEvent::Finished(result)) => break result,
                None => anyhow::bail!("execution ended without a result"),
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                tracing::warn!(target: TRACING_TARGET_COMMAND, "interrupted, cancelling execution");
                cancel.cancel();
            }
        }
    };

    let report = report.context("workflow execution failed")?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    for delivery in &report.deliveries {
        match delivery {
            Delivery::Image {
                label,
                size,
                content_type,
            } => println!(
                "{label}: image, {size} bytes ({})",
                content_type.unwrap_or("unknown type")
            ),
            Delivery::Model {
                label,
                format,
                asset,
            } => println!("{label}: {format} model, {asset}"),
            Delivery::Text { label, text } => println!("{label}: {text}"),
            Delivery::Json { label, value, .. } => println!("{label}: {value}"),
        }
    }

    if let Some(instance_id) = &report.instance_id {
        println!("instance: {instance_id}");
    }

    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        outputs = report.deliveries.len(),
        uploads = report.uploads.total(),
        execution_time_ms = report.result.execution_time_ms,
        "workflow finished"
    );
}
