//! `runchat schema`

use std::io::{self, Write};

use anyhow::Context as _;
use clap::Args;
use runchat_core::schema::{PortSpec, WorkflowId, WorkflowSchema};

use super::Context;

/// Arguments of `runchat schema`.
#[derive(Debug, Clone, Args)]
pub struct SchemaArgs {
    /// Workflow to describe
    pub workflow_id: WorkflowId,
}

pub async fn execute(args: SchemaArgs, context: &Context) -> anyhow::Result<()> {
    let service = context.client.clone().into_service();
    let schema = service
        .fetch_schema(&args.workflow_id)
        .await
        .with_context(|| format!("failed to load schema of '{}'", args.workflow_id))?;

    let mut stdout = io::stdout().lock();
    write_schema(&mut stdout, &schema)?;
    Ok(())
}

/// Writes a table of the schema's ports.
fn write_schema(out: &mut impl Write, schema: &WorkflowSchema) -> io::Result<()> {
    let title = schema.name.as_deref().unwrap_or(schema.workflow_id.as_str());
    writeln!(out, "{title}")?;

    writeln!(out, "\ninputs:")?;
    write_ports(out, &schema.inputs)?;
    writeln!(out, "\noutputs:")?;
    write_ports(out, &schema.outputs)
}

fn write_ports(out: &mut impl Write, ports: &[PortSpec]) -> io::Result<()> {
    if ports.is_empty() {
        return writeln!(out, "  (none)");
    }

    for port in ports {
        let required = if port.required { "required" } else { "optional" };
        write!(
            out,
            "  {:<24} {:<8} {:<8} {}",
            port.key(),
            port.kind.as_str(),
            required,
            port.label
        )?;
        if let Some(description) = &port.description {
            write!(out, "  ({description})")?;
        }
        writeln!(out)?;
    }

    Ok(())
}
