//! `runchat examples`

use anyhow::Context as _;
use clap::Args;

use super::Context;

/// Arguments of `runchat examples`.
#[derive(Debug, Clone, Args)]
pub struct ExamplesArgs {
    /// Host plugin the examples are curated for
    #[arg(long, default_value = "blender")]
    pub plugin: String,
}

pub async fn execute(args: ExamplesArgs, context: &Context) -> anyhow::Result<()> {
    let service = context.client.clone().into_service();
    let examples = service
        .list_examples(&args.plugin)
        .await
        .context("failed to list examples")?;

    if examples.is_empty() {
        println!("no examples for '{}'", args.plugin);
        return Ok(());
    }

    for example in examples {
        match example.description.as_deref().filter(|d| !d.is_empty()) {
            Some(description) => println!("{:<28} {}  {}", example.id, example.name, description),
            None => println!("{:<28} {}", example.id, example.name),
        }
    }

    Ok(())
}
