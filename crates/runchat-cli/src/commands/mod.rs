//! CLI subcommands.

mod examples;
mod health;
mod run;
mod schema;
mod upload;

use clap::Subcommand;
use runchat_reqwest::RunchatClient;
use runchat_runtime::SessionConfig;

pub use self::examples::ExamplesArgs;
pub use self::run::RunArgs;
pub use self::schema::SchemaArgs;
pub use self::upload::UploadArgs;

/// Shared state handed to every command.
#[derive(Debug, Clone)]
pub struct Context {
    /// HTTP client for the Runchat API.
    pub client: RunchatClient,
    /// Session settings with the client timeouts applied.
    pub session: SessionConfig,
}

/// Available commands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the inputs and outputs of a workflow
    Schema(SchemaArgs),
    /// Execute a workflow
    Run(RunArgs),
    /// Upload an image and print its URL
    Upload(UploadArgs),
    /// List curated example workflows
    Examples(ExamplesArgs),
    /// Check whether the client is configured to reach the API
    Health,
}

impl Command {
    /// Runs the command.
    pub async fn execute(self, context: &Context) -> anyhow::Result<()> {
        match self {
            Self::Schema(args) => schema::execute(args, context).await,
            Self::Run(args) => run::execute(args, context).await,
            Self::Upload(args) => upload::execute(args, context).await,
            Self::Examples(args) => examples::execute(args, context).await,
            Self::Health => health::execute(context).await,
        }
    }
}
