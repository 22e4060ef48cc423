//! CLI configuration.
//!
//! ```text
//! Cli
//! ├── client: RunchatConfig   # API key, base URL, per-call timeouts
//! ├── session: SessionConfig  # upload pool size, status polling
//! └── command: Command        # schema | run | upload | examples | health
//! ```
//!
//! Every option can also be set through its `RUNCHAT_*` environment variable.

use anyhow::Context as _;
use clap::Parser;
use runchat_reqwest::{RunchatClient, RunchatConfig};
use runchat_runtime::SessionConfig;

use crate::TRACING_TARGET_CONFIG;
use crate::commands::{Command, Context};

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "runchat")]
#[command(about = "Run Runchat workflows from the command line")]
#[command(version)]
pub struct Cli {
    /// Runchat API connection settings.
    #[clap(flatten)]
    pub client: RunchatConfig,

    /// Execution session settings.
    #[clap(flatten)]
    pub session: SessionConfig,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Builds the shared client and session configuration.
    pub fn context(&self) -> anyhow::Result<Context> {
        let client =
            RunchatClient::new(self.client.clone()).context("invalid Runchat client configuration")?;

        let session = self.session.clone().with_timeouts(
            self.client.schema_timeout(),
            self.client.execute_timeout(),
            self.client.upload_timeout(),
        );
        session
            .validate()
            .context("invalid session configuration")?;

        Ok(Context { client, session })
    }
}

/// Logs the effective configuration without secrets.
pub fn log_config(cli: &Cli) {
    tracing::debug!(
        target: TRACING_TARGET_CONFIG,
        base_url = %cli.client.base_url,
        has_api_key = cli.client.has_api_key(),
        schema_timeout_secs = cli.client.schema_timeout().as_secs(),
        execute_timeout_secs = cli.client.execute_timeout().as_secs(),
        upload_timeout_secs = cli.client.upload_timeout().as_secs(),
        max_concurrent_uploads = cli.session.max_concurrent_uploads,
        poll_interval_ms = cli.session.poll_interval_ms,
        "configuration"
    );
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "runchat",
            "--api-key",
            "key",
            "--max-uploads",
            "2",
            "run",
            "wf-1",
            "--input",
            "prompt=a red chair",
            "--image",
            "reference=./chair.png",
        ])
        .unwrap();

        assert_eq!(cli.session.max_concurrent_uploads, 2);
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.workflow_id.as_str(), "wf-1");
        assert_eq!(args.inputs, vec![("prompt".to_owned(), "a red chair".to_owned())]);
        assert_eq!(args.images, vec![("reference".to_owned(), "./chair.png".to_owned())]);
    }

    #[test]
    fn test_context_applies_client_timeouts() {
        let cli = Cli::try_parse_from([
            "runchat",
            "--api-key",
            "key",
            "--execute-timeout",
            "42",
            "health",
        ])
        .unwrap();

        let context = cli.context().unwrap();
        assert_eq!(context.session.execute_timeout.as_secs(), 42);
    }

    #[test]
    fn test_rejects_invalid_workflow_id() {
        assert!(Cli::try_parse_from(["runchat", "schema", "not a workflow"]).is_err());
    }
}
