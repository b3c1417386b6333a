mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { listen, dev } => commands::serve(cli.config, listen, dev).await,
        Command::Nightly { dry_run, retention_days } => {
            commands::nightly(cli.config, dry_run, retention_days).await
        }
        Command::Reconcile { dry_run, max_rows } => {
            commands::reconcile(cli.config, dry_run, max_rows).await
        }
    }
}
