use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "drover", about = "Android fleet control plane", version)]
pub struct Cli {
    /// Path to the YAML config file (env overrides still apply).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the API server with background jobs.
    Serve {
        /// Override the configured listen address.
        #[arg(long)]
        listen: Option<String>,

        /// Local development mode: in-memory store, static push credentials.
        /// Requires fcm.endpoint to point at a provider stub.
        #[arg(long)]
        dev: bool,
    },

    /// Run the nightly partition lifecycle once and exit.
    Nightly {
        #[arg(long)]
        dry_run: bool,

        /// Override configured retention (7–365 days).
        #[arg(long)]
        retention_days: Option<i64>,
    },

    /// Repair last-status projection drift once and exit.
    Reconcile {
        #[arg(long)]
        dry_run: bool,

        #[arg(long, default_value_t = 5000)]
        max_rows: u32,
    },
}
