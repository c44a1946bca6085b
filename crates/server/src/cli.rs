//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Registry mirror: harvest scheduler, workers and monitoring API.
#[derive(Parser, Debug)]
#[command(name = "renec-server", version, about)]
pub struct Cli {
    /// Use the in-memory queue and store even when PostgreSQL is configured.
    #[arg(long, global = true, env = "RENEC_MEMORY_BACKEND")]
    pub memory: bool,

    /// Trigger rules file (TOML). Overrides SCHEDULE_RULES_PATH.
    #[arg(long, global = true)]
    pub rules: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scheduler, the worker lanes and the HTTP API (default).
    Serve {
        /// Do not start the scheduler loop; only serve on-demand jobs.
        #[arg(long)]
        no_scheduler: bool,
    },
    /// Print the trigger table with each trigger's next fire time.
    Triggers,
    /// Enqueue an on-demand job and exit.
    Enqueue {
        /// probe, freshness_check, full or health_check
        mode: String,
        /// Limit to these kinds (comma separated).
        #[arg(long, value_delimiter = ',')]
        kinds: Vec<String>,
        /// Limit to these natural keys (comma separated).
        #[arg(long, value_delimiter = ',')]
        keys: Vec<String>,
        #[arg(long, env = "USER")]
        requested_by: Option<String>,
    },
}
