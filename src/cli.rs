use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "jjz-alert", about = "Beijing entry permit watcher with push notifications")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration file
    Validate,

    /// Run a single query-and-notify cycle, then exit
    Run {
        /// Only notify for this plate (repeatable)
        #[arg(long = "plate", short)]
        plates: Vec<String>,

        /// Ignore cached permit status
        #[arg(long)]
        force_refresh: bool,
    },
}
