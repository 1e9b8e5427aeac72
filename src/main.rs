mod admin;
mod cache;
mod cleanup;
mod cli;
mod config;
mod daemon;
mod db;
mod engine;
mod error;
mod fetch;
mod format;
mod models;
mod notify;
mod resolver;
mod rule_cache;
mod rules;
mod scheduler;
mod server;
mod status_cache;
mod store;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::config::{load_config, validate_config};
use crate::engine::CycleReport;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.global.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(config_path = %cli.config.display(), "config loaded");

    validate_config(&config).context("config validation failed")?;
    info!(
        accounts = config.account.len(),
        plates = config.plate.len(),
        "config validated successfully"
    );

    match cli.command {
        Some(Commands::Validate) => {
            println!("Configuration is valid.");
        }
        Some(Commands::Run { plates, force_refresh }) => {
            let store = daemon::open_store(&config).await?;
            let engine = daemon::build_engine(Arc::new(config), store.clone());

            let filter = (!plates.is_empty()).then_some(plates.as_slice());
            let result = engine
                .run_cycle(filter, force_refresh, &CancellationToken::new())
                .await;
            store.close().await;

            print_report(&result.context("running cycle")?);
        }
        None => {
            daemon::run(config).await?;
        }
    }

    Ok(())
}

fn print_report(report: &CycleReport) {
    for account in &report.accounts {
        match &account.error {
            None => println!("account {}: {} record(s)", account.account, account.records),
            Some(e) => println!("account {}: FAILED ({e})", account.account),
        }
    }
    if let Some(note) = &report.traffic {
        println!("{note}");
    }
    for plate in &report.plates {
        println!("[{}] {}", plate.level.as_str(), plate.message);
    }
    for plate in &report.unmatched {
        println!("{plate}: no permit data returned");
    }
    for plate in &report.orphans {
        println!("{plate}: not configured, skipped");
    }
    println!("Pushes delivered: {}, failed: {}", report.delivered(), report.failed());
    if !report.admin_outcomes.is_empty() {
        let ok = report.admin_outcomes.iter().filter(|o| o.success).count();
        println!("Admin alerts delivered: {ok}/{}", report.admin_outcomes.len());
    }
}
