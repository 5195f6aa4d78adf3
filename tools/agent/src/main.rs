//! cmsync agent - runs the sync watchdogs against plugin services.
//!
//! Handles listed in the config file are registered in ADVISED state and
//! driven through module sync and data sync by a single instance backed by
//! in-memory stores.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use cmsync_common::CmHandleState;
use cmsync_dispatch::{HttpPluginTransport, MemoryEventPublisher};
use cmsync_storage::{InventoryStore, MemoryInventoryStore};
use cmsync_sync::{retry, SyncEngine, SyncStores, TracingLcmPublisher};

use crate::config::AgentConfig;

#[derive(Parser)]
#[command(name = "cmsync")]
#[command(about = "cmsync - managed handle synchronization agent")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the watchdogs until interrupted.
    Run {
        /// Path to the JSON config file.
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run one module sync round and one data sync round, then print handle states.
    Once {
        /// Path to the JSON config file.
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Decode the retry record in lock-reason details.
    DecodeLockReason {
        /// Lock-reason details text.
        details: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { config } => cmd_run(&config).await,
        Commands::Once { config } => cmd_once(&config).await,
        Commands::DecodeLockReason { details } => cmd_decode(&details),
    }
}

async fn build_engine(config_path: &Path) -> Result<(SyncEngine, MemoryInventoryStore)> {
    let config = AgentConfig::load(config_path)?;
    let inventory = MemoryInventoryStore::with_handles(config.handles()?);
    let transport = HttpPluginTransport::new(config.dispatch.clone())
        .context("Failed to create plugin transport")?;

    let engine = SyncEngine::new(
        SyncStores::in_memory(inventory.clone()),
        Arc::new(transport),
        Arc::new(TracingLcmPublisher),
        Arc::new(MemoryEventPublisher::new()),
        config.sync,
        config.dispatch,
    );
    info!("Registered {} handles", inventory.len().await);
    Ok((engine, inventory))
}

async fn cmd_run(config_path: &Path) -> Result<()> {
    let (engine, _inventory) = build_engine(config_path).await?;
    let scheduler = engine.start();
    info!("cmsync agent running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    scheduler.shutdown().await;
    Ok(())
}

async fn cmd_once(config_path: &Path) -> Result<()> {
    let (engine, inventory) = build_engine(config_path).await?;

    let processed = engine
        .module_sync_watchdog()
        .module_sync_advised_handles()
        .await
        .context("Module sync round failed")?;
    let synced = engine
        .data_sync_watchdog()
        .execute_data_sync()
        .await
        .context("Data sync round failed")?;
    println!("Module sync processed {} handles, data sync synchronized {}", processed, synced);

    let mut handles = Vec::new();
    for state in [CmHandleState::Advised, CmHandleState::Ready, CmHandleState::Locked] {
        for id in inventory.query_ids_by_state(state).await? {
            handles.push(inventory.get(&id).await?);
        }
    }

    for handle in handles {
        let reason = handle
            .composite_state
            .lock_reason
            .as_ref()
            .map(|reason| format!(" {}: {}", reason.category, reason.details))
            .unwrap_or_default();
        println!("{:<20} {}{}", handle.id.as_str(), handle.state(), reason);
    }
    Ok(())
}

fn cmd_decode(details: &str) -> Result<()> {
    let record = retry::decode(details);
    println!(
        "attempt: {}",
        record
            .attempt
            .map(|attempt| attempt.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("target tag: {}", record.target_tag.as_deref().unwrap_or("-"));
    println!("message: {}", record.message.as_deref().unwrap_or("-"));
    if let Some(attempt) = record.attempt {
        println!("next retry after: {} minutes", retry::backoff(attempt).num_minutes());
    }
    Ok(())
}
