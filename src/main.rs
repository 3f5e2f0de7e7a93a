//! # Cronvault daemon
//!
//! Loads (or creates) a command catalog, appends the commands listed in the
//! daemon config, then runs the dispatch engine until Ctrl-C.
//!
//! Usage:
//!   cronvault                              # Load ~/.cronvault/config.json and run
//!   cronvault --fresh --format yaml        # Start over with an empty YAML catalog
//!   cronvault --once                       # Single dispatch cycle, then exit

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use cronvault_core::{CronvaultError, DaemonConfig};
use cronvault_scheduler::{CommandSpec, Encoding, EngineOptions, SchedulerStore};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cronvault", version, about = "⏰ Cronvault: persistent job scheduler")]
struct Cli {
    /// Daemon config file (default: ~/.cronvault/daemon.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Catalog file, overrides the config
    #[arg(long)]
    catalog: Option<String>,

    /// Catalog format: json, yaml or toml
    #[arg(short, long)]
    format: Option<String>,

    /// Create a new catalog instead of loading the existing one
    #[arg(long)]
    fresh: bool,

    /// Run a single dispatch cycle and exit
    #[arg(long)]
    once: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "cronvault=debug,cronvault_scheduler=debug"
    } else {
        "cronvault=info,cronvault_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => DaemonConfig::load_from(&expand_path(path))?,
        None => DaemonConfig::load()?,
    };
    let encoding = Encoding::from_value(cli.format.as_deref().unwrap_or(&config.encoding))?;
    let catalog = expand_path(cli.catalog.as_deref().unwrap_or(&config.catalog_path));
    let options = EngineOptions::from_config(&config.engine)?;

    let mut commands = Vec::new();
    for (i, entry) in config.commands.iter().enumerate() {
        match CommandSpec::from_entry(entry) {
            Ok(spec) => commands.push(spec),
            Err(e) => tracing::warn!("⚠️ Skipping config command #{i}: {e}"),
        }
    }

    let store = open_store(&catalog, encoding, commands, config.sync, cli.fresh).await?;
    store.set_engine_options(options);
    forward_queues(&store);

    if cli.once {
        match store.run_once().await {
            Ok(runs) => tracing::info!("✅ Cycle finished, {runs} runs"),
            Err(CronvaultError::NoActiveTasks) => tracing::info!("💤 Nothing due"),
            Err(e) => {
                store.destroy(true).await?;
                return Err(e.into());
            }
        }
    } else {
        store.start()?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("🛑 Interrupted, shutting down"),
            _ = store.wait() => tracing::info!("⏹️ Engine stopped"),
        }
    }

    store.destroy(true).await?;
    Ok(())
}

async fn open_store(
    catalog: &Path,
    encoding: Encoding,
    commands: Vec<CommandSpec>,
    sync: bool,
    fresh: bool,
) -> Result<SchedulerStore> {
    let (store, errors) = if fresh || !catalog.exists() {
        tracing::info!("📂 New catalog at {} ({encoding})", catalog.display());
        SchedulerStore::create_with(catalog, encoding, commands, sync).await?
    } else {
        tracing::info!("📂 Loading catalog {} ({encoding})", catalog.display());
        SchedulerStore::load_with(catalog, encoding, commands, sync).await?
    };
    for e in errors {
        tracing::warn!("⚠️ Startup: {e}");
    }
    tracing::info!(
        "📋 {} commands in catalog",
        store.references().await.len()
    );
    Ok(store)
}

/// Job output to stdout, job failures to stderr.
fn forward_queues(store: &SchedulerStore) {
    if let Some(mut warnings) = store.take_warnings() {
        tokio::spawn(async move {
            while let Some(message) = warnings.recv().await {
                println!("📣 {message}");
            }
        });
    }
    if let Some(mut errors) = store.take_errors() {
        tokio::spawn(async move {
            while let Some(err) = errors.recv().await {
                eprintln!("❌ {err}");
            }
        });
    }
}
