use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wt_cli::commands::{limits, serve, status};
use wt_cli::{Cli, Commands, Config};

/// Load config and open the store, ensuring the parent directory exists.
fn open_store(config_path: Option<&Path>) -> Result<(wt_store::SqliteStore, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let store =
        wt_store::SqliteStore::open(&config.database_path).context("failed to open database")?;
    Ok((store, config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    match cli.command {
        Some(Commands::Status) => {
            let (store, _config) = open_store(cli.config.as_deref())?;
            status::run(&mut std::io::stdout(), store).await?;
        }
        Some(Commands::Limits { action }) => {
            let (store, _config) = open_store(cli.config.as_deref())?;
            limits::run(&mut std::io::stdout(), store, action).await?;
        }
        Some(Commands::Serve) => {
            let (store, config) = open_store(cli.config.as_deref())?;
            serve::run(&config, store).await?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
