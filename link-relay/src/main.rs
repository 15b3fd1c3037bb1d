//! heartlink-relay binary entry point.
//!
//! Usage:
//! ```bash
//! heartlink-relay --config relay.toml
//! heartlink-relay --config relay.toml add-user --username alice
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use heartlink_relay::config::Config;
use heartlink_relay::http::{build_router, health};
use heartlink_relay::limits::spawn_sweeper;
use heartlink_relay::server::LoveRelay;
use heartlink_relay::storage::{PairStore, SqliteStorage};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Pairing and live love-event relay.
#[derive(Parser, Debug)]
#[command(name = "heartlink-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file; defaults apply when it does not exist
    #[arg(long, short, global = true, default_value = "relay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,

    /// Create a user and print its id
    AddUser {
        /// Unique username
        #[arg(long, short)]
        username: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::AddUser { username } => add_user(config, &username).await,
    }
}

fn load_config(path: &std::path::Path) -> Result<Config> {
    if path.exists() {
        let config = Config::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        tracing::info!(path = %path.display(), "No configuration file, using defaults");
        Ok(Config::default())
    }
}

async fn serve(config: Config) -> Result<()> {
    health::init_start_time();

    let bind_address = config.server.bind_address.clone();
    let relay = Arc::new(
        LoveRelay::from_config(config)
            .await
            .context("failed to start relay")?,
    );
    let sweeper = spawn_sweeper(relay.rate_limits().clone(), Duration::from_secs(60));

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!(address = %bind_address, "heartlink-relay listening");

    axum::serve(listener, build_router(relay))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sweeper.abort();
    tracing::info!("heartlink-relay stopped");
    Ok(())
}

async fn add_user(config: Config, username: &str) -> Result<()> {
    let username = username.trim();
    anyhow::ensure!(!username.is_empty(), "username must not be empty");

    let storage = SqliteStorage::new(&config.storage.database, config.storage.max_connections)
        .await
        .context("failed to open database")?;
    let user = storage
        .create_user(username)
        .await
        .with_context(|| format!("failed to create user {username}"))?;
    storage.close().await;

    println!("{}", user.id);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
