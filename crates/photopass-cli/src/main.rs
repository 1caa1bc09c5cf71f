//! photopass - command-line client for the photopass marketplace API.
//!
//! Signs in, keeps the session fresh across invocations and makes
//! authenticated calls to the backend.

mod cli;
mod commands;

use std::io;

use anyhow::Result;
use clap::Parser;
use photopass_core::{ApiClient, Config};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(ref server) = cli.server {
        config.api_base_url = server.clone();
    }
    info!(api = %config.api_base_url, storage = ?config.storage, "photopass starting");

    let store = config.open_store()?;
    let api = ApiClient::new(&config, store)?;

    match &cli.command {
        Commands::Login(args) => commands::login(&api, &mut config, args).await?,
        Commands::Logout => commands::logout(&api),
        Commands::Whoami => commands::whoami(&api).await?,
        Commands::Status => commands::status(&api),
        Commands::Get(args) => commands::get(&api, args).await?,
    }
    Ok(())
}
