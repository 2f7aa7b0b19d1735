//! Goflet server binary.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use goflet::config::Config;
use goflet::state::AppState;

#[derive(Parser)]
#[command(name = "goflet", about = "Goflet file service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default).
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        None | Some(Commands::Serve) => run_server().await,
    }
}

/// Run the HTTP server.
async fn run_server() -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting goflet");

    let config = Config::from_env().context("failed to load configuration")?;
    if !config.jwt.enabled {
        warn!("JWT is disabled, the service accepts unauthenticated requests");
    }

    let state = AppState::new(config.clone())
        .await
        .context("failed to initialize application state")?;

    let janitor = goflet::cron::spawn_janitor(
        &config,
        state.storage().base_path().clone(),
        state.storage().upload_path().clone(),
    );

    let app = goflet::app(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Drain background work before exiting.
    janitor.cancel();
    state.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
