//! Roster server binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use roster_directory::SqliteDirectory;
use roster_server::server::AppState;
use roster_server::ServerConfig;

/// Bot-directory backend with a real-time event gateway.
#[derive(Debug, Parser)]
#[command(name = "roster", version)]
struct Cli {
    /// Host to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind (0 auto-assigns).
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Path to the directory database (default: ~/.roster/bots.db).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Delivery loop tick interval in milliseconds.
    #[arg(long, default_value_t = 100)]
    delivery_tick_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let db_path = match cli.db {
        Some(path) => path,
        None => home_dir().join(".roster").join("bots.db"),
    };
    let directory = Arc::new(
        SqliteDirectory::open(&db_path)
            .with_context(|| format!("open directory database at {}", db_path.display()))?,
    );

    let metrics = roster_server::metrics::install_recorder();

    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        delivery_tick_ms: cli.delivery_tick_ms,
        ..ServerConfig::default()
    };
    let state = AppState::new(config, directory, metrics);
    let shutdown = Arc::clone(&state.shutdown);

    let handle = roster_server::start(state)
        .await
        .context("bind server listener")?;
    tracing::info!(addr = %handle.addr, "roster ready");

    tokio::signal::ctrl_c()
        .await
        .context("listen for ctrl+c")?;

    tracing::info!("shutting down");
    shutdown.shutdown();
    Ok(())
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
