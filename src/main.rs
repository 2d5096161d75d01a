//! Beacon server
//!
//! Run with: cargo run -- --config beacon.toml
//!
//! Log level comes from `RUST_LOG` when set, else `logging.level`.

use anyhow::Context;
use beacon::api::{serve, AppState};
use beacon::config::{generate_default_config, Config, LoggingConfig};
use beacon::console::{ConsoleRegistry, LineDialer};
use beacon::directory::ServerDirectory;
use beacon::events::Broker;
use beacon::gateway::Gateway;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "beacon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Streams game-server console output and plugin logs to browser clients")]
struct Cli {
    /// Config file (default: search the standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Print a default config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load_default(),
    };
    if let Some(host) = cli.host {
        config.api.host = host;
    }
    if let Some(port) = cli.port {
        config.api.port = port;
    }

    init_tracing(&config.logging);

    tracing::info!("Starting Beacon v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        servers = config.servers.len(),
        queue_capacity = config.broker.queue_capacity,
        keepalive_ms = config.stream.keepalive_ms,
        "Configuration loaded"
    );

    let broker = Broker::new(config.broker.clone());
    let consoles = ConsoleRegistry::new(
        broker.clone(),
        Arc::new(LineDialer::default()),
        config.console.clone(),
    );
    let gateway = Gateway::new(broker.clone(), config.stream.clone());
    let directory = ServerDirectory::new(config.servers.clone());
    if directory.is_empty() {
        tracing::warn!("No game servers configured; every stream request will get 404");
    }

    let state = AppState::new(
        broker.clone(),
        consoles.clone(),
        gateway.clone(),
        directory,
        config.api.clone(),
    );

    let served = serve(state).await;

    tracing::info!("Closing streams and console connections...");
    gateway.shutdown();
    consoles.shutdown().await;
    broker.close_all();

    let stats = broker.stats();
    tracing::info!(
        published = stats.published,
        delivered = stats.delivered,
        dropped = stats.dropped,
        "Beacon stopped"
    );

    served.context("API server failed")
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("beacon={},tower_http=info", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
