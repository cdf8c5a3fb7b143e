//! Solcharge Service - HTTP API for charger configuration profiles.
//!
//! Run with: `cargo run -p solcharge-service -- --mock-device`

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use solcharge_service::{AppState, Config, DeviceKind, api};

/// Solcharge Service - store and apply charge-controller configurations.
#[derive(Parser, Debug)]
#[command(name = "solcharge-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database file or directory (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Charge controller base URL (overrides config).
    #[arg(long)]
    device_url: Option<String>,

    /// Use an in-process mock device instead of the real controller.
    #[arg(long)]
    mock_device: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("solcharge_service=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_default(),
    };

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(path) = args.database {
        config.storage.path = path;
    }
    if let Some(url) = args.device_url {
        config.device.kind = DeviceKind::Http;
        config.device.url = url;
    }
    if args.mock_device {
        config.device.kind = DeviceKind::Mock;
        info!("Using mock charge controller");
    }
    config.validate()?;

    let bind = config.server.bind.clone();
    let state = AppState::open(config)?;

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr: SocketAddr = bind.parse()?;
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
