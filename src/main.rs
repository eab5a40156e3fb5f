use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hls_relay::config::Config;
use hls_relay::web::WebServer;

#[derive(Parser)]
#[command(name = "hls-relay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Transcoding-aware HTTP reverse proxy for HLS manifests and segments")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// This proxy's own externally visible base URL
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("hls_relay={},tower_http=info", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting hls-relay v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(&cli.config)?;
    info!(path = %cli.config, "configuration loaded");

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(base_url) = cli.base_url {
        config.server.base_url = base_url;
    }

    let sweep_interval = Duration::from_secs(config.cache.sweep_interval_seconds);
    let server = WebServer::new(config)?;

    let cache = server.state().cache.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = cache.cleanup().await;
            if removed > 0 {
                tracing::debug!(removed, "cache sweep evicted expired entries");
            }
        }
    });

    let pool = server.state().pool.clone();

    info!(host = %server.host(), port = server.port(), "listening");
    server.serve(shutdown_signal()).await?;

    info!("draining connection pools");
    pool.close_all().await;

    Ok(())
}

/// Resolves on SIGINT (ctrl-c) or, on unix, SIGTERM — whichever fires
/// first.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
