//! phenofront-export - Snapshot query and bulk image export service
//!
//! Serves snapshot listings for a caller's selected experiment and streams
//! matching images as ZIP archives, either interactively or through a
//! download key usable from scripts.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use phenofront_common::config::ConfigResolver;
use phenofront_export::{build_router, AppState};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for phenofront-export
#[derive(Parser, Debug)]
#[command(name = "phenofront-export")]
#[command(about = "Snapshot query and bulk image export service")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "PHENOFRONT_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding [server] bind
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Loading is silent; its outcome is logged once the subscriber exists
    let (config, source) = ConfigResolver::new(args.config)
        .load_with_source()
        .context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Build identification first, before anything can stall
    info!(
        "Starting phenofront-export v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    source.log();
    info!(
        "{} experiments configured: {}",
        config.experiments.len(),
        config.experiment_names().join(", ")
    );

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let app = build_router(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("phenofront-export listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
