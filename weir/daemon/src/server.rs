//! Daemon Server Implementation
//!
//! Binds the merge endpoint, optionally the local mock feeds, and runs
//! until a shutdown signal arrives. In-flight merges end when their
//! client connections close.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};

use weir_core::mock::{feed_router, FeedConfig};
use weir_core::{endpoint, AppState, WeirConfig};

/// Serve the merge endpoint until SIGINT/SIGTERM.
pub async fn serve(config: WeirConfig) -> anyhow::Result<()> {
    let bind = config.bind;
    let state = Arc::new(AppState::new(config)?);
    let app = endpoint::router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("weir daemon stopped cleanly");
    Ok(())
}

/// Serve the two local mock feeds the default configuration points at,
/// on the same ports the original deployment used.
pub async fn spawn_mock_feeds() -> anyhow::Result<()> {
    spawn_feed(
        "127.0.0.1:8001".parse()?,
        FeedConfig::new("hello", 10, Duration::from_millis(200)),
    )
    .await?;
    spawn_feed(
        "127.0.0.1:8002".parse()?,
        FeedConfig::new("world", 10, Duration::from_millis(200)),
    )
    .await?;
    Ok(())
}

async fn spawn_feed(addr: SocketAddr, feed: FeedConfig) -> anyhow::Result<()> {
    let app = feed_router(feed.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind mock feed {addr}"))?;
    info!(addr = %addr, label = %feed.label, "mock feed listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "mock feed server error");
        }
    });
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
