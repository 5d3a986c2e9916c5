//! Weir Daemon
//!
//! Standalone server process for the weir stream multiplexer. Serves
//! `GET /merge`, which fans every configured upstream feed into one
//! chunked `text/plain` response.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (merge endpoint on 127.0.0.1:8080)
//! weir-daemon
//!
//! # Serve the two local mock feeds too, then merge them
//! weir-daemon --with-mocks
//!
//! # Custom config file and bind address
//! weir-daemon --config /etc/weir/weir.toml --bind 0.0.0.0:9090
//!
//! # With verbose logging
//! RUST_LOG=debug weir-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `WEIR_CONFIG`: Path to the TOML configuration file
//! - `WEIR_BIND`: Listen address for the merge endpoint
//! - `WEIR_TIMEOUT_SECS`: Global deadline for one merge run
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

mod server;

/// Command-line arguments for the daemon.
#[derive(Debug, Parser)]
#[command(name = "weir-daemon", version, about = "Fan-in stream multiplexer daemon")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "WEIR_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address for the merge endpoint
    #[arg(long, env = "WEIR_BIND")]
    bind: Option<SocketAddr>,

    /// Also serve the two local mock feeds on ports 8001/8002
    #[arg(long)]
    with_mocks: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("weir_daemon=info".parse()?)
                .add_directive("weir_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let args = Args::parse();

    let mut config = weir_core::load_config(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    info!(
        bind = %config.bind,
        sources = config.sources.len(),
        "starting weir daemon"
    );

    if args.with_mocks {
        server::spawn_mock_feeds().await?;
    }

    server::serve(config).await
}
