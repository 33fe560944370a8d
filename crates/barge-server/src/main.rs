//! Barge server binary.
//!
//! Configuration precedence: defaults < config file < `BARGE_*` environment
//! variables < CLI flags.

use barge_server::config::ServerConfig;
use barge_server::logging::{init_logging, LogFormat};
use barge_server::{create_router, AppState, OpenPolicy, RepoRegistry, ResultCache};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Barge - Git Smart HTTP server for bare repositories
#[derive(Parser, Debug)]
#[command(name = "barge-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "barge.toml")]
    config: PathBuf,

    /// HTTP listen address (overrides config file and env)
    #[arg(long)]
    listen_addr: Option<SocketAddr>,

    /// Data directory holding the repositories
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long)]
    log_format: Option<String>,

    /// Run in local development mode (pretty logging)
    #[arg(long)]
    local: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        ServerConfig::from_file(&args.config).unwrap_or_else(|e| {
            eprintln!("Warning: failed to load config file: {}. Using defaults.", e);
            ServerConfig::default()
        })
    } else {
        ServerConfig::default()
    };

    if let Err(e) = config.merge_env() {
        eprintln!("Warning: failed to merge environment config: {}", e);
    }

    if let Some(addr) = args.listen_addr {
        config.http.listen_addr = addr;
    }
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = dir;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    if args.local {
        config.logging.format = "pretty".to_string();
    }

    if let Err(e) = config.validate_config() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    init_logging(&config.logging.level, LogFormat::parse(&config.logging.format));

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Barge server");
    tracing::info!(
        listen_addr = %config.http.listen_addr,
        data_dir = %config.storage.data_dir.display(),
        "Server configuration"
    );

    std::fs::create_dir_all(&config.storage.data_dir)?;

    let state = AppState {
        registry: Arc::new(RepoRegistry::new(&config.storage.data_dir)),
        authz: Arc::new(OpenPolicy {
            anonymous_read: config.auth.anonymous_read,
            anonymous_write: config.auth.anonymous_write,
        }),
        cache: Arc::new(ResultCache::default()),
        timeouts: Arc::new(config.timeouts.clone()),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.http.listen_addr).await?;
    tracing::info!(addr = %config.http.listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Barge server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install CTRL+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, initiating graceful shutdown");
}
