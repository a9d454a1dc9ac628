//! Pivot mirror daemon
//!
//! Starts one named mirror and runs it until Ctrl-C or SIGTERM.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pv_core::config::{self, MirrorConfig, SecurityConfig};
use pv_core::{MirrorState, Protocol};
use pv_mirror::MirrorRegistry;

#[derive(Parser)]
#[command(name = "pv-mirror")]
#[command(about = "Encrypted two-mirror TCP pivot")]
#[command(version)]
struct Args {
    /// Name of the mirror
    #[arg(short, long, env = "PIVOT_NAME")]
    name: Option<String>,

    /// Transport protocol
    #[arg(short, long)]
    protocol: Option<Protocol>,

    /// Endpoint A: a port to listen on, or host:port to dial as the command link
    #[arg(long)]
    addr1: Option<String>,

    /// Endpoint B: a port to listen on, or the host:port target
    #[arg(long)]
    addr2: Option<String>,

    /// Act as the client side: authenticate on the command link and encrypt leg A
    #[arg(long)]
    client: bool,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Pivot v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    let security = SecurityConfig::from_env();

    let registry = MirrorRegistry::new();
    let handle = registry
        .start(config, &security)
        .await
        .context("Failed to start mirror")?;
    tracing::info!("Mirror {} started", handle.name());

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let stopped_early = tokio::select! {
        _ = cancel.cancelled() => false,
        _ = handle.wait_for(MirrorState::Closed) => true,
    };

    registry.shutdown_all().await;
    if stopped_early {
        anyhow::bail!("Mirror {} stopped unexpectedly", handle.name());
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Config file first, then CLI flags on top
fn load_config(args: &Args) -> Result<MirrorConfig> {
    let mut config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                MirrorConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            MirrorConfig::default()
        }
    };

    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    if let Some(protocol) = args.protocol {
        config.protocol = protocol;
    }
    if let Some(addr1) = &args.addr1 {
        config.endpoint_a = addr1.clone();
    }
    if let Some(addr2) = &args.addr2 {
        config.endpoint_b = addr2.clone();
    }
    if args.client {
        config.client = true;
    }

    Ok(config)
}

/// Cancel `cancel` on Ctrl-C or SIGTERM
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }

    cancel.cancel();
}
