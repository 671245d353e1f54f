//! # Beacon - zero-configuration leader bootstrap
//!
//! A node joining a cluster listens on a well-known multicast group for a
//! leader announcement. If one arrives within a randomized window it starts the
//! follower worker pointed at that leader; otherwise it starts the leader worker
//! and keeps announcing itself.
//!
//! ## Architecture
//! ```text
//! Multicast ⇄ Transport → Coordinator ─┬→ Supervisor (leader worker) + Announcer
//!                                      └→ Supervisor (follower worker) + Redirect responder
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cluster;
mod config;
mod routes;
mod worker;

use beacon_common::NodeId;
use cluster::{Coordinator, MulticastTransport, RunOutcome};
use config::AppConfig;
use worker::{ConfiguredResolver, ResolvedWorkers, Supervisor};

/// Beacon - leader discovery and worker supervision
#[derive(Parser, Debug)]
#[command(name = "beacon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/beacon.toml")]
    config: String,

    /// Cluster token (overrides config)
    #[arg(short, long, env = "BEACON_CLUSTER_TOKEN")]
    token: Option<String>,

    /// Host to announce when leading (overrides config)
    #[arg(long, env = "BEACON_ADVERTISE_HOST")]
    advertise_host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Optional .env before argument parsing so env-backed flags see it
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    if let Err(e) = init_logging(&args.log_level, args.json_logs) {
        eprintln!("Failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "💥 Beacon failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    info!("🔦 Starting Beacon v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    info!("📋 Configuration loaded from {}", args.config);

    // Resolve both roles before any discovery traffic
    let resolver = ConfiguredResolver::new(
        config.worker.leader.clone(),
        config.worker.follower.clone(),
    );
    let workers = ResolvedWorkers::resolve(&resolver).context("Failed to resolve worker executables")?;

    let identity = NodeId::generate();
    let transport = MulticastTransport::bind(identity.clone(), config.cluster_token())
        .context("Failed to open discovery transport")?;

    let self_address = config.self_address();
    let redirect_bind = config.redirect_bind_addr()?;
    info!(node = %identity, address = %self_address, "🆔 Node identity assigned");

    let coordinator = Coordinator::new(transport, self_address, config.discovery.settings());
    let supervisor = Supervisor::new(config.worker.terminate_grace());

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Handle SIGINT / SIGTERM
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("🛑 Shutdown signal received");
        let _ = signal_tx.send(());
    });

    let outcome = coordinator
        .run(&workers, &supervisor, redirect_bind, &shutdown_tx)
        .await;

    // Every started worker is terminated, whatever happened above
    supervisor.shutdown().await;

    match outcome {
        Ok(RunOutcome::WorkerExited(exit)) if exit.success() => {
            info!(exit = ?exit, "Worker finished, stopping")
        }
        Ok(RunOutcome::WorkerExited(exit)) => warn!(exit = ?exit, "Worker failed, stopping"),
        Ok(RunOutcome::ShutdownRequested) => info!("Shutdown complete"),
        Err(e) if e.is_fatal() => return Err(e).context("Failed to start worker"),
        Err(e) => warn!(error = %e, "Coordinator stopped on a recoverable error"),
    }

    info!("👋 Beacon shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
            .context("Failed to install JSON subscriber")?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
            .context("Failed to install subscriber")?;
    }

    Ok(())
}
