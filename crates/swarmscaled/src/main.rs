//! swarmscaled — the swarmscale daemon.
//!
//! Single binary that assembles all swarmscale subsystems:
//! - Docker Swarm client (unix socket or `DOCKER_HOST`)
//! - Threshold store (redb)
//! - Telemetry publisher
//! - Autoscaler
//! - HTTP API + SSE stream
//!
//! # Usage
//!
//! ```text
//! swarmscaled --db-path swarm.db --port 8090 --config swarmscale.toml
//! ```

mod config;
mod seed;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use swarmscale_autoscale::{Autoscaler, ReplicaScaler};
use swarmscale_cluster::{ClusterClient, DockerClient};
use swarmscale_metrics::{ResourceAggregator, TelemetryPublisher};
use swarmscale_state::{StateStore, ThresholdStore};

use crate::config::DaemonConfig;

const DEFAULT_LOG_FILTER: &str = "info,swarmscaled=debug,swarmscale=debug";

#[derive(Parser)]
#[command(name = "swarmscaled", about = "Docker Swarm memory autoscaler")]
struct Cli {
    /// Path of the threshold database file.
    #[arg(long, default_value = "swarm.db")]
    db_path: PathBuf,

    /// Port to listen on.
    #[arg(long, default_value = "8090")]
    port: u16,

    /// Optional TOML file with intervals and threshold defaults.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let config = DaemonConfig::load(cli.config.as_deref())?;

    run(cli.port, cli.db_path, config).await
}

async fn run(port: u16, db_path: PathBuf, config: DaemonConfig) -> anyhow::Result<()> {
    info!("swarmscale daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    // Cluster client.
    let docker = DockerClient::from_env()
        .context("resolving docker host")?
        .with_request_timeout(config.request_timeout());
    let version = docker
        .ping()
        .await
        .with_context(|| format!("cannot reach docker at {}", docker.host()))?;
    info!(host = %docker.host(), %version, "connected to docker");
    let cluster: Arc<dyn ClusterClient> = Arc::new(docker);

    // Threshold store.
    let state = StateStore::open(&db_path)
        .with_context(|| format!("opening threshold store {}", db_path.display()))?;
    info!(path = ?db_path, "threshold store opened");
    let store: Arc<dyn ThresholdStore> = Arc::new(state);

    seed::seed_thresholds(cluster.as_ref(), store.as_ref(), config.thresholds.limits()).await?;

    // Aggregator and scaler, shared by the loops and the API.
    let aggregator =
        ResourceAggregator::new(Arc::clone(&cluster)).with_stats_timeout(config.stats_timeout());
    let scaler = Arc::new(ReplicaScaler::new(Arc::clone(&cluster)));

    // Telemetry publisher.
    let publisher = Arc::new(TelemetryPublisher::with_capacity(
        Arc::clone(&cluster),
        Arc::clone(&store),
        aggregator.clone(),
        config.telemetry.channel_capacity,
    )
    .with_max_age(config.telemetry_interval()));
    info!(
        interval = config.telemetry.interval_secs,
        capacity = config.telemetry.channel_capacity,
        "telemetry publisher initialized"
    );

    // Autoscaler.
    let mut autoscaler = Autoscaler::new(Arc::clone(&store), aggregator, Arc::clone(&scaler))
        .with_cooldown(config.cooldown());
    info!(
        interval = config.autoscale.poll_interval_secs,
        cooldown = config.autoscale.cooldown_secs,
        "autoscaler initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let telemetry_shutdown = shutdown_rx.clone();
    let autoscale_shutdown = shutdown_rx.clone();

    // ── Start background tasks ─────────────────────────────────

    // Telemetry loop.
    let telemetry_publisher = Arc::clone(&publisher);
    let telemetry_interval = config.telemetry_interval();
    let telemetry_handle = tokio::spawn(async move {
        telemetry_publisher
            .run(telemetry_interval, telemetry_shutdown)
            .await;
    });

    // Autoscaler loop.
    let poll_interval = config.poll_interval();
    let autoscale_handle = tokio::spawn(async move {
        autoscaler.run(poll_interval, autoscale_shutdown).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = swarmscale_api::build_router(swarmscale_api::ApiState {
        store,
        scaler,
        publisher,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = telemetry_handle.await;
    let _ = autoscale_handle.await;

    info!("swarmscale daemon stopped");
    Ok(())
}
