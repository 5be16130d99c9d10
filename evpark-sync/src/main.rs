//! evpark-sync - lifecycle reconciler and service API
//!
//! Runs the periodic reconciliation pass against the vendor location service
//! and serves the status / trigger API until shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use evpark_common::{Config, EvidenceStore};
use evpark_sync::reconciler::{Reconciler, ReconcilerSettings};
use evpark_sync::scheduler::run_scheduler;
use evpark_sync::store::{CommitPolicy, MonitoringStore};
use evpark_sync::telemetry::TelemetrySink;
use evpark_sync::vendor::VendorClient;
use evpark_sync::{build_router, AppState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for evpark-sync
#[derive(Parser, Debug)]
#[command(name = "evpark-sync")]
#[command(about = "Parking lifecycle reconciler for the EV parking monitor")]
#[command(version)]
struct Args {
    /// Path to evpark.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root folder for the database and evidence zones
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Override the bind port
    #[arg(short, long, env = "EVPARK_SYNC_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::locate_and_load(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("evpark_sync={0},evpark_common={0},tower_http=info", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting evpark-sync v{}", env!("CARGO_PKG_VERSION"));

    if config.vendor.location_url.trim().is_empty() {
        bail!("vendor.location_url is not configured");
    }

    let root = config.resolve_root_folder(args.root_folder.as_deref());
    info!("Root folder: {}", root.display());
    let layout = config.evidence_layout(&root);
    layout.create_dirs().context("Failed to create evidence directories")?;

    let db_path = config.database_path(&root);
    info!("Database: {}", db_path.display());
    let pool = evpark_common::db::init_database_pool(&db_path)
        .await
        .context("Failed to open monitoring database")?;

    let store = MonitoringStore::new(pool, CommitPolicy::from(&config.database));
    let evidence = Arc::new(EvidenceStore::new(layout, config.reconciler.misrecognized_dir_cap));
    let vendor = Arc::new(VendorClient::new(&config.vendor).context("Failed to build vendor client")?);
    let reconciler = Arc::new(Reconciler::new(
        store,
        evidence,
        vendor,
        ReconcilerSettings::from_config(&config),
    ));
    let telemetry = Arc::new(TelemetrySink::new(&config.telemetry).context("Failed to build telemetry client")?);

    let state = AppState::new(Arc::clone(&reconciler));
    let cancel = CancellationToken::new();
    let scheduler = tokio::spawn(run_scheduler(
        Arc::clone(&reconciler),
        telemetry,
        Duration::from_secs(config.reconciler.interval_secs.max(1)),
        Arc::clone(&state.last_error),
        cancel.clone(),
    ));

    let app = build_router(state);
    let port = args.port.unwrap_or(config.server.port);
    let bind_addr = format!("{}:{}", config.server.host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {bind_addr}"))?;
    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Err(e) = scheduler.await {
        tracing::error!(error = %e, "Scheduler task failed");
    }

    info!("evpark-sync shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
