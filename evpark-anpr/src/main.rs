//! evpark-anpr - camera workers
//!
//! Startup is fatal on any setup failure: invalid configuration (including a
//! debounce threshold above the window), an unreachable recognizer, or an
//! unloadable model. Once workers run, failures are logged and retried.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use evpark_anpr::camera::SnapshotSource;
use evpark_anpr::classify::{EnsembleClassifier, PowertrainScorer, TreeEnsembleModel};
use evpark_anpr::evidence::CaseRecorder;
use evpark_anpr::pipeline::{start_streams, PipelineServices};
use evpark_anpr::recognition::{HttpPlateRecognizer, PlateRecognizer};
use evpark_common::{Config, EvidenceStore};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for evpark-anpr
#[derive(Parser, Debug)]
#[command(name = "evpark-anpr")]
#[command(about = "Camera plate detection and powertrain classification for the EV parking monitor")]
#[command(version)]
struct Args {
    /// Path to evpark.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root folder for the database and evidence zones
    #[arg(short, long)]
    root_folder: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::locate_and_load(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("evpark_anpr={0},evpark_common={0}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting evpark-anpr v{}", env!("CARGO_PKG_VERSION"));

    let root = config.resolve_root_folder(args.root_folder.as_deref());
    info!("Root folder: {}", root.display());
    let layout = config.evidence_layout(&root);
    layout.create_dirs().context("Failed to create evidence directories")?;

    if config.cameras.is_empty() {
        bail!("No cameras configured");
    }

    // Blocking HTTP clients are created (and dropped) outside the runtime
    let recognizer: Arc<dyn PlateRecognizer> = Arc::new(
        HttpPlateRecognizer::new(&config.anpr.recognizer_url, Duration::from_secs(10))
            .context("Failed to build recognizer client")?,
    );
    recognizer.initialize().context("Plate recognizer unavailable")?;

    let primary = TreeEnsembleModel::load(&root_relative(&root, &config.classifier.primary_model_path))
        .context("Failed to load primary model")?;
    if !primary.supports_probability() {
        bail!("Primary model {} must report probabilities", primary.name());
    }
    let fallback = TreeEnsembleModel::load(&root_relative(&root, &config.classifier.fallback_model_path))
        .context("Failed to load fallback model")?;
    info!(primary = primary.name(), fallback = fallback.name(), "Models loaded");

    let recorder = Arc::new(CaseRecorder::new(&layout, &config.classifier));
    let classifier = Arc::new(EnsembleClassifier::new(
        Arc::new(primary),
        Arc::new(fallback),
        config.classifier.clone(),
        recorder,
    ));
    let store = Arc::new(EvidenceStore::new(layout, config.reconciler.misrecognized_dir_cap));

    let services = PipelineServices {
        recognizer: Arc::clone(&recognizer),
        classifier,
        store,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(run(config, services))?;

    drop(runtime);
    drop(recognizer);
    info!("evpark-anpr shutdown complete");
    Ok(())
}

async fn run(config: Config, services: PipelineServices) -> Result<()> {
    let cancel = CancellationToken::new();
    let streams = start_streams(&config, &services, &cancel, SnapshotSource::factory)
        .context("Failed to start camera streams")?;
    info!(cameras = streams.len(), "All camera streams running");

    shutdown_signal().await;
    cancel.cancel();

    for stream in streams {
        let name = stream.camera.name.clone();
        tokio::task::spawn_blocking(move || stream.camera.join())
            .await
            .with_context(|| format!("Failed to join camera {name}"))?;
        if let Err(e) = stream.stage.await {
            tracing::error!(camera = %name, error = %e, "Classification stage failed");
        }
    }

    Ok(())
}

fn root_relative(root: &std::path::Path, path: &std::path::Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
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
