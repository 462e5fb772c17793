use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dropzone_core::pipeline::{DOWNLOAD_PROCESSOR, EXTRACT_PROCESSOR};
use dropzone_core::{
    load_config, validate_config, DownloadProcessor, ExtractProcessor, JobScheduler, JobStore,
    LinkCreator, MissionScriptAggregator, ProcessRunner, ReleaseAssetPipeline, ReleaseStatus,
    ReleaseStore, ReleaseToggle, ScriptRebuilder, SqliteJobStore, SqliteReleaseStore,
    SystemLinkOps,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("DROPZONE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("dropzone.toml"));

    info!("dropzone {} loading configuration from {:?}", VERSION, config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!("Configuration loaded (fingerprint {})", &config_hash[..16]);
    info!("Database path: {:?}", config.database.path);
    info!("Staging directory: {:?}", config.paths.staging_dir);

    let job_store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to open job store")?,
    );
    let release_store: Arc<dyn ReleaseStore> = Arc::new(
        SqliteReleaseStore::new(&config.database.path).context("Failed to open release store")?,
    );
    info!("Stores initialized");

    let runner = Arc::new(ProcessRunner::new(config.tools.clone()));
    let mut scheduler = JobScheduler::new(config.scheduler.scheduler_config(), job_store);
    scheduler
        .register(
            Arc::new(DownloadProcessor::new(Arc::clone(&runner))),
            config.scheduler.download.options(),
        )
        .with_context(|| format!("Failed to register {} processor", DOWNLOAD_PROCESSOR))?;
    scheduler
        .register(
            Arc::new(ExtractProcessor::new(Arc::clone(&runner))),
            config.scheduler.extract.options(),
        )
        .with_context(|| format!("Failed to register {} processor", EXTRACT_PROCESSOR))?;
    let scheduler = Arc::new(scheduler);

    let pipeline = Arc::new(ReleaseAssetPipeline::new(
        Arc::clone(&release_store),
        Arc::clone(&scheduler),
        config.paths.clone(),
    ));

    let scripts = Arc::new(MissionScriptAggregator::new(
        Arc::clone(&release_store),
        config.paths.clone(),
        config.mission_scripts.clone(),
    ));
    // Loader files may be stale if the previous run ended mid-toggle
    scripts
        .rebuild()
        .await
        .context("Failed to write mission script loaders")?;

    let toggle = ReleaseToggle::new(
        Arc::clone(&pipeline),
        LinkCreator::new(Arc::new(SystemLinkOps::new())),
        scripts,
        config.paths.clone(),
    );

    let shutdown = CancellationToken::new();
    let listener = pipeline.spawn_event_listener(shutdown.clone());

    scheduler.start().await;
    info!("Job scheduler started");

    log_releases(&pipeline);
    restore_enabled_releases(&pipeline, &toggle).await;

    shutdown_signal().await;
    info!("Agent shutting down...");

    scheduler.stop().await;
    shutdown.cancel();
    if let Err(e) = listener.await {
        warn!("Pipeline listener ended abnormally: {}", e);
    }

    info!("Agent stopped");
    Ok(())
}

/// Logs one line per known release.
fn log_releases(pipeline: &ReleaseAssetPipeline) {
    match pipeline.get_all_releases_with_status() {
        Ok(releases) => {
            info!("{} releases known", releases.len());
            for entry in releases {
                let line = format!(
                    "{} {} ({}): {:?} {:.0}%",
                    entry.release.mod_name,
                    entry.release.version,
                    entry.release.release_id,
                    entry.status,
                    entry.progress
                );
                match entry.status {
                    ReleaseStatus::Error => warn!("{}", line),
                    _ => info!("{}", line),
                }
            }
        }
        Err(e) => error!("Failed to read release status: {}", e),
    }
}

/// Re-links enabled releases whose links went missing while the agent was down.
async fn restore_enabled_releases(pipeline: &ReleaseAssetPipeline, toggle: &ReleaseToggle) {
    let releases = match pipeline.get_all_releases_with_status() {
        Ok(releases) => releases,
        Err(e) => {
            error!("Failed to read release status: {}", e);
            return;
        }
    };

    // Loaders were rebuilt at start-up, only links need restoring
    for entry in releases
        .into_iter()
        .filter(|entry| entry.status == ReleaseStatus::Enabled && !entry.release.links.is_empty())
    {
        if let Err(e) = toggle.restore_links(&entry.release.release_id).await {
            warn!(
                "Failed to restore links of release {}: {}",
                entry.release.release_id, e
            );
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
