// Sightline server - real-time scene description for assistive vision

use anyhow::Context;
use clap::Parser;
use sightline_eye::models::{DepthEstimator, ObjectDetector};
use sightline_eye::{GoogleTranslator, Translator};
use sightline_server::config::{LogFormat, ServerConfig};
use sightline_server::http::{create_router, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sightline-server", version, about = "Assistive vision streaming server")]
struct Cli {
    /// TOML or JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Directory of enrolled descriptor sets
    #[arg(long)]
    descriptor_dir: Option<PathBuf>,

    /// trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log filter")?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);
    match config.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }

    info!("Starting Sightline server");

    let detector = build_detector(&config)?;
    let depth = build_depth_estimator(&config);
    let translator: Arc<dyn Translator> = Arc::new(GoogleTranslator::new(
        config.translation_endpoint.clone(),
        Duration::from_secs(config.translation_timeout_secs),
    )?);

    let state = AppState::build(&config, detector, depth, translator);
    info!("Loaded {} enrolled identities from {:?}", state.store.len(), config.descriptor_dir);

    let app = create_router(state);
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{} (stream: ws://{}/ws/video)", addr, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("Server error")?;

    info!("Sightline server stopped");
    Ok(())
}

/// Defaults, then the config file, then environment, then CLI flags
fn load_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    config.apply_env();

    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(dir) = &cli.descriptor_dir {
        config.descriptor_dir = dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

#[cfg(feature = "onnx")]
fn build_detector(config: &ServerConfig) -> anyhow::Result<Arc<dyn ObjectDetector>> {
    let path = config
        .detector_model
        .as_ref()
        .context("No detector model configured (set YOLO_MODEL_PATH or detector_model)")?;
    let detector = sightline_eye::models::YoloDetector::new(path)
        .with_context(|| format!("Failed to load detector model {:?}", path))?
        .with_thresholds(config.detector_confidence, config.detector_iou);
    info!(
        "Detector loaded from {:?} (confidence {}, iou {})",
        path, config.detector_confidence, config.detector_iou
    );
    Ok(Arc::new(detector))
}

#[cfg(not(feature = "onnx"))]
fn build_detector(_config: &ServerConfig) -> anyhow::Result<Arc<dyn ObjectDetector>> {
    anyhow::bail!("No detector backend available: rebuild with `--features onnx`")
}

#[cfg(feature = "onnx")]
fn build_depth_estimator(config: &ServerConfig) -> Option<Arc<dyn DepthEstimator>> {
    let path = config.depth_model.as_ref()?;
    match sightline_eye::models::DepthAnythingEstimator::new(path) {
        Ok(estimator) => {
            info!("Depth model loaded from {:?}", path);
            Some(Arc::new(estimator))
        }
        Err(e) => {
            warn!("Failed to load depth model {:?}: {}", path, e);
            None
        }
    }
}

#[cfg(not(feature = "onnx"))]
fn build_depth_estimator(config: &ServerConfig) -> Option<Arc<dyn DepthEstimator>> {
    if config.depth_model.is_some() {
        warn!("depth_model is set but this build has no ONNX support; depth disabled");
    }
    None
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
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

    info!("Shutdown signal received");
}
