mod analyzer;
mod annotate;
mod api;
mod capture;
mod context;
mod detector;
mod encode;
mod stream;
#[cfg(test)]
mod testing;
mod vision;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use frame_scout_common::config::Config;
use tracing::{error, info, warn};

use crate::api::AppState;
use crate::capture::CaptureController;
use crate::context::AppContext;
use crate::vision::OpenAiVisionClient;

const DEFAULT_CONFIG: &str = "config.toml";

fn load_config(path: &Path, explicit: bool) -> Config {
    if !explicit && !path.exists() {
        eprintln!("{} not found, using built-in defaults", path.display());
        return Config::default();
    }
    match Config::load(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", path.display());
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to read .env: {e}");
        }
    }

    let arg = std::env::args().nth(1);
    let explicit = arg.is_some();
    let config_path = arg
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = load_config(&config_path, explicit);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let api_key = match config.vision.api_key() {
        Ok(key) => key,
        Err(e) => {
            error!(error = %e, "remote vision credential missing");
            std::process::exit(1);
        }
    };
    let vision = match OpenAiVisionClient::new(&config.vision, api_key) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "failed to build vision client");
            std::process::exit(1);
        }
    };
    let detector = match detector::load_detector(&config.detector) {
        Ok(detector) => detector,
        Err(e) => {
            error!(error = %e, "no usable detection model");
            std::process::exit(1);
        }
    };
    let camera = capture::camera::default_opener();

    info!(
        camera = camera.name(),
        camera_index = config.camera.index,
        detector = detector.name(),
        vision_model = config.vision.model.as_str(),
        "frame-scout configured"
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let ctx = Arc::new(AppContext::new(config, camera, detector, Arc::new(vision)));
    let state = Arc::new(AppState {
        ctx,
        capture: CaptureController::new(),
    });

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    info!(addr, "frame-scout server listening");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutting down");
    };
    if let Err(e) = api::serve(listener, state, shutdown).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
