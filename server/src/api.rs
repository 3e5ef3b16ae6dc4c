use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::analyzer::{self, Feedback, NO_FRAME_MESSAGE};
use crate::capture::{CaptureController, StartOutcome, StopOutcome};
use crate::context::{AppContext, ResultSnapshot};
use crate::encode::{encode_jpeg, fit_exact, EncodeError};
use crate::stream;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub ctx: Arc<AppContext>,
    pub capture: CaptureController,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ControlReply {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl ControlReply {
    fn status(status: &'static str) -> Self {
        Self {
            status,
            message: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum FrameReply {
    Frame {
        frame: String,
        #[serde(flatten)]
        results: ResultSnapshot,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum FeedbackReply {
    Success { result: String },
    Error { message: String },
}

#[derive(Debug, Serialize)]
struct StatusReply {
    active: bool,
    error: Option<String>,
    has_frame: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /start — open the camera and begin capturing
async fn start(State(state): State<Arc<AppState>>) -> Json<ControlReply> {
    let reply = match state.capture.start(&state.ctx).await {
        StartOutcome::Running => ControlReply::status("running"),
        StartOutcome::AlreadyRunning => ControlReply::status("already_running"),
        StartOutcome::Failed(message) => {
            warn!(error = message.as_str(), "capture failed to start");
            ControlReply {
                status: "error",
                message: Some(message),
            }
        }
    };
    Json(reply)
}

/// GET /stop
async fn stop(State(state): State<Arc<AppState>>) -> Json<ControlReply> {
    Json(match state.capture.stop(&state.ctx).await {
        StopOutcome::Stopped => ControlReply::status("stopped"),
        StopOutcome::NotRunning => ControlReply::status("not running"),
    })
}

/// GET /result — both detector slots
async fn result(State(state): State<Arc<AppState>>) -> Json<ResultSnapshot> {
    Json(state.ctx.results())
}

/// GET /frame — latest annotated frame as base64 JPEG, plus both results
async fn frame(State(state): State<Arc<AppState>>) -> Json<FrameReply> {
    let Some((frame, results)) = state.ctx.frame_with_results() else {
        return Json(FrameReply::Error {
            error: NO_FRAME_MESSAGE.into(),
        });
    };

    let server = &state.ctx.config.server;
    let (width, height, quality) = (server.frame_width, server.frame_height, server.frame_jpeg_quality);
    let encoded = tokio::task::spawn_blocking(move || {
        encode_jpeg(&fit_exact(frame.image, width, height), quality)
    })
    .await
    .map_err(EncodeError::from)
    .and_then(|jpeg| jpeg);

    Json(match encoded {
        Ok(jpeg) => FrameReply::Frame {
            frame: base64::engine::general_purpose::STANDARD.encode(jpeg),
            results,
        },
        Err(e) => {
            warn!(error = %e, "failed to encode frame");
            FrameReply::Error {
                error: "Error encoding frame".into(),
            }
        }
    })
}

/// GET /stream — MJPEG while capture is active
async fn video(State(state): State<Arc<AppState>>) -> Response {
    stream::response(Arc::clone(&state.ctx))
}

/// POST /request-feedback — ask the remote model about the current frame
async fn request_feedback(State(state): State<Arc<AppState>>) -> Json<FeedbackReply> {
    Json(match analyzer::request_feedback(&state.ctx).await {
        Feedback::Success(result) => FeedbackReply::Success { result },
        Feedback::Failed(message) => FeedbackReply::Error { message },
    })
}

/// GET /status
async fn status(State(state): State<Arc<AppState>>) -> Json<StatusReply> {
    let status = state.ctx.status();
    Json(StatusReply {
        active: status.active,
        error: status.error,
        has_frame: state.ctx.has_frame(),
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/start", get(start))
        .route("/stop", get(stop))
        .route("/result", get(result))
        .route("/frame", get(frame))
        .route("/stream", get(video))
        .route("/request-feedback", post(request_feedback))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then stop any running capture.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown)
        .await?;
    if state.capture.stop(&state.ctx).await == StopOutcome::Stopped {
        info!("capture stopped on shutdown");
    }
    Ok(())
}
