//! Lifecycle of the background capture thread.

pub mod camera;
mod worker;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use frame_scout_common::frame::CaptureStatus;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::context::AppContext;

const THREAD_NAME: &str = "frame-scout-capture";
const STARTUP_TIMEOUT_MESSAGE: &str = "capture startup timed out";
const STILL_DRAINING_MESSAGE: &str = "previous capture is still shutting down";
const JOIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Running,
    AlreadyRunning,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

struct CaptureHandle {
    run: u64,
    token: CancellationToken,
    thread: JoinHandle<()>,
}

#[derive(Default)]
struct Slots {
    running: Option<CaptureHandle>,
    /// Cancelled thread that missed its join deadline. It may still hold the
    /// camera, so no new run starts until it is joined.
    draining: Option<CaptureHandle>,
}

/// Starts and stops the capture thread. At most one runs at a time; the
/// async mutex also serializes concurrent start/stop requests.
pub struct CaptureController {
    slots: Mutex<Slots>,
}

impl Default for CaptureController {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureController {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
        }
    }

    pub async fn start(&self, ctx: &Arc<AppContext>) -> StartOutcome {
        let limits = &ctx.config.capture;
        let stale_limit = Duration::from_secs(limits.stale_join_timeout_secs);
        let stop_limit = Duration::from_secs(limits.stop_timeout_secs);
        let mut slots = self.slots.lock().await;

        if let Some(handle) = slots.running.take() {
            if !handle.thread.is_finished() {
                slots.running = Some(handle);
                return StartOutcome::AlreadyRunning;
            }
            info!(run = handle.run, "reaping finished capture thread");
            if let Err(handle) = join_bounded(handle, stale_limit).await {
                slots.draining = Some(handle);
            }
        }
        if let Some(handle) = slots.draining.take() {
            info!(run = handle.run, "waiting for previous capture thread");
            if let Err(handle) = join_bounded(handle, stale_limit).await {
                slots.draining = Some(handle);
                return StartOutcome::Failed(STILL_DRAINING_MESSAGE.into());
            }
        }

        let run = ctx.begin_run();
        let token = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let spawned = std::thread::Builder::new().name(THREAD_NAME.into()).spawn({
            let ctx = Arc::clone(ctx);
            let token = token.clone();
            move || worker::run(&ctx, run, &token, ready_tx)
        });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                let message = format!("failed to spawn capture thread: {e}");
                error!(error = %e, "failed to spawn capture thread");
                ctx.set_run_status(run, CaptureStatus::failed(&message));
                return StartOutcome::Failed(message);
            }
        };
        let handle = CaptureHandle { run, token, thread };

        let startup = Duration::from_secs(limits.startup_timeout_secs);
        let (outcome, handle) = match tokio::time::timeout(startup, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                info!(run, "capture started");
                slots.running = Some(handle);
                return StartOutcome::Running;
            }
            Ok(Ok(Err(message))) => (StartOutcome::Failed(message), handle),
            Ok(Err(_)) => {
                // The thread went away without saying why.
                let message = ctx
                    .status()
                    .error
                    .unwrap_or_else(|| "capture thread exited during startup".into());
                (StartOutcome::Failed(message), handle)
            }
            Err(_) => {
                warn!(run, timeout = ?startup, "capture thread did not become ready");
                handle.token.cancel();
                ctx.set_run_status(run, CaptureStatus::failed(STARTUP_TIMEOUT_MESSAGE));
                (StartOutcome::Failed(STARTUP_TIMEOUT_MESSAGE.into()), handle)
            }
        };
        if let Err(handle) = join_bounded(handle, stop_limit).await {
            slots.draining = Some(handle);
        }
        outcome
    }

    pub async fn stop(&self, ctx: &AppContext) -> StopOutcome {
        let mut slots = self.slots.lock().await;
        let Some(handle) = slots.running.take() else {
            return StopOutcome::NotRunning;
        };
        let limit = Duration::from_secs(ctx.config.capture.stop_timeout_secs);
        // A run that lost its device clears `active` on its way out.
        let was_streaming = !handle.thread.is_finished() && ctx.status().active;

        handle.token.cancel();
        if let Err(handle) = join_bounded(handle, limit).await {
            // Whatever the thread writes on its way out is stale now.
            let idle = ctx.begin_run();
            ctx.set_run_status(idle, CaptureStatus::default());
            slots.draining = Some(handle);
        }
        if !was_streaming {
            return StopOutcome::NotRunning;
        }
        info!("capture stopped");
        StopOutcome::Stopped
    }
}

/// Join the capture thread without blocking the runtime. A thread still
/// alive after `limit` is handed back so the caller can keep track of it.
async fn join_bounded(handle: CaptureHandle, limit: Duration) -> Result<(), CaptureHandle> {
    let deadline = Instant::now() + limit;
    while !handle.thread.is_finished() {
        if Instant::now() >= deadline {
            warn!(
                run = handle.run,
                ?limit,
                "capture thread still running, leaving it to drain"
            );
            return Err(handle);
        }
        tokio::time::sleep(JOIN_POLL).await;
    }
    if handle.thread.join().is_err() {
        error!(run = handle.run, "capture thread panicked");
    }
    Ok(())
}
