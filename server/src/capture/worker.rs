use std::time::{Duration, Instant};

use frame_scout_common::frame::CaptureStatus;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::camera::CameraDevice;
use super::STARTUP_TIMEOUT_MESSAGE;
use crate::annotate::annotate;
use crate::context::AppContext;
use crate::detector::{summarize, DETECTION_ERROR_LABEL};

const NO_FRAMES_MESSAGE: &str = "camera opened but not providing frames";
const CLOSED_MESSAGE: &str = "camera closed unexpectedly";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Opening,
    Streaming,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Cancelled,
    DeviceLost,
}

fn enter(phase: &mut Phase, next: Phase) {
    info!(from = ?*phase, to = ?next, "capture phase");
    *phase = next;
}

/// Body of the capture thread. `ready` carries the startup outcome back to
/// the controller once the device has produced its first frame. Status is
/// written on behalf of generation `run` only.
pub(super) fn run(
    ctx: &AppContext,
    run: u64,
    token: &CancellationToken,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let mut phase = Phase::Idle;
    enter(&mut phase, Phase::Opening);

    let mut device = match open(ctx) {
        Ok(device) => device,
        Err(message) => {
            warn!(error = message.as_str(), "camera unavailable");
            ctx.set_run_status(run, CaptureStatus::failed(&message));
            let _ = ready.send(Err(message));
            enter(&mut phase, Phase::Idle);
            return;
        }
    };

    ctx.set_run_status(run, CaptureStatus::streaming());
    if ready.send(Ok(())).is_err() {
        // The controller stopped waiting for us.
        release(ctx, device.as_mut());
        ctx.set_run_status(run, CaptureStatus::failed(STARTUP_TIMEOUT_MESSAGE));
        enter(&mut phase, Phase::Idle);
        return;
    }

    enter(&mut phase, Phase::Streaming);
    let exit = stream(ctx, token, device.as_mut());

    enter(&mut phase, Phase::Stopping);
    release(ctx, device.as_mut());
    let ended = match exit {
        Exit::Cancelled => CaptureStatus::default(),
        Exit::DeviceLost => CaptureStatus::failed(CLOSED_MESSAGE),
    };
    if !ctx.set_run_status(run, ended) {
        debug!(run, "newer capture run owns the status");
    }
    enter(&mut phase, Phase::Idle);
}

fn open(ctx: &AppContext) -> Result<Box<dyn CameraDevice>, String> {
    let config = &ctx.config.camera;
    let _device = ctx.lock_device();
    debug!(backend = ctx.camera().name(), index = config.index, "opening camera");
    let mut device = ctx.camera().open(config).map_err(|e| e.to_string())?;

    // Many webcams hand out black or partial frames right after opening.
    std::thread::sleep(Duration::from_millis(config.open_settle_ms));
    if let Err(e) = device.read_frame() {
        debug!(error = %e, "probe read failed");
        device.release();
        return Err(NO_FRAMES_MESSAGE.into());
    }
    Ok(device)
}

fn release(ctx: &AppContext, device: &mut dyn CameraDevice) {
    let _device = ctx.lock_device();
    device.release();
    debug!("camera released");
}

fn stream(ctx: &AppContext, token: &CancellationToken, device: &mut dyn CameraDevice) -> Exit {
    let capture = &ctx.config.capture;
    let target = ctx.config.camera.frame_interval();
    let floor = Duration::from_millis(capture.min_sleep_ms);
    let retry = Duration::from_millis(capture.read_retry_ms);
    let log_every = Duration::from_secs(capture.read_error_log_secs);
    let detect_every = capture.detect_every.max(1);
    let top_k = ctx.config.detector.top_k;

    let mut frames: u64 = 0;
    let mut last_read_warning: Option<Instant> = None;
    let mut suppressed: u64 = 0;

    loop {
        if token.is_cancelled() {
            return Exit::Cancelled;
        }
        let started = Instant::now();

        let read = {
            let _device = ctx.lock_device();
            if !device.is_open() {
                warn!("camera closed unexpectedly");
                return Exit::DeviceLost;
            }
            device.read_frame()
        };
        let mut frame = match read {
            Ok(frame) => frame,
            Err(e) => {
                if last_read_warning.map_or(true, |at| at.elapsed() >= log_every) {
                    warn!(error = %e, suppressed, "frame read failed");
                    last_read_warning = Some(Instant::now());
                    suppressed = 0;
                } else {
                    suppressed += 1;
                }
                std::thread::sleep(retry);
                continue;
            }
        };

        frames += 1;
        if frames % detect_every == 0 {
            let label = match ctx.detect(&frame.region_of_interest()) {
                Ok(detections) => summarize(&detections, top_k),
                Err(e) => {
                    warn!(error = %e, "local detection failed");
                    DETECTION_ERROR_LABEL.to_string()
                }
            };
            ctx.record_local(label);
        }

        let results = ctx.results();
        annotate(
            &mut frame.image,
            &results.yolo_result.item,
            &results.openai_result.item,
        );
        ctx.publish_frame(frame);

        std::thread::sleep(pacing_delay(started.elapsed(), target, floor));
    }
}

/// Time left in this iteration's budget, but never less than `floor` so the
/// loop always yields.
pub(super) fn pacing_delay(elapsed: Duration, target: Duration, floor: Duration) -> Duration {
    target.saturating_sub(elapsed).max(floor)
}
