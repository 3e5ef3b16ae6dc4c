//! Shared state handed to the capture thread and every HTTP handler.
//!
//! Three independent lock domains live here:
//! * `device` serializes camera open/read/release,
//! * `shared` guards the latest frame, both result slots and the status,
//! * `remote` keeps a single vision API call in flight.
//!
//! Lock order, when more than one is held: `device`, then `shared`. The
//! detector lock is only ever taken alone.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use frame_scout_common::config::Config;
use frame_scout_common::frame::{CaptureStatus, DetectionResult, Frame};
use image::RgbImage;
use serde::Serialize;

use crate::capture::camera::CameraOpener;
use crate::detector::{Detections, DetectorError, ObjectDetector};
use crate::vision::VisionClient;

pub const LOCAL_INITIAL_LABEL: &str = "No item detected";
pub const REMOTE_INITIAL_LABEL: &str = "Press 'Provide Feedback' for remote analysis";

/// Both result slots, copied under one lock acquisition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSnapshot {
    pub yolo_result: DetectionResult,
    pub openai_result: DetectionResult,
}

#[derive(Debug)]
struct Snapshot {
    frame: Option<Frame>,
    local: DetectionResult,
    remote: DetectionResult,
    status: CaptureStatus,
    /// Generation of the capture run allowed to write `status`.
    run: u64,
}

pub struct AppContext {
    pub config: Config,
    shared: Mutex<Snapshot>,
    device: Mutex<()>,
    remote: tokio::sync::Mutex<()>,
    camera: Arc<dyn CameraOpener>,
    detector: Mutex<Box<dyn ObjectDetector>>,
    vision: Arc<dyn VisionClient>,
}

impl AppContext {
    pub fn new(
        config: Config,
        camera: Arc<dyn CameraOpener>,
        detector: Box<dyn ObjectDetector>,
        vision: Arc<dyn VisionClient>,
    ) -> Self {
        Self {
            config,
            shared: Mutex::new(Snapshot {
                frame: None,
                local: DetectionResult::new(LOCAL_INITIAL_LABEL),
                remote: DetectionResult::new(REMOTE_INITIAL_LABEL),
                status: CaptureStatus::default(),
                run: 0,
            }),
            device: Mutex::new(()),
            remote: tokio::sync::Mutex::new(()),
            camera,
            detector: Mutex::new(detector),
            vision,
        }
    }

    // Every write replaces whole values, so a poisoned lock still guards
    // consistent data.
    fn shared(&self) -> MutexGuard<'_, Snapshot> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn results(&self) -> ResultSnapshot {
        let shared = self.shared();
        ResultSnapshot {
            yolo_result: shared.local.clone(),
            openai_result: shared.remote.clone(),
        }
    }

    /// Deep copy of the most recently published frame.
    pub fn latest_frame(&self) -> Option<Frame> {
        self.shared().frame.clone()
    }

    /// Frame and results taken together, so the payload is self-consistent.
    pub fn frame_with_results(&self) -> Option<(Frame, ResultSnapshot)> {
        let shared = self.shared();
        let frame = shared.frame.clone()?;
        Some((
            frame,
            ResultSnapshot {
                yolo_result: shared.local.clone(),
                openai_result: shared.remote.clone(),
            },
        ))
    }

    pub fn has_frame(&self) -> bool {
        self.shared().frame.is_some()
    }

    pub fn publish_frame(&self, frame: Frame) {
        self.shared().frame = Some(frame);
    }

    pub fn record_local(&self, item: impl Into<String>) {
        let mut shared = self.shared();
        shared.local = shared.local.succeeded_by(item);
    }

    pub fn record_remote(&self, item: impl Into<String>) {
        let mut shared = self.shared();
        shared.remote = shared.remote.succeeded_by(item);
    }

    pub fn status(&self) -> CaptureStatus {
        self.shared().status.clone()
    }

    /// Hand status ownership to a new capture run and return its generation.
    pub fn begin_run(&self) -> u64 {
        let mut shared = self.shared();
        shared.run += 1;
        shared.run
    }

    /// Record `status` on behalf of capture run `run`. Writes from a run that
    /// has been superseded are dropped.
    pub fn set_run_status(&self, run: u64, status: CaptureStatus) -> bool {
        let mut shared = self.shared();
        if shared.run != run {
            return false;
        }
        shared.status = status;
        true
    }

    pub fn lock_device(&self) -> MutexGuard<'_, ()> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn lock_remote(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.remote.lock().await
    }

    pub fn camera(&self) -> &dyn CameraOpener {
        self.camera.as_ref()
    }

    pub fn detect(&self, image: &RgbImage) -> Result<Detections, DetectorError> {
        self.detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .detect(image)
    }

    pub fn vision(&self) -> &dyn VisionClient {
        self.vision.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use image::RgbImage;

    use super::*;
    use crate::testing;

    #[test]
    fn starts_with_placeholder_labels() {
        let ctx = testing::context();
        let results = ctx.results();
        assert_eq!(results.yolo_result.item, LOCAL_INITIAL_LABEL);
        assert_eq!(results.openai_result.item, REMOTE_INITIAL_LABEL);
        assert!(!ctx.has_frame());
        assert_eq!(ctx.status(), CaptureStatus::default());
    }

    #[test]
    fn slots_update_independently_and_monotonically() {
        let ctx = testing::context();
        let before = ctx.results();
        ctx.record_local("cup (0.90)");
        let after_local = ctx.results();
        assert_eq!(after_local.yolo_result.item, "cup (0.90)");
        assert_eq!(after_local.openai_result, before.openai_result);
        assert!(after_local.yolo_result.timestamp >= before.yolo_result.timestamp);

        ctx.record_remote("Coffee mug");
        ctx.record_remote("Water bottle");
        let after_remote = ctx.results();
        assert_eq!(after_remote.openai_result.item, "Water bottle");
        assert!(after_remote.openai_result.timestamp >= before.openai_result.timestamp);
        assert_eq!(after_remote.yolo_result, after_local.yolo_result);
    }

    #[test]
    fn frame_with_results_needs_a_frame() {
        let ctx = testing::context();
        assert!(ctx.frame_with_results().is_none());
        ctx.publish_frame(Frame::new(RgbImage::new(4, 2), 1));
        let (frame, results) = ctx.frame_with_results().unwrap();
        assert_eq!(frame.seq, 1);
        assert_eq!(results.yolo_result.item, LOCAL_INITIAL_LABEL);
    }

    #[test]
    fn superseded_run_cannot_touch_the_status() {
        let ctx = testing::context();
        let first = ctx.begin_run();
        let second = ctx.begin_run();
        assert!(ctx.set_run_status(second, CaptureStatus::streaming()));
        assert!(!ctx.set_run_status(first, CaptureStatus::default()));
        assert_eq!(ctx.status(), CaptureStatus::streaming());
    }

    #[test]
    fn poisoned_results_lock_is_recovered() {
        let ctx = Arc::new(testing::context());
        let poisoner = Arc::clone(&ctx);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.shared.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
        ctx.record_local("bottle (0.50)");
        assert_eq!(ctx.results().yolo_result.item, "bottle (0.50)");
    }
}
