//! Fakes for the camera, detector and vision seams, plus test fixtures.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use frame_scout_common::config::{CameraConfig, Config};
use frame_scout_common::frame::Frame;
use image::{Rgb, RgbImage};

use crate::api::{self, AppState};
use crate::capture::camera::{CameraDevice, CameraError, CameraOpener};
use crate::capture::CaptureController;
use crate::context::AppContext;
use crate::detector::{BBox, Detection, Detections, DetectorError, ObjectDetector};
use crate::vision::{VisionClient, VisionError};

/// Camera that hands out solid-colour frames.
pub struct FakeCamera {
    width: u32,
    height: u32,
    /// Opening fails with this reason.
    open_error: Option<String>,
    /// Opens fine but every read fails.
    no_frames: bool,
    /// The device reports itself closed after this many reads.
    closes_after: Option<u64>,
    /// Read attempts (1-based, the probe included) that fail.
    failing_reads: Range<u64>,
    opens: AtomicUsize,
    releases: Arc<AtomicUsize>,
}

impl FakeCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            open_error: None,
            no_frames: false,
            closes_after: None,
            failing_reads: 0..0,
            opens: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            open_error: Some(reason.into()),
            ..Self::new(1280, 720)
        }
    }

    pub fn without_frames(mut self) -> Self {
        self.no_frames = true;
        self
    }

    pub fn closing_after(mut self, reads: u64) -> Self {
        self.closes_after = Some(reads);
        self
    }

    pub fn failing_reads(mut self, attempts: Range<u64>) -> Self {
        self.failing_reads = attempts;
        self
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl CameraOpener for FakeCamera {
    fn open(&self, config: &CameraConfig) -> Result<Box<dyn CameraDevice>, CameraError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.open_error {
            return Err(CameraError::Open {
                index: config.index,
                reason: reason.clone(),
            });
        }
        Ok(Box::new(FakeDevice {
            width: self.width,
            height: self.height,
            no_frames: self.no_frames,
            closes_after: self.closes_after,
            failing_reads: self.failing_reads.clone(),
            attempts: 0,
            reads: 0,
            released: false,
            releases: Arc::clone(&self.releases),
        }))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

struct FakeDevice {
    width: u32,
    height: u32,
    no_frames: bool,
    closes_after: Option<u64>,
    failing_reads: Range<u64>,
    attempts: u64,
    reads: u64,
    released: bool,
    releases: Arc<AtomicUsize>,
}

impl CameraDevice for FakeDevice {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if self.no_frames {
            return Err(CameraError::Read("no signal".into()));
        }
        self.attempts += 1;
        if self.failing_reads.contains(&self.attempts) {
            return Err(CameraError::Read("dropped frame".into()));
        }
        self.reads += 1;
        let shade = (self.reads % 200) as u8;
        Ok(Frame::new(
            RgbImage::from_pixel(self.width, self.height, Rgb([shade, 90, 160])),
            self.reads,
        ))
    }

    fn is_open(&self) -> bool {
        !self.released && self.closes_after.map_or(true, |limit| self.reads < limit)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Detector that always finds the same objects, or always fails.
pub struct FakeDetector {
    pub result: Result<Detections, String>,
    pub calls: Arc<AtomicU64>,
    /// Time spent in every `detect` call.
    delay: Duration,
}

impl FakeDetector {
    pub fn finding(items: &[(&str, f32)]) -> Self {
        let items = items
            .iter()
            .map(|(label, confidence)| Detection {
                label: (*label).into(),
                confidence: *confidence,
                bbox: BBox {
                    x1: 0.0,
                    y1: 0.0,
                    x2: 10.0,
                    y2: 10.0,
                    confidence: *confidence,
                },
            })
            .collect();
        Self {
            result: Ok(Detections {
                items,
                segmented: false,
            }),
            calls: Arc::new(AtomicU64::new(0)),
            delay: Duration::ZERO,
        }
    }

    pub fn failing() -> Self {
        Self {
            result: Err("model exploded".into()),
            calls: Arc::new(AtomicU64::new(0)),
            delay: Duration::ZERO,
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl ObjectDetector for FakeDetector {
    fn detect(&mut self, _image: &RgbImage) -> Result<Detections, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.result
            .clone()
            .map_err(DetectorError::Inference)
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Vision client with a canned answer that records what it was sent.
pub struct FakeVision {
    pub answer: Result<String, u16>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    last_image: std::sync::Mutex<Option<Vec<u8>>>,
}

impl FakeVision {
    pub fn answering(answer: &str) -> Self {
        Self::with_answer(Ok(answer.into()))
    }

    pub fn failing(status: u16) -> Self {
        Self::with_answer(Err(status))
    }

    fn with_answer(answer: Result<String, u16>) -> Self {
        Self {
            answer,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            last_image: std::sync::Mutex::new(None),
        }
    }

    /// Hold every `identify` call open for `delay`.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most `identify` calls that were ever running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn last_image(&self) -> Option<Vec<u8>> {
        self.last_image.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionClient for FakeVision {
    async fn identify(&self, jpeg: &[u8]) -> Result<String, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        *self.last_image.lock().unwrap() = Some(jpeg.to_vec());
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match &self.answer {
            Ok(text) => Ok(text.clone()),
            Err(status) => Err(VisionError::Status {
                status: *status,
                body: "fake failure".into(),
            }),
        }
    }
}

/// Defaults tuned so a capture run starts immediately and loops quickly.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.camera.open_settle_ms = 0;
    config.camera.fps = 100;
    config.capture.min_sleep_ms = 1;
    config.capture.read_retry_ms = 5;
    config.capture.detect_every = 1;
    config.server.stream_interval_ms = 10;
    config
}

pub fn context() -> AppContext {
    context_with(
        Arc::new(FakeCamera::new(640, 480)),
        FakeDetector::finding(&[("cup", 0.9)]),
        Arc::new(FakeVision::answering("Coffee mug")),
    )
}

pub fn context_with(
    camera: Arc<FakeCamera>,
    detector: FakeDetector,
    vision: Arc<FakeVision>,
) -> AppContext {
    context_from(test_config(), camera, detector, vision)
}

pub fn context_from(
    config: Config,
    camera: Arc<FakeCamera>,
    detector: FakeDetector,
    vision: Arc<FakeVision>,
) -> AppContext {
    AppContext::new(config, camera, Box::new(detector), vision)
}

/// Serve the full router on an ephemeral port and return its base URL.
pub async fn spawn_server(ctx: Arc<AppContext>) -> (String, Arc<AppState>) {
    let state = Arc::new(AppState {
        ctx,
        capture: CaptureController::new(),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = api::router(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), state)
}
