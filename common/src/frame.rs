use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Seconds since the Unix epoch, with sub-second precision.
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// A captured camera frame.
///
/// The pixel buffer is owned; `clone()` copies it, so a frame handed to
/// another thread never aliases the capture loop's buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new(image: RgbImage, seq: u64) -> Self {
        Self {
            image,
            captured_at_ms: chrono::Utc::now().timestamp_millis(),
            seq,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Bounds of the area both detectors look at.
    pub fn region(&self) -> Region {
        Region::left_half(self.width(), self.height())
    }

    /// Copy of the pixels inside [`Frame::region`].
    pub fn region_of_interest(&self) -> RgbImage {
        let r = self.region();
        image::imageops::crop_imm(&self.image, r.x, r.y, r.width, r.height).to_image()
    }
}

/// Axis-aligned pixel rectangle inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Left half of the frame: the user's right hand when facing the camera.
    pub fn left_half(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width: (width / 2).max(1).min(width),
            height,
        }
    }
}

/// Latest output of one detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub item: String,
    pub timestamp: f64,
}

impl DetectionResult {
    pub fn new(item: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            timestamp: now_secs(),
        }
    }

    /// Replacement for `self` carrying `item`. The timestamp never moves
    /// backwards, even if the wall clock does.
    pub fn succeeded_by(&self, item: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            timestamp: now_secs().max(self.timestamp),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStatus {
    pub active: bool,
    pub error: Option<String>,
}

impl CaptureStatus {
    pub fn streaming() -> Self {
        Self {
            active: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            active: false,
            error: Some(error.into()),
        }
    }
}
