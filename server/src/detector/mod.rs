//! Local object detection on the region of interest.

#[cfg(feature = "onnx")]
mod labels;
#[cfg(feature = "onnx")]
mod onnx;
pub mod yolo;

use frame_scout_common::config::DetectorConfig;
use image::RgbImage;
use tracing::{info, warn};

#[cfg(feature = "onnx")]
pub use labels::COCO_CLASSES;
pub use yolo::BBox;

/// Label written into the local slot when inference fails.
pub const DETECTION_ERROR_LABEL: &str = "YOLO analysis error";
pub const NO_OBJECTS_LABEL: &str = "No objects detected";

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BBox,
}

/// Everything one inference pass found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detections {
    pub items: Vec<Detection>,
    /// The model also produced instance masks.
    pub segmented: bool,
}

/// A loaded detection model.
pub trait ObjectDetector: Send {
    fn detect(&mut self, image: &RgbImage) -> Result<Detections, DetectorError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("failed to load model {path}: {reason}")]
    Load { path: String, reason: String },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output: {0}")]
    Output(String),
    #[error("no detection model could be loaded: {0}")]
    NoModelAvailable(String),
}

/// Render the `top_k` most confident detections as `"cup (0.87), bottle (0.55)"`.
pub fn summarize(detections: &Detections, top_k: usize) -> String {
    let mut ranked: Vec<&Detection> = detections.items.iter().collect();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    ranked.truncate(top_k);

    if ranked.is_empty() {
        return NO_OBJECTS_LABEL.to_string();
    }

    let mut text = ranked
        .iter()
        .map(|d| format!("{} ({:.2})", d.label, d.confidence))
        .collect::<Vec<_>>()
        .join(", ");
    if detections.segmented {
        text.push_str(" (with segmentation)");
    }
    text
}

/// Try each candidate in order and keep the first one that loads.
pub fn load_first_available<D>(
    candidates: &[String],
    mut load: impl FnMut(&str) -> Result<D, DetectorError>,
) -> Result<(String, D), DetectorError> {
    let mut failures = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match load(candidate) {
            Ok(detector) => {
                info!(model = candidate.as_str(), "detection model loaded");
                return Ok((candidate.clone(), detector));
            }
            Err(e) => {
                warn!(model = candidate.as_str(), error = %e, "model unavailable, trying next");
                failures.push(e.to_string());
            }
        }
    }
    if failures.is_empty() {
        return Err(DetectorError::NoModelAvailable(
            "no candidate models configured".into(),
        ));
    }
    Err(DetectorError::NoModelAvailable(failures.join("; ")))
}

/// Load the configured model chain with the backend compiled into this binary.
pub fn load_detector(config: &DetectorConfig) -> Result<Box<dyn ObjectDetector>, DetectorError> {
    #[cfg(feature = "onnx")]
    {
        let (_, detector) =
            load_first_available(&config.models, |path| onnx::OnnxDetector::load(path, config))?;
        Ok(Box::new(detector))
    }
    #[cfg(not(feature = "onnx"))]
    {
        let (_, detector) = load_first_available(&config.models, |path| {
            Err::<Box<dyn ObjectDetector>, _>(DetectorError::Load {
                path: path.to_string(),
                reason: "built without the `onnx` feature".into(),
            })
        })?;
        Ok(detector)
    }
}
