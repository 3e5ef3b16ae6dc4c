use frame_scout_common::config::DetectorConfig;
use image::RgbImage;
use ort::session::Session;
use ort::value::Tensor;
use tracing::debug;

use super::yolo::{self, DecodeParams};
use super::{Detections, DetectorError, ObjectDetector, COCO_CLASSES};

/// YOLO model running on ONNX Runtime.
pub struct OnnxDetector {
    session: Session,
    name: String,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl OnnxDetector {
    pub fn load(path: &str, config: &DetectorConfig) -> Result<Self, DetectorError> {
        let session = Session::builder()
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|e| DetectorError::Load {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            session,
            name: path.to_string(),
            input_size: config.input_size,
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
        })
    }
}

impl ObjectDetector for OnnxDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Detections, DetectorError> {
        let size = self.input_size as usize;
        let input = yolo::preprocess(image, self.input_size);
        let tensor = Tensor::from_array(([1usize, 3, size, size], input.into_boxed_slice()))
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs!["images" => tensor])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::Output(e.to_string()))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        debug!(model = self.name.as_str(), ?dims, "inference complete");

        let edge = self.input_size as f32;
        yolo::decode(
            &dims,
            data,
            &DecodeParams {
                class_names: &COCO_CLASSES,
                confidence_threshold: self.confidence_threshold,
                iou_threshold: self.iou_threshold,
                scale_x: image.width() as f32 / edge,
                scale_y: image.height() as f32 / edge,
                image_width: image.width() as f32,
                image_height: image.height() as f32,
            },
        )
    }

    fn name(&self) -> &str {
        &self.name
    }
}
