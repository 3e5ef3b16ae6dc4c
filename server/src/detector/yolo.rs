//! Pre- and post-processing for Ultralytics YOLO exports.
//!
//! The model takes a `[1, 3, S, S]` float tensor in `[0, 1]` and returns
//! `[1, C, N]` where each of the `N` proposals is laid out column-major as
//! `cx, cy, w, h, score_0 .. score_{nc-1}` followed, for segmentation
//! exports, by mask coefficients.

use image::imageops::FilterType;
use image::RgbImage;

use super::{Detection, DetectorError, Detections};

/// Axis-aligned box in pixel coordinates of the image given to the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.width() * self.height() + other.width() * other.height() - inter;
        inter / union
    }
}

/// How raw model output maps back onto the source image.
#[derive(Debug, Clone, Copy)]
pub struct DecodeParams<'a> {
    pub class_names: &'a [&'a str],
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Source width / model input size.
    pub scale_x: f32,
    /// Source height / model input size.
    pub scale_y: f32,
    pub image_width: f32,
    pub image_height: f32,
}

/// Resize to `size`×`size` and lay the pixels out as planar NCHW floats.
pub fn preprocess(image: &RgbImage, size: u32) -> Vec<f32> {
    let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
    let plane = (size * size) as usize;
    let mut tensor = vec![0f32; 3 * plane];
    for (idx, px) in resized.as_raw().chunks_exact(3).enumerate() {
        tensor[idx] = f32::from(px[0]) / 255.0;
        tensor[plane + idx] = f32::from(px[1]) / 255.0;
        tensor[2 * plane + idx] = f32::from(px[2]) / 255.0;
    }
    tensor
}

pub fn decode(
    shape: &[usize],
    data: &[f32],
    params: &DecodeParams<'_>,
) -> Result<Detections, DetectorError> {
    let [batch, channels, proposals] = shape else {
        return Err(DetectorError::Output(format!(
            "expected a rank-3 tensor, got shape {shape:?}"
        )));
    };
    let (channels, proposals) = (*channels, *proposals);
    let num_classes = params.class_names.len();
    if *batch != 1 {
        return Err(DetectorError::Output(format!("expected batch 1, got {batch}")));
    }
    if channels < 4 + num_classes {
        return Err(DetectorError::Output(format!(
            "{channels} channels cannot hold 4 box coordinates and {num_classes} class scores"
        )));
    }
    if data.len() < channels * proposals {
        return Err(DetectorError::Output(format!(
            "tensor holds {} values, shape needs {}",
            data.len(),
            channels * proposals
        )));
    }

    let at = |row: usize, i: usize| data[row * proposals + i];
    let mut candidates: Vec<(usize, BBox)> = Vec::new();
    for i in 0..proposals {
        let (class_id, score) = (0..num_classes)
            .map(|c| (c, at(4 + c, i)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < params.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        candidates.push((
            class_id,
            BBox {
                x1: ((cx - w / 2.0) * params.scale_x).max(0.0),
                y1: ((cy - h / 2.0) * params.scale_y).max(0.0),
                x2: ((cx + w / 2.0) * params.scale_x).min(params.image_width),
                y2: ((cy + h / 2.0) * params.scale_y).min(params.image_height),
                confidence: score,
            },
        ));
    }

    let items = nms(candidates, params.iou_threshold)
        .into_iter()
        .map(|(class_id, bbox)| Detection {
            label: params.class_names[class_id].to_string(),
            confidence: bbox.confidence,
            bbox,
        })
        .collect();

    Ok(Detections {
        items,
        segmented: channels > 4 + num_classes,
    })
}

/// Class-aware greedy non-maximum suppression, highest confidence first.
pub fn nms(mut boxes: Vec<(usize, BBox)>, iou_threshold: f32) -> Vec<(usize, BBox)> {
    boxes.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));
    let mut kept: Vec<(usize, BBox)> = Vec::new();
    for (class_id, candidate) in boxes {
        let suppressed = kept
            .iter()
            .any(|(k, b)| *k == class_id && b.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push((class_id, candidate));
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const NAMES: [&str; 3] = ["person", "cup", "bottle"];

    fn params() -> DecodeParams<'static> {
        DecodeParams {
            class_names: &NAMES,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            scale_x: 0.5,
            scale_y: 0.75,
            image_width: 320.0,
            image_height: 480.0,
        }
    }

    /// Build a column-major `[1, C, N]` buffer from per-proposal rows.
    fn tensor(rows: &[Vec<f32>]) -> (Vec<usize>, Vec<f32>) {
        let channels = rows[0].len();
        let n = rows.len();
        let mut data = vec![0f32; channels * n];
        for (i, row) in rows.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                data[c * n + i] = *v;
            }
        }
        (vec![1, channels, n], data)
    }

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> BBox {
        BBox {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = bbox(20.0, 20.0, 30.0, 30.0, 0.9);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn nms_suppresses_overlaps_within_a_class_only() {
        let boxes = vec![
            (1, bbox(0.0, 0.0, 10.0, 10.0, 0.6)),
            (1, bbox(1.0, 1.0, 10.0, 10.0, 0.9)),
            (2, bbox(1.0, 1.0, 10.0, 10.0, 0.5)),
        ];
        let kept = nms(boxes, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].0, 1);
        assert!((kept[0].1.confidence - 0.9).abs() < 1e-6);
        assert_eq!(kept[1].0, 2);
    }

    #[test]
    fn decode_picks_best_class_and_rescales() {
        let (shape, data) = tensor(&[
            vec![100.0, 200.0, 40.0, 80.0, 0.1, 0.8, 0.3],
            vec![50.0, 50.0, 10.0, 10.0, 0.1, 0.1, 0.2],
        ]);
        let detections = decode(&shape, &data, &params()).unwrap();
        assert!(!detections.segmented);
        assert_eq!(detections.items.len(), 1);
        let cup = &detections.items[0];
        assert_eq!(cup.label, "cup");
        assert!((cup.confidence - 0.8).abs() < 1e-6);
        assert!((cup.bbox.x1 - 40.0).abs() < 1e-4);
        assert!((cup.bbox.y1 - 120.0).abs() < 1e-4);
        assert!((cup.bbox.x2 - 60.0).abs() < 1e-4);
        assert!((cup.bbox.y2 - 180.0).abs() < 1e-4);
    }

    #[test]
    fn decode_flags_mask_coefficients_as_segmentation() {
        let (shape, data) = tensor(&[vec![10.0, 10.0, 4.0, 4.0, 0.9, 0.0, 0.0, 0.3, -0.2]]);
        let detections = decode(&shape, &data, &params()).unwrap();
        assert!(detections.segmented);
        assert_eq!(detections.items[0].label, "person");
    }

    #[test]
    fn decode_rejects_bad_shapes() {
        assert!(decode(&[1, 7], &[0.0; 7], &params()).is_err());
        assert!(decode(&[2, 7, 1], &[0.0; 14], &params()).is_err());
        assert!(decode(&[1, 5, 1], &[0.0; 5], &params()).is_err());
        assert!(decode(&[1, 7, 4], &[0.0; 7], &params()).is_err());
    }

    #[test]
    fn preprocess_is_planar_and_normalized() {
        let image = RgbImage::from_pixel(8, 4, Rgb([255, 0, 51]));
        let tensor = preprocess(&image, 4);
        assert_eq!(tensor.len(), 3 * 16);
        assert!(tensor[..16].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(tensor[16..32].iter().all(|v| v.abs() < 1e-6));
        assert!(tensor[32..].iter().all(|v| (*v - 0.2).abs() < 1e-6));
    }
}
