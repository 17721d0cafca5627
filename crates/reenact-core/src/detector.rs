//! SCRFD face detector via ONNX Runtime.
//!
//! Implements the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model with 3-stride anchor-free decoding and NMS post-processing,
//! fed with letterboxed RGB frames.

use crate::types::{BoundingBox, DetectedFace};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Detection input edge length used when none is configured.
pub const DEFAULT_DETECTION_SIZE: usize = 640;

const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; run `reenact models fetch` or place it in the models directory")]
    ModelNotFound(String),
    #[error("detection size {0} must be a positive multiple of 32")]
    InvalidInputSize(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    input_size: usize,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model with a square detection input of `input_size` pixels.
    pub fn load(model_path: &Path, input_size: usize) -> Result<Self, DetectorError> {
        if input_size == 0 || input_size % 32 != 0 {
            return Err(DetectorError::InvalidInputSize(input_size));
        }
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            input_size,
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_size,
            stride_indices,
        })
    }

    /// Detect faces in an RGB image, in descending confidence order.
    ///
    /// An image without faces yields an empty vector.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = self.preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                self.input_size,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        Ok(nms(all_detections, SCRFD_NMS_THRESHOLD))
    }

    /// Letterbox an RGB image into a NCHW float tensor normalized for SCRFD.
    fn preprocess(&self, image: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
        let size = self.input_size;
        let (width, height) = (image.width() as f32, image.height() as f32);
        let scale = (size as f32 / width).min(size as f32 / height);

        let new_w = ((width * scale).round() as u32).clamp(1, size as u32);
        let new_h = ((height * scale).round() as u32).clamp(1, size as u32);
        let pad_x = (size as u32 - new_w) as f32 / 2.0;
        let pad_y = (size as u32 - new_h) as f32 / 2.0;

        let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

        // Padding is left at 0.0, which is SCRFD_MEAN after normalization.
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        let x_off = pad_x.floor() as usize;
        let y_off = pad_y.floor() as usize;
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (tx, ty) = (x as usize + x_off, y as usize + y_off);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        (tensor, LetterboxInfo { scale, pad_x: x_off as f32, pad_y: y_off as f32 })
    }
}

/// Discover output tensor ordering by name.
///
/// SCRFD exports either name their outputs ("score_8", "bbox_16", ...) or use
/// generic numeric names. Unrecognized names fall back to the standard
/// positional ordering:
///   [0-2] = scores (strides 8, 16, 32)
///   [3-5] = bboxes (strides 8, 16, 32)
///   [6-8] = kps    (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named {
        Some(indices) => {
            tracing::debug!("SCRFD: using name-based output tensor mapping");
            [indices[0], indices[1], indices[2]]
        }
        None => {
            tracing::debug!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping"
            );
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<DetectedFace> {
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;
    let unmap = |x: f32, y: f32| {
        (
            (x - letterbox.pad_x) / letterbox.scale,
            (y - letterbox.pad_y) / letterbox.scale,
        )
    };

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid) as f32 * step;
        let anchor_cy = (anchor_idx / grid) as f32 * step;

        let Some(offsets) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let (left, top) = unmap(anchor_cx - offsets[0] * step, anchor_cy - offsets[1] * step);
        let (right, bottom) = unmap(anchor_cx + offsets[2] * step, anchor_cy + offsets[3] * step);

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| unmap(anchor_cx + k[i * 2] * step, anchor_cy + k[i * 2 + 1] * step))
        });

        detections.push(DetectedFace {
            bbox: BoundingBox { left, top, right, bottom },
            confidence: score,
            landmarks,
            embedding: None,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections, highest confidence first.
fn nms(mut detections: Vec<DetectedFace>, iou_threshold: f32) -> Vec<DetectedFace> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<DetectedFace> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| k.bbox.iou(&det.bbox) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_face(left: f32, top: f32, w: f32, h: f32, conf: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox { left, top, right: left + w, bottom: top + h },
            confidence: conf,
            landmarks: None,
            embedding: None,
        }
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_face(5.0, 5.0, 100.0, 100.0, 0.8),
            make_face(0.0, 0.0, 100.0, 100.0, 0.9),
            make_face(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_no_suppression() {
        let detections = vec![
            make_face(0.0, 0.0, 10.0, 10.0, 0.9),
            make_face(50.0, 50.0, 10.0, 10.0, 0.8),
        ];
        assert_eq!(nms(detections, 0.4).len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_decode_stride_maps_through_letterbox() {
        // 64x64 input, stride 32 → 2x2 grid, 8 anchors; only anchor 6 fires.
        let mut scores = vec![0.0f32; 8];
        scores[6] = 0.9;
        let mut bboxes = vec![0.0f32; 32];
        bboxes[24..28].copy_from_slice(&[0.5, 0.5, 0.5, 0.5]);
        let kps = vec![0.0f32; 80];
        let letterbox = LetterboxInfo { scale: 0.5, pad_x: 0.0, pad_y: 16.0 };

        let dets = decode_stride(&scores, &bboxes, &kps, 32, 64, &letterbox, 0.5);
        assert_eq!(dets.len(), 1);
        // anchor 6 → cell 3 → (cx, cy) = (32, 32); box 16..48 in input space
        let b = dets[0].bbox;
        assert!((b.left - 32.0).abs() < 1e-4, "left {}", b.left);
        assert!((b.right - 96.0).abs() < 1e-4, "right {}", b.right);
        assert!((b.top - 0.0).abs() < 1e-4, "top {}", b.top);
        assert!((b.bottom - 64.0).abs() < 1e-4, "bottom {}", b.bottom);
        let lms = dets[0].landmarks.unwrap();
        assert!((lms[0].0 - 64.0).abs() < 1e-4 && (lms[0].1 - 32.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_below_threshold_is_empty() {
        let scores = vec![0.2f32; 8];
        let bboxes = vec![0.0f32; 32];
        let kps = vec![0.0f32; 80];
        let letterbox = LetterboxInfo { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        assert!(decode_stride(&scores, &bboxes, &kps, 32, 64, &letterbox, 0.5).is_empty());
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32",
            "bbox_8",  "bbox_16",  "bbox_32",
            "kps_8",   "kps_16",   "kps_32",
        ].iter().map(|s| s.to_string()).collect();

        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_discover_output_indices_shuffled_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        assert_eq!(discover_output_indices(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_load_rejects_bad_input_size() {
        let err = FaceDetector::load(Path::new("/nonexistent/det_10g.onnx"), 600).err();
        assert!(matches!(err, Some(DetectorError::InvalidInputSize(600))));
    }

    #[test]
    fn test_load_missing_model() {
        let err = FaceDetector::load(Path::new("/nonexistent/det_10g.onnx"), 640).err();
        assert!(matches!(err, Some(DetectorError::ModelNotFound(_))));
    }
}
