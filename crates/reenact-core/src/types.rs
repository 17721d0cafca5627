use serde::{Deserialize, Serialize};
use std::ops::Index;

/// Axis-aligned face box in pixel coordinates of the image it was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection-over-Union with another box, 0.0 when the union is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter_w = (self.right.min(other.right) - self.left.max(other.left)).max(0.0);
        let inter_h = (self.bottom.min(other.bottom) - self.top.max(other.top)).max(0.0);
        let inter_area = inter_w * inter_h;
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

/// Identity embedding of a face (512-dimensional for ArcFace), L2-normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Build an embedding from raw model output, scaling it to unit length.
    ///
    /// A zero vector is kept as-is.
    pub fn l2_normalized(raw: Vec<f32>, model_version: Option<String>) -> Self {
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.into_iter().map(|x| x / norm).collect()
        } else {
            raw
        };
        Self {
            values,
            model_version,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// One face found by the detector.
///
/// Identity is positional: a face is only meaningful together with the
/// [`FaceSet`] (and therefore the image) it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
    #[serde(skip)]
    pub embedding: Option<Embedding>,
}

/// Faces of one image, ordered left to right by `bbox.left`.
///
/// The sort is stable, so faces sharing a left edge keep detector order and
/// index-based selection is repeatable for the same image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceSet {
    faces: Vec<DetectedFace>,
}

impl FaceSet {
    pub fn from_detections(mut faces: Vec<DetectedFace>) -> Self {
        faces.sort_by(|a, b| a.bbox.left.total_cmp(&b.bbox.left));
        Self { faces }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DetectedFace> {
        self.faces.get(index)
    }

    pub fn first(&self) -> Option<&DetectedFace> {
        self.faces.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DetectedFace> {
        self.faces.iter()
    }

    pub fn as_slice(&self) -> &[DetectedFace] {
        &self.faces
    }
}

impl Index<usize> for FaceSet {
    type Output = DetectedFace;

    fn index(&self, index: usize) -> &DetectedFace {
        &self.faces[index]
    }
}

impl<'a> IntoIterator for &'a FaceSet {
    type Item = &'a DetectedFace;
    type IntoIter = std::slice::Iter<'a, DetectedFace>;

    fn into_iter(self) -> Self::IntoIter {
        self.faces.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_at(left: f32, confidence: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox { left, top: 0.0, right: left + 10.0, bottom: 10.0 },
            confidence,
            landmarks: None,
            embedding: None,
        }
    }

    #[test]
    fn test_face_set_sorted_left_to_right() {
        let set = FaceSet::from_detections(vec![
            face_at(300.0, 0.9),
            face_at(10.0, 0.6),
            face_at(150.0, 0.8),
        ]);
        let lefts: Vec<f32> = set.iter().map(|f| f.bbox.left).collect();
        assert_eq!(lefts, vec![10.0, 150.0, 300.0]);
    }

    #[test]
    fn test_face_set_ties_keep_detector_order() {
        let set = FaceSet::from_detections(vec![
            face_at(50.0, 0.9),
            face_at(50.0, 0.7),
            face_at(20.0, 0.5),
        ]);
        assert_eq!(set[0].confidence, 0.5);
        assert_eq!(set[1].confidence, 0.9);
        assert_eq!(set[2].confidence, 0.7);
    }

    #[test]
    fn test_face_set_empty() {
        let set = FaceSet::from_detections(vec![]);
        assert!(set.is_empty());
        assert!(set.first().is_none());
    }

    #[test]
    fn test_iou_identical() {
        let a = face_at(0.0, 1.0).bbox;
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = BoundingBox { left: 0.0, top: 0.0, right: 10.0, bottom: 10.0 };
        let b = BoundingBox { left: 5.0, top: 0.0, right: 15.0, bottom: 10.0 };
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_degenerate_boxes() {
        let a = BoundingBox { left: 3.0, top: 3.0, right: 3.0, bottom: 3.0 };
        assert_eq!(a.iou(&a), 0.0);
    }

    #[test]
    fn test_embedding_normalized() {
        let e = Embedding::l2_normalized(vec![3.0, 4.0], None);
        assert!((e.values[0] - 0.6).abs() < 1e-6);
        assert!((e.values[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_embedding_zero_vector_untouched() {
        let e = Embedding::l2_normalized(vec![0.0, 0.0], None);
        assert_eq!(e.values, vec![0.0, 0.0]);
    }
}
