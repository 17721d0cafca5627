//! Face alignment via 4-DOF similarity transform.
//!
//! Maps detected faces onto the InsightFace five-point template so that the
//! recognizer (112×112) and the swap model (128×128) see canonical crops,
//! and maps swapped crops back into the full frame.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 crop.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Fraction of the crop size over which the paste-back mask fades to zero.
const FEATHER_FRACTION: f32 = 0.1;

/// Reference landmarks scaled to a square crop of `size` pixels.
///
/// Sizes that are multiples of 112 use the template as-is (scaled); others
/// (e.g. 128) scale uniformly by `size / 112`.
pub fn reference_landmarks(size: u32) -> [(f32, f32); 5] {
    let ratio = size as f32 / 112.0;
    REFERENCE_LANDMARKS_112.map(|(x, y)| (x * ratio, y * ratio))
}

/// Similarity transform `| a -b tx ; b a ty |` mapping image space to crop space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform {
    pub const IDENTITY: Self = Self { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    /// Least-squares estimate of the transform taking `src` points onto `dst`.
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        // Overdetermined system A * [a, b, tx, ty]^T = B; for each pair:
        //   sx * a - sy * b + tx = dx
        //   sy * a + sx * b + ty = dy
        let mut ata = [0.0f32; 16];
        let mut atb = [0.0f32; 4];

        for ((sx, sy), (dx, dy)) in src.iter().copied().zip(dst.iter().copied()) {
            let r1 = [sx, -sy, 1.0, 0.0];
            let r2 = [sy, sx, 0.0, 1.0];

            for j in 0..4 {
                for k in 0..4 {
                    ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
                }
                atb[j] += r1[j] * dx + r2[j] * dy;
            }
        }

        match solve_4x4(&ata, &atb) {
            Some([a, b, tx, ty]) => Self { a, b, tx, ty },
            None => Self::IDENTITY,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse transform, `None` when the scale collapses to zero.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 {
            return None;
        }
        let ia = self.a / det;
        let ib = -self.b / det;
        // x = R^-1 (x' - t)
        let tx = -(ia * self.tx - ib * self.ty);
        let ty = -(ib * self.tx + ia * self.ty);
        Some(Self { a: ia, b: ib, tx, ty })
    }
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> Option<[f32; 4]> {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    Some(x)
}

/// Bilinear sample of an RGB image; out-of-bounds neighbours read as black.
fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let fetch = |px: i32, py: i32| -> [f32; 3] {
        if px >= 0 && px < w && py >= 0 && py < h {
            let Rgb(c) = *image.get_pixel(px as u32, py as u32);
            [c[0] as f32, c[1] as f32, c[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let tl = fetch(x0, y0);
    let tr = fetch(x0 + 1, y0);
    let bl = fetch(x0, y0 + 1);
    let br = fetch(x0 + 1, y0 + 1);

    std::array::from_fn(|c| {
        tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy
    })
}

fn to_pixel(rgb: [f32; 3]) -> Rgb<u8> {
    Rgb(rgb.map(|v| v.round().clamp(0.0, 255.0) as u8))
}

/// Warp `image` into a `size`×`size` crop using an image→crop transform.
pub fn warp_to_crop(image: &RgbImage, transform: &SimilarityTransform, size: u32) -> RgbImage {
    let Some(inverse) = transform.inverse() else {
        return RgbImage::new(size, size);
    };

    RgbImage::from_fn(size, size, |ox, oy| {
        let (sx, sy) = inverse.apply(ox as f32, oy as f32);
        to_pixel(sample_bilinear(image, sx, sy))
    })
}

/// Align a face to the canonical crop of `size` pixels.
///
/// Returns the crop together with the image→crop transform needed to paste a
/// processed crop back.
pub fn align_face(
    image: &RgbImage,
    landmarks: &[(f32, f32); 5],
    size: u32,
) -> (RgbImage, SimilarityTransform) {
    let transform = SimilarityTransform::estimate(landmarks, &reference_landmarks(size));
    (warp_to_crop(image, &transform, size), transform)
}

/// Blend weight for a crop coordinate: 1.0 in the interior, fading linearly to
/// 0.0 at the crop border.
fn feather_weight(cx: f32, cy: f32, size: u32) -> f32 {
    let edge = (size - 1) as f32;
    let dist = cx.min(cy).min(edge - cx).min(edge - cy);
    let margin = (size as f32 * FEATHER_FRACTION).max(1.0);
    (dist / margin).clamp(0.0, 1.0)
}

/// Composite a processed crop back into a copy of `frame`.
///
/// `transform` is the image→crop transform the crop was produced with. Only
/// the frame region covered by the crop is touched; the output has the same
/// dimensions as `frame`.
pub fn paste_back(frame: &RgbImage, crop: &RgbImage, transform: &SimilarityTransform) -> RgbImage {
    let mut output = frame.clone();
    let size = crop.width().min(crop.height());
    let Some(inverse) = transform.inverse() else {
        return output;
    };

    // Frame-space bounds of the crop square.
    let edge = size as f32;
    let corners = [(0.0, 0.0), (edge, 0.0), (0.0, edge), (edge, edge)].map(|(x, y)| inverse.apply(x, y));
    let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max).ceil();
    let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max).ceil();
    if max_x < 0.0 || max_y < 0.0 {
        return output;
    }
    let max_x = (max_x as u32).min(frame.width());
    let max_y = (max_y as u32).min(frame.height());

    for y in min_y..max_y {
        for x in min_x..max_x {
            let (cx, cy) = transform.apply(x as f32, y as f32);
            if cx < 0.0 || cy < 0.0 || cx > (size - 1) as f32 || cy > (size - 1) as f32 {
                continue;
            }
            let weight = feather_weight(cx, cy, size);
            if weight <= 0.0 {
                continue;
            }
            let swapped = sample_bilinear(crop, cx, cy);
            let Rgb(orig) = *frame.get_pixel(x, y);
            let blended: [f32; 3] =
                std::array::from_fn(|c| swapped[c] * weight + orig[c] as f32 * (1.0 - weight));
            output.put_pixel(x, y, to_pixel(blended));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_LANDMARKS_112;
        let m = SimilarityTransform::estimate(&pts, &pts);
        assert!((m.a - 1.0).abs() < 1e-4, "a = {}", m.a);
        assert!(m.b.abs() < 1e-4, "b = {}", m.b);
        assert!(m.tx.abs() < 1e-3, "tx = {}", m.tx);
        assert!(m.ty.abs() < 1e-3, "ty = {}", m.ty);
    }

    #[test]
    fn test_scaled_transform() {
        // Source landmarks at 2x scale → a ≈ 0.5
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let m = SimilarityTransform::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert!((m.a - 0.5).abs() < 0.01, "a = {}, expected ~0.5", m.a);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let m = SimilarityTransform { a: 0.8, b: 0.3, tx: 12.0, ty: -7.0 };
        let inv = m.inverse().unwrap();
        let (x, y) = m.apply(40.0, 25.0);
        let (rx, ry) = inv.apply(x, y);
        assert!((rx - 40.0).abs() < 1e-3 && (ry - 25.0).abs() < 1e-3, "({rx}, {ry})");
    }

    #[test]
    fn test_degenerate_transform_has_no_inverse() {
        let m = SimilarityTransform { a: 0.0, b: 0.0, tx: 1.0, ty: 1.0 };
        assert!(m.inverse().is_none());
    }

    #[test]
    fn test_reference_landmarks_scale_to_128() {
        let pts = reference_landmarks(128);
        let ratio = 128.0 / 112.0;
        assert!((pts[0].0 - 38.2946 * ratio).abs() < 1e-4);
        assert!((pts[4].1 - 92.2041 * ratio).abs() < 1e-4);
    }

    #[test]
    fn test_align_face_output_size() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        let (crop, _) = align_face(&frame, &REFERENCE_LANDMARKS_112, 128);
        assert_eq!(crop.dimensions(), (128, 128));
    }

    #[test]
    fn test_landmark_lands_on_reference() {
        let mut frame = RgbImage::new(200, 200);
        let src_landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // 5x5 bright patch at the left eye (survives bilinear interpolation)
        for dy in 0..5u32 {
            for dx in 0..5u32 {
                frame.put_pixel(78 + dx, 58 + dy, Rgb([255, 255, 255]));
            }
        }

        let (aligned, _) = align_face(&frame, &src_landmarks, 112);

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as u32;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as u32;
        let mut max_val = 0u8;
        for y in ref_y - 1..=ref_y + 1 {
            for x in ref_x - 1..=ref_x + 1 {
                max_val = max_val.max(aligned.get_pixel(x, y).0[0]);
            }
        }
        assert!(max_val > 100, "expected bright patch near ({ref_x}, {ref_y}), max={max_val}");
    }

    #[test]
    fn test_paste_back_preserves_dimensions_and_outside_pixels() {
        let frame = RgbImage::from_pixel(300, 200, Rgb([10, 20, 30]));
        let crop = RgbImage::from_pixel(128, 128, Rgb([250, 250, 250]));
        // Crop covers frame region [100, 228) x [50, 178)
        let transform = SimilarityTransform { a: 1.0, b: 0.0, tx: -100.0, ty: -50.0 };

        let out = paste_back(&frame, &crop, &transform);

        assert_eq!(out.dimensions(), frame.dimensions());
        assert_eq!(out.get_pixel(5, 5), frame.get_pixel(5, 5));
        assert_eq!(out.get_pixel(299, 199), frame.get_pixel(299, 199));
        // Crop centre is fully weighted
        assert_eq!(out.get_pixel(164, 114), &Rgb([250, 250, 250]));
        // Crop edge is feathered back to the frame
        assert_eq!(out.get_pixel(100, 114), frame.get_pixel(100, 114));
    }

    #[test]
    fn test_paste_back_does_not_mutate_input() {
        let frame = RgbImage::from_pixel(64, 64, Rgb([1, 2, 3]));
        let before = frame.clone();
        let crop = RgbImage::from_pixel(32, 32, Rgb([200, 200, 200]));
        let _ = paste_back(&frame, &crop, &SimilarityTransform::IDENTITY);
        assert_eq!(frame, before);
    }
}
