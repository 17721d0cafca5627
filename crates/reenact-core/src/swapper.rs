//! inswapper face swap via ONNX Runtime.
//!
//! The target face is aligned to a 128×128 crop, the model renders the source
//! identity into it, and the crop is composited back into a copy of the frame.

use crate::alignment;
use crate::onnx;
use crate::recognizer::ARCFACE_EMBEDDING_DIM;
use crate::types::DetectedFace;
use image::{Rgb, RgbImage};
use ndarray::{Array2, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

const INSWAPPER_INPUT_SIZE: u32 = 128;
/// Name of the identity projection inside inswapper exports; older exports
/// leave it unnamed as the graph's last initializer.
const EMAP_INITIALIZER: &str = "emap";

#[derive(Error, Debug)]
pub enum SwapError {
    #[error("model file not found: {0}; run `reenact models fetch` or place it in the models directory")]
    ModelNotFound(String),
    #[error("{0} face has no landmarks")]
    NoLandmarks(&'static str),
    #[error("source face has no identity embedding")]
    NoEmbedding,
    #[error("invalid emap in {path}: {reason}")]
    InvalidEmap { path: String, reason: String },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Renders the identity of `source` onto `target` within `frame`.
///
/// Implementations never modify `frame`; the result has the frame's
/// dimensions.
pub trait SwapExecutor: Send + Sync {
    fn swap(
        &self,
        frame: &RgbImage,
        target: &DetectedFace,
        source: &DetectedFace,
    ) -> Result<RgbImage, SwapError>;
}

/// The inswapper_128 model.
pub struct InSwapper {
    session: Mutex<Session>,
    /// Projection from ArcFace space into the model's identity latent space.
    emap: Array2<f32>,
}

impl InSwapper {
    /// Load the model. The emap comes from `emap_path` when given, else from
    /// the model file itself; loading fails when neither yields a 512×512
    /// projection.
    pub fn load(model_path: &Path, emap_path: Option<&Path>) -> Result<Self, SwapError> {
        if !model_path.exists() {
            return Err(SwapError::ModelNotFound(model_path.display().to_string()));
        }

        let emap = match emap_path {
            Some(path) => load_emap(path)?,
            None => emap_from_model(model_path)?,
        };

        let session = Session::builder()?
            .with_intra_threads(4)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            emap = %emap_path.map_or("embedded".into(), |p| p.display().to_string()),
            "loaded inswapper model"
        );

        Ok(Self {
            session: Mutex::new(session),
            emap,
        })
    }

    /// Source identity latent: `normalize(embedding · emap)`.
    fn source_latent(&self, source: &DetectedFace) -> Result<Array2<f32>, SwapError> {
        let embedding = source.embedding.as_ref().ok_or(SwapError::NoEmbedding)?;
        if embedding.dim() != ARCFACE_EMBEDDING_DIM {
            return Err(SwapError::InferenceFailed(format!(
                "source embedding has {} dims, expected {ARCFACE_EMBEDDING_DIM}",
                embedding.dim()
            )));
        }

        identity_latent(&embedding.values, &self.emap)
    }
}

impl SwapExecutor for InSwapper {
    fn swap(
        &self,
        frame: &RgbImage,
        target: &DetectedFace,
        source: &DetectedFace,
    ) -> Result<RgbImage, SwapError> {
        let landmarks = target.landmarks.as_ref().ok_or(SwapError::NoLandmarks("target"))?;
        let latent = self.source_latent(source)?;

        let (crop, transform) = alignment::align_face(frame, landmarks, INSWAPPER_INPUT_SIZE);
        let input = crop_to_tensor(&crop);

        let swapped = {
            let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            let outputs = session.run(ort::inputs![
                "target" => TensorRef::from_array_view(input.view())?,
                "source" => TensorRef::from_array_view(latent.view())?
            ])?;
            let (_, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| SwapError::InferenceFailed(format!("swap output: {e}")))?;
            tensor_to_crop(data, INSWAPPER_INPUT_SIZE)?
        };

        Ok(alignment::paste_back(frame, &swapped, &transform))
    }
}

/// Read a 512×512 emap stored as raw little-endian f32, row-major.
pub fn load_emap(path: &Path) -> Result<Array2<f32>, SwapError> {
    let invalid = |reason: String| SwapError::InvalidEmap {
        path: path.display().to_string(),
        reason,
    };

    let bytes = std::fs::read(path).map_err(|e| invalid(e.to_string()))?;
    let expected = ARCFACE_EMBEDDING_DIM * ARCFACE_EMBEDDING_DIM * 4;
    if bytes.len() != expected {
        return Err(invalid(format!("expected {expected} bytes, got {}", bytes.len())));
    }

    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Array2::from_shape_vec((ARCFACE_EMBEDDING_DIM, ARCFACE_EMBEDDING_DIM), values)
        .map_err(|e| invalid(e.to_string()))
}

/// Pull the emap initializer out of an inswapper ONNX file.
pub fn emap_from_model(model_path: &Path) -> Result<Array2<f32>, SwapError> {
    let invalid = |reason: String| SwapError::InvalidEmap {
        path: model_path.display().to_string(),
        reason,
    };

    let tensor = onnx::read_initializer(model_path, EMAP_INITIALIZER).map_err(|e| invalid(e.to_string()))?;
    if tensor.dims != [ARCFACE_EMBEDDING_DIM, ARCFACE_EMBEDDING_DIM] {
        return Err(invalid(format!(
            "initializer {} has shape {:?}, expected [{ARCFACE_EMBEDDING_DIM}, {ARCFACE_EMBEDDING_DIM}]",
            tensor.name, tensor.dims
        )));
    }
    Array2::from_shape_vec((ARCFACE_EMBEDDING_DIM, ARCFACE_EMBEDDING_DIM), tensor.values)
        .map_err(|e| invalid(e.to_string()))
}

fn identity_latent(embedding: &[f32], emap: &Array2<f32>) -> Result<Array2<f32>, SwapError> {
    let row = Array2::from_shape_vec((1, embedding.len()), embedding.to_vec())
        .map_err(|e| SwapError::InferenceFailed(e.to_string()))?;
    Ok(normalize_rows(row.dot(emap)))
}

fn normalize_rows(mut latent: Array2<f32>) -> Array2<f32> {
    for mut row in latent.rows_mut() {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|v| v / norm);
        }
    }
    latent
}

/// RGB crop → `[1, 3, H, W]` tensor in `[0, 1]`.
fn crop_to_tensor(crop: &RgbImage) -> Array4<f32> {
    let (w, h) = (crop.width() as usize, crop.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / 255.0;
        }
    }
    tensor
}

/// `[1, 3, size, size]` output in `[0, 1]` → RGB crop.
fn tensor_to_crop(data: &[f32], size: u32) -> Result<RgbImage, SwapError> {
    let plane = (size * size) as usize;
    if data.len() != 3 * plane {
        return Err(SwapError::InferenceFailed(format!(
            "expected {} output values, got {}",
            3 * plane,
            data.len()
        )));
    }

    Ok(RgbImage::from_fn(size, size, |x, y| {
        let idx = (y * size + x) as usize;
        Rgb(std::array::from_fn(|c| {
            (data[c * plane + idx] * 255.0).round().clamp(0.0, 255.0) as u8
        }))
    }))
}
