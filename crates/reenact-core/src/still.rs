//! Single-image face swap with explicit face indices.

use crate::locator::{FaceLocator, LocateError};
use crate::selector::{self, SelectionError};
use crate::swapper::{SwapError, SwapExecutor};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StillSwapError {
    #[error("no face detected in source image")]
    NoFaceDetected,
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("face detection failed: {0}")]
    Detection(#[from] LocateError),
    #[error("face swap failed: {0}")]
    Swap(#[from] SwapError),
}

/// Swap face `source_index` of `source` onto face `target_index` of `target`.
///
/// Faces are indexed left to right. Returns a new image; `target` is not
/// modified.
pub fn swap_still(
    locator: &dyn FaceLocator,
    swapper: &dyn SwapExecutor,
    source: &RgbImage,
    target: &RgbImage,
    source_index: usize,
    target_index: usize,
) -> Result<RgbImage, StillSwapError> {
    let source_faces = locator.detect(source)?;
    if source_faces.is_empty() {
        return Err(StillSwapError::NoFaceDetected);
    }
    let target_faces = locator.detect(target)?;

    let (source_face, target_face) =
        selector::select_indexed(&source_faces, &target_faces, source_index, target_index)?;

    tracing::debug!(
        source_index,
        target_index,
        source_faces = source_faces.len(),
        target_faces = target_faces.len(),
        "swapping still image"
    );

    Ok(swapper.swap(target, target_face, source_face)?)
}
