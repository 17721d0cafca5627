//! Choosing which target face receives which source face.
//!
//! Two policies: explicit indices for still images, and nearest horizontal
//! position for video frames. Neither carries state between calls.

use crate::types::{DetectedFace, FaceSet};
use std::fmt;
use thiserror::Error;

/// Which side of a swap a face set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceRole {
    Source,
    Target,
}

impl fmt::Display for FaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaceRole::Source => f.write_str("source"),
            FaceRole::Target => f.write_str("target"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("{role} face index {index} not found: only {found} face(s) detected")]
    IndexOutOfRange {
        role: FaceRole,
        index: usize,
        found: usize,
    },
}

/// Pick `source[source_index]` and `target[target_index]`.
///
/// The source index is checked first.
pub fn select_indexed<'s, 't>(
    source: &'s FaceSet,
    target: &'t FaceSet,
    source_index: usize,
    target_index: usize,
) -> Result<(&'s DetectedFace, &'t DetectedFace), SelectionError> {
    let source_face = pick(source, FaceRole::Source, source_index)?;
    let target_face = pick(target, FaceRole::Target, target_index)?;
    Ok((source_face, target_face))
}

fn pick(set: &FaceSet, role: FaceRole, index: usize) -> Result<&DetectedFace, SelectionError> {
    set.get(index).ok_or(SelectionError::IndexOutOfRange {
        role,
        index,
        found: set.len(),
    })
}

/// The target face whose left edge is closest to the source face's left edge.
///
/// Ties go to the earliest (leftmost) face; `None` when `targets` is empty.
pub fn track_nearest<'t>(source: &DetectedFace, targets: &'t FaceSet) -> Option<&'t DetectedFace> {
    let anchor = source.bbox.left;
    let mut best: Option<(&DetectedFace, f32)> = None;

    for face in targets {
        let dist = (face.bbox.left - anchor).abs();
        // Strict comparison keeps the first face on ties.
        if best.map_or(true, |(_, d)| dist < d) {
            best = Some((face, dist));
        }
    }

    best.map(|(face, _)| face)
}
