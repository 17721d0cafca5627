//! Face location: detection plus identity embedding, returned as a [`FaceSet`].

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::FaceSet;
use image::RgbImage;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("detection failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedding failed: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Finds the faces of one image.
///
/// Implementations return faces sorted left to right and an empty set (not
/// an error) when the image has no face.
pub trait FaceLocator: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<FaceSet, LocateError>;
}

/// SCRFD detection followed by ArcFace embedding of every detected face.
pub struct FaceAnalyzer {
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
}

impl FaceAnalyzer {
    pub fn load(detector_path: &Path, recognizer_path: &Path, detection_size: usize) -> Result<Self, LocateError> {
        let detector = FaceDetector::load(detector_path, detection_size)?;
        let recognizer = FaceRecognizer::load(recognizer_path)?;
        Ok(Self::new(detector, recognizer))
    }

    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
        }
    }
}

impl FaceLocator for FaceAnalyzer {
    fn detect(&self, image: &RgbImage) -> Result<FaceSet, LocateError> {
        let mut faces = self
            .detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .detect(image)?;

        if !faces.is_empty() {
            let mut recognizer = self.recognizer.lock().unwrap_or_else(PoisonError::into_inner);
            for face in &mut faces {
                face.embedding = Some(recognizer.extract(image, face.landmarks.as_ref())?);
            }
        }

        tracing::trace!(count = faces.len(), "faces located");
        Ok(FaceSet::from_detections(faces))
    }
}
