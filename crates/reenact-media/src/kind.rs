//! Input validation and media kind detection.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("unsupported file type: {0} (images: png, jpg, jpeg, bmp, webp; videos: mp4, mov, avi, mkv)")]
    UnsupportedFormat(PathBuf),
    #[error("cannot decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("cannot write image {path}: {reason}")]
    Encode { path: PathBuf, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffprobe failed: {0}")]
    Probe(String),
    #[error("ffmpeg failed: {0}")]
    Ffmpeg(String),
    #[error("frame is {actual_width}x{actual_height}, stream expects {width}x{height}")]
    FrameSize {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },
}

/// What a path holds, judged by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv"];

impl MediaKind {
    /// Case-insensitive extension lookup; `None` for anything unrecognized.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// Fail with [`MediaError::FileNotFound`] unless `path` is an existing file.
pub fn require_file(path: &Path) -> Result<(), MediaError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(MediaError::FileNotFound(path.to_path_buf()))
    }
}

/// [`require_file`] plus a recognized extension.
pub fn require_media(path: &Path) -> Result<MediaKind, MediaError> {
    require_file(path)?;
    MediaKind::from_path(path).ok_or_else(|| MediaError::UnsupportedFormat(path.to_path_buf()))
}
