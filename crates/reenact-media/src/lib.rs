//! reenact-media: Media I/O for the swap pipeline.
//!
//! Still images are decoded and encoded with the `image` crate. Videos are
//! streamed through `ffmpeg` subprocesses and exposed as the core
//! [`VideoSource`](reenact_core::VideoSource) and
//! [`VideoSink`](reenact_core::VideoSink) ports.

pub mod image_io;
pub mod kind;
pub mod video;

pub use image_io::{load_image, normalize_output_path, save_output};
pub use kind::{require_file, require_media, MediaError, MediaKind};
pub use video::{probe, FfmpegReader, FfmpegTools, FfmpegWriter, DEFAULT_VIDEO_CODEC};
