//! reenact-core: Face location, selection and swapping.
//!
//! Uses SCRFD for face detection, ArcFace for identity embeddings and
//! inswapper for the swap itself, all running via ONNX Runtime. The video
//! pipeline talks to decoders and encoders through the [`VideoSource`] and
//! [`VideoSink`] ports.

pub mod alignment;
pub mod detector;
pub mod locator;
pub mod onnx;
pub mod pipeline;
pub mod recognizer;
pub mod selector;
pub mod session;
pub mod still;
pub mod swapper;
pub mod types;

pub use locator::{FaceAnalyzer, FaceLocator, LocateError};
pub use pipeline::{
    FrameOutcome, FramePipeline, PipelineError, PipelineReport, PortError, ProgressUpdate,
    VideoMetadata, VideoSink, VideoSource,
};
pub use selector::{select_indexed, track_nearest, FaceRole, SelectionError};
pub use session::{Session, SessionCell, SessionError, SessionPaths};
pub use still::{swap_still, StillSwapError};
pub use swapper::{InSwapper, SwapError, SwapExecutor};
pub use types::{BoundingBox, DetectedFace, Embedding, FaceSet};
