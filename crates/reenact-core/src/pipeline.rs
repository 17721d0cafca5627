//! Video frame pipeline.
//!
//! Runs a fixed source face across every frame of a video: locate faces,
//! pick the target face nearest the source face's horizontal position, swap,
//! write. A frame whose detection or swap fails is written unchanged and the
//! run continues; only I/O on the video streams themselves is fatal.

use crate::locator::{FaceLocator, LocateError};
use crate::selector;
use crate::swapper::{SwapError, SwapExecutor};
use crate::types::DetectedFace;
use image::RgbImage;
use thiserror::Error;

/// Error type carried across the video I/O ports.
pub type PortError = Box<dyn std::error::Error + Send + Sync>;

/// Stream properties of an input video.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Frame count declared by the container; 0 when unknown. Used for
    /// progress reporting only.
    pub total_frames: usize,
}

/// Decoded frames of an input video, in order.
pub trait VideoSource {
    fn metadata(&self) -> &VideoMetadata;

    /// The next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, PortError>;
}

/// Encoder for the output video.
pub trait VideoSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), PortError>;

    /// Flush and close the output.
    fn finish(&mut self) -> Result<(), PortError>;
}

/// Which stream operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoStage {
    OpenInput,
    OpenOutput,
    Read,
    Write,
    Finish,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no face detected in source image")]
    NoFaceDetected,
    #[error("source face detection failed: {0}")]
    SourceDetection(#[from] LocateError),
    #[error("video {stage:?} failed: {source}")]
    Video {
        stage: VideoStage,
        #[source]
        source: PortError,
    },
}

impl PipelineError {
    fn video(stage: VideoStage) -> impl FnOnce(PortError) -> Self {
        move |source| PipelineError::Video { stage, source }
    }
}

/// Why a single frame was passed through unmodified.
#[derive(Error, Debug)]
pub enum FrameFailure {
    #[error("detection: {0}")]
    Detection(#[from] LocateError),
    #[error("swap: {0}")]
    Swap(#[from] SwapError),
}

/// What happened to one frame.
#[derive(Debug)]
pub enum FrameOutcome {
    /// The tracked face was swapped.
    Swapped(RgbImage),
    /// No face in the frame; written unchanged.
    NoFaceInFrame,
    /// Detection or swap failed; written unchanged.
    Failed(FrameFailure),
}

/// Progress after a frame has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Frames written so far.
    pub current: usize,
    /// Declared frame count of the input (0 when unknown).
    pub total: usize,
}

/// Per-run frame counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub frames: usize,
    pub swapped: usize,
    pub no_face: usize,
    pub failed: usize,
    /// Indices of frames whose detection or swap failed.
    pub failed_frames: Vec<usize>,
}

impl PipelineReport {
    fn record(&mut self, index: usize, outcome: &FrameOutcome) {
        self.frames += 1;
        match outcome {
            FrameOutcome::Swapped(_) => self.swapped += 1,
            FrameOutcome::NoFaceInFrame => self.no_face += 1,
            FrameOutcome::Failed(_) => {
                self.failed += 1;
                self.failed_frames.push(index);
            }
        }
    }
}

/// Face swap over a frame sequence, borrowing the models for one run.
pub struct FramePipeline<'a> {
    locator: &'a dyn FaceLocator,
    swapper: &'a dyn SwapExecutor,
}

impl<'a> FramePipeline<'a> {
    pub fn new(locator: &'a dyn FaceLocator, swapper: &'a dyn SwapExecutor) -> Self {
        Self { locator, swapper }
    }

    /// Swap the first face of `source_image` into every frame of a video.
    ///
    /// The source face is located before either stream is opened, so a
    /// source without faces fails with [`PipelineError::NoFaceDetected`]
    /// and creates no output. `open_sink` receives the input metadata to
    /// match frame rate and size. The sink is finished on every path once
    /// opened.
    pub fn run<Src, Snk>(
        &self,
        source_image: &RgbImage,
        open_source: impl FnOnce() -> Result<Src, PortError>,
        open_sink: impl FnOnce(&VideoMetadata) -> Result<Snk, PortError>,
        mut progress: impl FnMut(ProgressUpdate),
    ) -> Result<PipelineReport, PipelineError>
    where
        Src: VideoSource,
        Snk: VideoSink,
    {
        let source_faces = self.locator.detect(source_image)?;
        let source_face = source_faces.first().ok_or(PipelineError::NoFaceDetected)?;

        let mut video = open_source().map_err(PipelineError::video(VideoStage::OpenInput))?;
        let metadata = video.metadata().clone();
        tracing::info!(
            fps = metadata.fps,
            width = metadata.width,
            height = metadata.height,
            declared_frames = metadata.total_frames,
            "processing video"
        );
        let mut sink = open_sink(&metadata).map_err(PipelineError::video(VideoStage::OpenOutput))?;

        let looped = self.process_frames(source_face, &mut video, &mut sink, metadata.total_frames, &mut progress);
        let finished = sink.finish().map_err(PipelineError::video(VideoStage::Finish));

        let report = looped?;
        finished?;

        tracing::info!(
            frames = report.frames,
            swapped = report.swapped,
            no_face = report.no_face,
            failed = report.failed,
            "video complete"
        );
        Ok(report)
    }

    fn process_frames<Src: VideoSource, Snk: VideoSink>(
        &self,
        source_face: &DetectedFace,
        video: &mut Src,
        sink: &mut Snk,
        total: usize,
        progress: &mut impl FnMut(ProgressUpdate),
    ) -> Result<PipelineReport, PipelineError> {
        let mut report = PipelineReport::default();

        // Iterate to end of stream; the declared count may be wrong.
        while let Some(frame) = video.next_frame().map_err(PipelineError::video(VideoStage::Read))? {
            let index = report.frames;
            let outcome = self.process_frame(source_face, &frame);

            let written = match &outcome {
                FrameOutcome::Swapped(swapped) => swapped,
                FrameOutcome::NoFaceInFrame => &frame,
                FrameOutcome::Failed(err) => {
                    tracing::warn!(frame = index, error = %err, "frame passed through unmodified");
                    &frame
                }
            };
            sink.write_frame(written).map_err(PipelineError::video(VideoStage::Write))?;

            report.record(index, &outcome);
            progress(ProgressUpdate { current: report.frames, total });
        }

        Ok(report)
    }

    /// Locate, track and swap within one frame.
    pub fn process_frame(&self, source_face: &DetectedFace, frame: &RgbImage) -> FrameOutcome {
        let targets = match self.locator.detect(frame) {
            Ok(faces) => faces,
            Err(err) => return FrameOutcome::Failed(err.into()),
        };

        let Some(target_face) = selector::track_nearest(source_face, &targets) else {
            return FrameOutcome::NoFaceInFrame;
        };

        match self.swapper.swap(frame, target_face, source_face) {
            Ok(swapped) => FrameOutcome::Swapped(swapped),
            Err(err) => FrameOutcome::Failed(err.into()),
        }
    }
}
