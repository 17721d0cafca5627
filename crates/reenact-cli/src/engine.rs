use reenact_core::{
    swap_still, DetectedFace, FaceLocator, LocateError, PipelineError, PipelineReport, PortError,
    ProgressUpdate, Session, SessionCell, SessionError, SessionPaths, StillSwapError,
};
use reenact_media::{load_image, save_output, FfmpegReader, FfmpegTools, FfmpegWriter, MediaError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Still(#[from] StillSwapError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Locate(#[from] LocateError),
    #[error("cannot start engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of a finished video swap.
pub struct VideoOutcome {
    pub output: PathBuf,
    pub report: PipelineReport,
}

/// Messages sent from the CLI to the engine thread.
enum EngineRequest {
    SwapStill {
        source: PathBuf,
        target: PathBuf,
        output: PathBuf,
        source_index: usize,
        target_index: usize,
        reply: oneshot::Sender<Result<PathBuf, EngineError>>,
    },
    SwapVideo {
        source: PathBuf,
        target: PathBuf,
        output: PathBuf,
        progress: mpsc::UnboundedSender<ProgressUpdate>,
        reply: oneshot::Sender<Result<VideoOutcome, EngineError>>,
    },
    Faces {
        image: PathBuf,
        reply: oneshot::Sender<Result<Vec<DetectedFace>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Swap face `source_index` of `source` onto face `target_index` of
    /// `target`; returns the path actually written.
    pub async fn swap_still(
        &self,
        source: PathBuf,
        target: PathBuf,
        output: PathBuf,
        source_index: usize,
        target_index: usize,
    ) -> Result<PathBuf, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::SwapStill {
                source,
                target,
                output,
                source_index,
                target_index,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Swap the first face of `source` through every frame of `target`.
    /// Frame progress is sent on `progress` as frames are written.
    pub async fn swap_video(
        &self,
        source: PathBuf,
        target: PathBuf,
        output: PathBuf,
        progress: mpsc::UnboundedSender<ProgressUpdate>,
    ) -> Result<VideoOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::SwapVideo {
                source,
                target,
                output,
                progress,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Faces of `image`, left to right.
    pub async fn faces(&self, image: PathBuf) -> Result<Vec<DetectedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Faces {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Everything the engine thread owns.
struct Engine {
    paths: SessionPaths,
    tools: FfmpegTools,
    session: SessionCell<Session>,
}

impl Engine {
    /// Models are loaded on the first request that needs them. A failed load
    /// is reported to that request and retried on the next one.
    fn session(&self) -> Result<Arc<Session>, SessionError> {
        self.session.get_or_try_init(|| {
            tracing::info!(
                detector = %self.paths.detector.display(),
                swapper = %self.paths.swapper.display(),
                "loading models"
            );
            Session::load(&self.paths)
        })
    }

    fn swap_still(
        &self,
        source: &Path,
        target: &Path,
        output: &Path,
        source_index: usize,
        target_index: usize,
    ) -> Result<PathBuf, EngineError> {
        let source_image = load_image(source)?;
        let target_image = load_image(target)?;
        let session = self.session()?;

        let swapped = swap_still(
            session.locator(),
            session.swapper(),
            &source_image,
            &target_image,
            source_index,
            target_index,
        )?;
        Ok(save_output(&swapped, output)?)
    }

    fn swap_video(
        &self,
        source: &Path,
        target: &Path,
        output: &Path,
        progress: &mpsc::UnboundedSender<ProgressUpdate>,
    ) -> Result<VideoOutcome, EngineError> {
        let source_image = load_image(source)?;
        let session = self.session()?;

        let report = session.pipeline().run(
            &source_image,
            || FfmpegReader::open(&self.tools, target).map_err(PortError::from),
            |metadata| FfmpegWriter::create(&self.tools, output, metadata).map_err(PortError::from),
            |update| {
                // The receiver may be gone if the caller stopped rendering.
                let _ = progress.send(update);
            },
        )?;

        Ok(VideoOutcome {
            output: output.to_path_buf(),
            report,
        })
    }

    fn faces(&self, image: &Path) -> Result<Vec<DetectedFace>, EngineError> {
        let decoded = load_image(image)?;
        let session = self.session()?;
        let faces = session.locator().detect(&decoded)?;
        Ok(faces.iter().cloned().collect())
    }

    fn handle(&self, request: EngineRequest) {
        match request {
            EngineRequest::SwapStill {
                source,
                target,
                output,
                source_index,
                target_index,
                reply,
            } => {
                let result = self.swap_still(&source, &target, &output, source_index, target_index);
                log_failure("swap image", &result);
                let _ = reply.send(result);
            }
            EngineRequest::SwapVideo {
                source,
                target,
                output,
                progress,
                reply,
            } => {
                let result = self.swap_video(&source, &target, &output, &progress);
                log_failure("swap video", &result);
                let _ = reply.send(result);
            }
            EngineRequest::Faces { image, reply } => {
                let result = self.faces(&image);
                log_failure("faces", &result);
                let _ = reply.send(result);
            }
        }
    }
}

fn log_failure<T>(operation: &str, result: &Result<T, EngineError>) {
    if let Err(e) = result {
        tracing::debug!(operation, error = %e, "request failed");
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Requests are handled one at a time in arrival order. Models are loaded
/// lazily by the first request, so spawning never touches the model files.
pub fn spawn_engine(paths: SessionPaths, tools: FfmpegTools) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let engine = Engine {
        paths,
        tools,
        session: SessionCell::new(),
    };

    std::thread::Builder::new()
        .name("reenact-engine".into())
        .spawn(move || {
            tracing::debug!("engine thread started");
            while let Some(request) = rx.blocking_recv() {
                engine.handle(request);
            }
            tracing::debug!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
