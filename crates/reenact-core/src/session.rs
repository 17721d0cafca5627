//! Loaded model bundle and its once-per-process construction.

use crate::detector::DEFAULT_DETECTION_SIZE;
use crate::locator::{FaceAnalyzer, FaceLocator, LocateError};
use crate::pipeline::FramePipeline;
use crate::swapper::{InSwapper, SwapError, SwapExecutor};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";
pub const SWAP_MODEL_FILE: &str = "inswapper_128.onnx";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to load face analysis models: {0}")]
    Locator(#[from] LocateError),
    #[error("failed to load swap model: {0}")]
    Swapper(#[from] SwapError),
}

/// Model files a [`Session`] is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
    pub swapper: PathBuf,
    pub emap: Option<PathBuf>,
    /// Square detection input size (multiple of 32).
    pub detection_size: usize,
}

impl SessionPaths {
    /// Standard file names inside `model_dir`.
    pub fn in_dir(model_dir: &Path) -> Self {
        Self {
            detector: model_dir.join(DETECTOR_MODEL_FILE),
            recognizer: model_dir.join(RECOGNIZER_MODEL_FILE),
            swapper: model_dir.join(SWAP_MODEL_FILE),
            emap: None,
            detection_size: DEFAULT_DETECTION_SIZE,
        }
    }
}

/// Detector, recognizer and swap model, loaded once and shared read-only.
pub struct Session {
    analyzer: FaceAnalyzer,
    swapper: InSwapper,
}

impl Session {
    pub fn load(paths: &SessionPaths) -> Result<Self, SessionError> {
        let analyzer = FaceAnalyzer::load(&paths.detector, &paths.recognizer, paths.detection_size)?;
        let swapper = InSwapper::load(&paths.swapper, paths.emap.as_deref())?;
        tracing::info!("session ready");
        Ok(Self { analyzer, swapper })
    }

    pub fn locator(&self) -> &dyn FaceLocator {
        &self.analyzer
    }

    pub fn swapper(&self) -> &dyn SwapExecutor {
        &self.swapper
    }

    pub fn pipeline(&self) -> FramePipeline<'_> {
        FramePipeline::new(&self.analyzer, &self.swapper)
    }
}

/// Lazily built shared value with exactly-once construction.
///
/// Concurrent first callers serialize on a mutex; one runs `init`, the rest
/// observe its finished result. Reads after construction do not lock. A
/// failed `init` leaves the cell empty so a later call can try again.
pub struct SessionCell<T> {
    value: OnceLock<Arc<T>>,
    init_lock: Mutex<()>,
}

impl<T> SessionCell<T> {
    pub const fn new() -> Self {
        Self {
            value: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// The value if already constructed.
    pub fn get(&self) -> Option<Arc<T>> {
        self.value.get().cloned()
    }

    pub fn get_or_try_init<E>(&self, init: impl FnOnce() -> Result<T, E>) -> Result<Arc<T>, E> {
        if let Some(value) = self.value.get() {
            return Ok(Arc::clone(value));
        }

        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = self.value.get() {
            return Ok(Arc::clone(value));
        }

        let value = Arc::new(init()?);
        // Only the lock holder sets the cell, so this cannot already be filled.
        let _ = self.value.set(Arc::clone(&value));
        Ok(value)
    }
}

impl<T> Default for SessionCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_paths_in_dir() {
        let paths = SessionPaths::in_dir(Path::new("models"));
        assert_eq!(paths.swapper, Path::new("models/inswapper_128.onnx"));
        assert_eq!(paths.detector, Path::new("models/det_10g.onnx"));
        assert_eq!(paths.detection_size, 640);
        assert!(paths.emap.is_none());
    }

    #[test]
    fn test_cell_returns_same_instance() {
        let cell = SessionCell::new();
        let a = cell.get_or_try_init(|| Ok::<_, ()>(String::from("session"))).unwrap();
        let b = cell.get_or_try_init(|| Ok::<_, ()>(String::from("other"))).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*b, "session");
    }

    #[test]
    fn test_cell_concurrent_init_runs_once() {
        let cell = Arc::new(SessionCell::new());
        let inits = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cell = Arc::clone(&cell);
                let inits = Arc::clone(&inits);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cell.get_or_try_init(|| {
                        inits.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        Ok::<_, ()>(vec![1u8, 2, 3])
                    })
                    .unwrap()
                })
            })
            .collect();

        let values: Vec<Arc<Vec<u8>>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
        assert_eq!(*values[0], vec![1, 2, 3]);
    }

    #[test]
    fn test_cell_failed_init_can_retry() {
        let cell: SessionCell<u32> = SessionCell::new();
        let err = cell.get_or_try_init(|| Err("models missing")).unwrap_err();
        assert_eq!(err, "models missing");
        assert!(cell.get().is_none());

        let value = cell.get_or_try_init(|| Ok::<_, &str>(7)).unwrap();
        assert_eq!(*value, 7);
        assert!(cell.get().is_some());
    }

    #[test]
    fn test_session_load_reports_missing_models() {
        let dir = tempfile::tempdir().unwrap();
        let err = Session::load(&SessionPaths::in_dir(dir.path())).err();
        assert!(matches!(err, Some(SessionError::Locator(_))));
    }
}
