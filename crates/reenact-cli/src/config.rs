use reenact_core::detector::DEFAULT_DETECTION_SIZE;
use reenact_core::SessionPaths;
use reenact_media::{FfmpegTools, DEFAULT_VIDEO_CODEC};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Runtime configuration.
///
/// Layered lowest to highest: defaults, TOML file (`--config` or
/// `REENACT_CONFIG`), `REENACT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the model files.
    pub model_dir: PathBuf,
    /// Square detector input size, multiple of 32.
    pub detection_size: usize,
    /// Raw 512×512 f32 file overriding the projection embedded in the swap model.
    pub emap_path: Option<PathBuf>,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    /// ffmpeg encoder name for video output.
    pub video_codec: String,
    /// Fetch missing required models before swapping.
    pub auto_download: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            detection_size: DEFAULT_DETECTION_SIZE,
            emap_path: None,
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            video_codec: DEFAULT_VIDEO_CODEC.to_string(),
            auto_download: true,
        }
    }
}

impl Config {
    /// Load from `file` (or `REENACT_CONFIG` when `file` is `None`), then
    /// apply environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let file = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("REENACT_CONFIG").map(PathBuf::from));

        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Override fields from `REENACT_*` variables as returned by `lookup`.
    /// Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("REENACT_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parsed(&lookup, "REENACT_DET_SIZE") {
            self.detection_size = v;
        }
        if let Some(v) = lookup("REENACT_EMAP_PATH") {
            self.emap_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = lookup("REENACT_FFMPEG") {
            self.ffmpeg = PathBuf::from(v);
        }
        if let Some(v) = lookup("REENACT_FFPROBE") {
            self.ffprobe = PathBuf::from(v);
        }
        if let Some(v) = lookup("REENACT_VIDEO_CODEC") {
            self.video_codec = v;
        }
        if let Some(v) = lookup("REENACT_AUTO_DOWNLOAD") {
            self.auto_download = v != "0" && !v.eq_ignore_ascii_case("false");
        }
    }

    pub fn session_paths(&self) -> SessionPaths {
        SessionPaths {
            emap: self.emap_path.clone(),
            detection_size: self.detection_size,
            ..SessionPaths::in_dir(&self.model_dir)
        }
    }

    pub fn ffmpeg_tools(&self) -> FfmpegTools {
        FfmpegTools {
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
            codec: self.video_codec.clone(),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
