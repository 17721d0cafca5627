//! Idempotent provisioning of the model directory.

use crate::catalog::ModelArtifact;
use crate::fetch::{FetchError, Fetcher};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("cannot create models directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Reports `(artifact name, downloaded bytes, total bytes)`.
pub type ProgressCallback = Box<dyn Fn(&str, u64, Option<u64>) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// Already on disk; nothing was fetched.
    Present,
    Downloaded { source: String },
    /// Every source failed; one message per attempted URL.
    Failed { errors: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactReport {
    pub name: String,
    pub path: PathBuf,
    pub required: bool,
    #[serde(flatten)]
    pub status: ArtifactStatus,
}

impl ArtifactReport {
    pub fn is_available(&self) -> bool {
        !matches!(self.status, ArtifactStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub artifacts: Vec<ArtifactReport>,
}

impl ProvisionReport {
    /// True iff every required artifact is on disk.
    pub fn success(&self) -> bool {
        self.missing_required().next().is_none()
    }

    pub fn missing_required(&self) -> impl Iterator<Item = &ArtifactReport> {
        self.artifacts.iter().filter(|a| a.required && !a.is_available())
    }

    pub fn downloaded(&self) -> usize {
        self.artifacts
            .iter()
            .filter(|a| matches!(a.status, ArtifactStatus::Downloaded { .. }))
            .count()
    }
}

pub fn artifact_path(dir: &Path, artifact: &ModelArtifact) -> PathBuf {
    dir.join(artifact.file_name)
}

/// A regular, non-empty file, matching the pinned digest if there is one.
pub fn is_present(path: &Path, artifact: &ModelArtifact) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => {}
        _ => return false,
    }

    match artifact.sha256 {
        None => true,
        Some(expected) => match file_sha256(path) {
            Ok(actual) if actual == expected => true,
            Ok(actual) => {
                tracing::warn!(
                    name = artifact.name,
                    expected,
                    actual = %actual,
                    "checksum mismatch, treating as corrupt"
                );
                false
            }
            Err(e) => {
                tracing::warn!(name = artifact.name, error = %e, "cannot hash model file");
                false
            }
        },
    }
}

/// `(artifact, present)` for each catalog entry.
pub fn list_models<'c>(dir: &Path, catalog: &'c [ModelArtifact]) -> Vec<(&'c ModelArtifact, bool)> {
    catalog
        .iter()
        .map(|a| (a, is_present(&artifact_path(dir, a), a)))
        .collect()
}

/// Make every artifact of `catalog` present in `dir`.
///
/// Artifacts already present are skipped without any request. Missing ones
/// are fetched from the primary URL, then from each fallback in order. A
/// failed artifact does not stop the others; check
/// [`ProvisionReport::success`] for the outcome.
pub fn ensure_models(
    dir: &Path,
    catalog: &[ModelArtifact],
    fetcher: &dyn Fetcher,
    progress: Option<&ProgressCallback>,
) -> Result<ProvisionReport, ProvisionError> {
    fs::create_dir_all(dir).map_err(|source| ProvisionError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut report = ProvisionReport::default();
    for artifact in catalog {
        let path = artifact_path(dir, artifact);
        let status = if is_present(&path, artifact) {
            tracing::debug!(name = artifact.name, "model already present");
            ArtifactStatus::Present
        } else {
            download_artifact(artifact, &path, fetcher, progress)
        };

        if let ArtifactStatus::Failed { errors } = &status {
            log_manual_instructions(artifact, &path, errors);
        }

        report.artifacts.push(ArtifactReport {
            name: artifact.name.to_string(),
            path,
            required: artifact.required,
            status,
        });
    }

    tracing::info!(
        downloaded = report.downloaded(),
        success = report.success(),
        "model provisioning finished"
    );
    Ok(report)
}

fn download_artifact(
    artifact: &ModelArtifact,
    path: &Path,
    fetcher: &dyn Fetcher,
    progress: Option<&ProgressCallback>,
) -> ArtifactStatus {
    let mut errors = Vec::new();

    for url in artifact.sources() {
        tracing::info!(name = artifact.name, url, "downloading model");
        match download_from(artifact, url, path, fetcher, progress) {
            Ok(bytes) => {
                tracing::info!(name = artifact.name, bytes, "downloaded model");
                return ArtifactStatus::Downloaded {
                    source: url.to_string(),
                };
            }
            Err(e) => {
                tracing::warn!(name = artifact.name, url, error = %e, "download failed");
                errors.push(format!("{url}: {e}"));
            }
        }
    }

    ArtifactStatus::Failed { errors }
}

#[derive(Error, Debug)]
enum AttemptError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("empty response body")]
    Empty,
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Checksum { expected: String, actual: String },
}

/// Fetch into `<file>.part`, verify, then rename over `path`.
fn download_from(
    artifact: &ModelArtifact,
    url: &str,
    path: &Path,
    fetcher: &dyn Fetcher,
    progress: Option<&ProgressCallback>,
) -> Result<u64, AttemptError> {
    let part = part_path(path);
    let result = fetch_verified(artifact, url, &part, fetcher, progress);
    match result {
        Ok(bytes) => {
            fs::rename(&part, path)?;
            Ok(bytes)
        }
        Err(e) => {
            let _ = fs::remove_file(&part);
            Err(e)
        }
    }
}

fn fetch_verified(
    artifact: &ModelArtifact,
    url: &str,
    part: &Path,
    fetcher: &dyn Fetcher,
    progress: Option<&ProgressCallback>,
) -> Result<u64, AttemptError> {
    let mut writer = BufWriter::new(File::create(part)?);
    let mut on_bytes = |downloaded: u64, total: Option<u64>| {
        if let Some(cb) = progress {
            cb(artifact.name, downloaded, total);
        }
    };
    let bytes = fetcher.fetch(url, &mut writer, &mut on_bytes)?;
    writer.flush()?;
    drop(writer);

    if bytes == 0 {
        return Err(AttemptError::Empty);
    }
    if let Some(expected) = artifact.sha256 {
        let actual = file_sha256(part)?;
        if actual != expected {
            return Err(AttemptError::Checksum {
                expected: expected.to_string(),
                actual,
            });
        }
    }
    Ok(bytes)
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

fn file_sha256(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut file = File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn log_manual_instructions(artifact: &ModelArtifact, path: &Path, errors: &[String]) {
    if artifact.required {
        tracing::error!(
            name = artifact.name,
            attempts = errors.len(),
            "could not download required model; download it manually from {} and save it as {}",
            artifact.manual_url,
            path.display()
        );
    } else {
        tracing::warn!(
            name = artifact.name,
            attempts = errors.len(),
            "optional model unavailable; it can be downloaded manually from {} to {}",
            artifact.manual_url,
            path.display()
        );
    }
}
