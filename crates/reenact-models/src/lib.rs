//! reenact-models: Model artifact provisioning.
//!
//! Keeps the models directory populated: each catalog entry is checked on
//! disk and, when missing or corrupt, downloaded from its primary URL or one
//! of its mirrors.

pub mod catalog;
pub mod fetch;
pub mod provision;

pub use catalog::{ModelArtifact, DEFAULT_CATALOG};
pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use provision::{
    artifact_path, ensure_models, is_present, list_models, ArtifactReport, ArtifactStatus,
    ProgressCallback, ProvisionError, ProvisionReport,
};
