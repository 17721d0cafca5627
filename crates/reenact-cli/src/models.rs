//! `reenact models`: manage model files.

use crate::config::Config;
use crate::progress;
use anyhow::{Context, Result};
use clap::Subcommand;
use reenact_models::{ensure_models, list_models, HttpFetcher, ProvisionReport, DEFAULT_CATALOG};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum ModelsCommand {
    /// Download missing models
    Fetch,
    /// List models and whether they are installed
    List,
    /// Print the models directory
    Path,
}

pub async fn run(command: &ModelsCommand, config: &Config) -> Result<()> {
    match command {
        ModelsCommand::Fetch => {
            let report = fetch(config.model_dir.clone()).await?;
            if !report.success() {
                anyhow::bail!("{}", missing_message(&report));
            }
            println!(
                "Models ready in {} ({} downloaded)",
                config.model_dir.display(),
                report.downloaded()
            );
            Ok(())
        }
        ModelsCommand::List => {
            list(config);
            Ok(())
        }
        ModelsCommand::Path => {
            println!("{}", config.model_dir.display());
            Ok(())
        }
    }
}

/// Download missing models into `dir` with a progress bar.
///
/// Runs on the blocking pool; the HTTP client is synchronous.
pub async fn fetch(dir: PathBuf) -> Result<ProvisionReport> {
    let (pb, callback) = progress::download_bar()?;

    let report = tokio::task::spawn_blocking(move || {
        let fetcher = HttpFetcher::new()?;
        let report = ensure_models(&dir, DEFAULT_CATALOG, &fetcher, Some(&callback))?;
        anyhow::Ok(report)
    })
    .await
    .context("download task panicked")??;

    pb.finish_and_clear();
    Ok(report)
}

/// Error text naming each missing required model and where to get it.
pub fn missing_message(report: &ProvisionReport) -> String {
    let mut message = String::from("required models could not be downloaded:");
    for artifact in report.missing_required() {
        let manual = reenact_models::catalog::find(DEFAULT_CATALOG, &artifact.name)
            .map_or("", |a| a.manual_url);
        message.push_str(&format!(
            "\n  {} -> download from {} and save as {}",
            artifact.name,
            manual,
            artifact.path.display()
        ));
    }
    message
}

fn list(config: &Config) {
    let models = list_models(&config.model_dir, DEFAULT_CATALOG);

    println!("Models directory: {}", config.model_dir.display());
    println!();

    for (artifact, installed) in &models {
        let status = if *installed { "✓" } else { "✗" };
        let kind = if artifact.required { "required" } else { "optional" };
        println!(
            "  {status} {} ({}, {kind}): {}",
            artifact.name, artifact.file_name, artifact.description
        );
    }

    println!();
    let installed = models.iter().filter(|(_, installed)| *installed).count();
    println!("{installed}/{} models installed", models.len());
}
