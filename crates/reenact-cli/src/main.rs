use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reenact_media::{require_media, MediaKind};
use reenact_models::{list_models, DEFAULT_CATALOG};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod models;
mod progress;

use config::Config;
use engine::spawn_engine;
use models::ModelsCommand;

#[derive(Parser)]
#[command(name = "reenact", version, about = "Swap faces in images and videos")]
struct Cli {
    /// TOML config file (default: $REENACT_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Put the face from SOURCE onto TARGET (image or video)
    Swap {
        /// Image with the face to use
        source: PathBuf,
        /// Image or video to put it on
        target: PathBuf,
        /// Where to write the result
        #[arg(short, long)]
        output: PathBuf,
        /// Which source face, counted left to right (images only)
        #[arg(long, default_value_t = 0)]
        source_index: usize,
        /// Which target face, counted left to right (images only)
        #[arg(long, default_value_t = 0)]
        target_index: usize,
    },
    /// List the faces detected in an image as JSON
    Faces {
        image: PathBuf,
    },
    /// Manage model files
    Models {
        #[command(subcommand)]
        command: ModelsCommand,
    },
    /// Show configuration and model status as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Swap {
            source,
            target,
            output,
            source_index,
            target_index,
        } => swap(&config, source, target, output, source_index, target_index).await,
        Commands::Faces { image } => faces(&config, image).await,
        Commands::Models { command } => models::run(&command, &config).await,
        Commands::Status => status(&config),
    }
}

async fn swap(
    config: &Config,
    source: PathBuf,
    target: PathBuf,
    output: PathBuf,
    source_index: usize,
    target_index: usize,
) -> Result<()> {
    require_image(&source)?;
    let kind = require_media(&target)?;
    ensure_required_models(config).await?;

    let engine = spawn_engine(config.session_paths(), config.ffmpeg_tools())?;

    match kind {
        MediaKind::Image => {
            let written = engine
                .swap_still(source, target, output, source_index, target_index)
                .await?;
            println!("Saved {}", written.display());
        }
        MediaKind::Video => {
            if source_index != 0 || target_index != 0 {
                tracing::warn!("face indices are ignored for video; the first source face is tracked");
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let renderer = tokio::spawn(progress::render_frames(rx));
            let result = engine.swap_video(source, target, output, tx).await;
            renderer.await.context("progress task panicked")??;

            let outcome = result?;
            let report = &outcome.report;
            println!(
                "Saved {} ({} frames, {} swapped, {} without a face, {} failed)",
                outcome.output.display(),
                report.frames,
                report.swapped,
                report.no_face,
                report.failed
            );
            if report.failed > 0 {
                eprintln!(
                    "warning: {} frame(s) could not be processed and were kept unchanged (run with RUST_LOG=warn for details)",
                    report.failed
                );
            }
        }
    }

    Ok(())
}

async fn faces(config: &Config, image: PathBuf) -> Result<()> {
    require_image(&image)?;
    ensure_required_models(config).await?;

    let engine = spawn_engine(config.session_paths(), config.ffmpeg_tools())?;
    let faces = engine.faces(image).await?;

    let listed: Vec<_> = faces
        .iter()
        .enumerate()
        .map(|(index, face)| {
            serde_json::json!({
                "index": index,
                "bbox": face.bbox,
                "confidence": face.confidence,
                "landmarks": face.landmarks,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&listed)?);
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let models: Vec<_> = list_models(&config.model_dir, DEFAULT_CATALOG)
        .into_iter()
        .map(|(artifact, installed)| {
            serde_json::json!({
                "name": artifact.name,
                "file": artifact.file_name,
                "required": artifact.required,
                "installed": installed,
            })
        })
        .collect();

    let status = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "config": config,
        "models": models,
        "ffmpeg": tool_available(&config.ffmpeg),
        "ffprobe": tool_available(&config.ffprobe),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn require_image(path: &Path) -> Result<()> {
    match require_media(path)? {
        MediaKind::Image => Ok(()),
        MediaKind::Video => anyhow::bail!("{} is a video; an image is required here", path.display()),
    }
}

/// Download missing required models when allowed, else explain how to get them.
async fn ensure_required_models(config: &Config) -> Result<()> {
    let missing: Vec<_> = list_models(&config.model_dir, DEFAULT_CATALOG)
        .into_iter()
        .filter(|(artifact, installed)| artifact.required && !installed)
        .map(|(artifact, _)| artifact.file_name)
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    if !config.auto_download {
        anyhow::bail!(
            "missing models in {}: {} (run `reenact models fetch`)",
            config.model_dir.display(),
            missing.join(", ")
        );
    }

    tracing::info!(missing = ?missing, "fetching missing models");
    let report = models::fetch(config.model_dir.clone()).await?;
    if !report.success() {
        anyhow::bail!("{}", models::missing_message(&report));
    }
    Ok(())
}

fn tool_available(program: &Path) -> bool {
    Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
