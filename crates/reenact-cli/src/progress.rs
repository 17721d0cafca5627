use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use reenact_core::ProgressUpdate;
use reenact_models::ProgressCallback;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Byte-level bar for model downloads, plus the callback that drives it.
pub fn download_bar() -> Result<(Arc<ProgressBar>, ProgressCallback)> {
    let pb = Arc::new(ProgressBar::new(0));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")
            .map_err(|e| anyhow::anyhow!("invalid progress template: {e}"))?
            .progress_chars("#>-"),
    );

    let current: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
    let bar = Arc::clone(&pb);
    let callback: ProgressCallback = Box::new(move |name: &str, downloaded: u64, total: Option<u64>| {
        let is_new = {
            let mut current = current.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == name {
                false
            } else {
                *current = name.to_string();
                true
            }
        };
        if is_new {
            bar.reset();
            bar.set_length(total.unwrap_or(0));
            bar.set_message(name.to_string());
        }
        bar.set_position(downloaded);
    });

    Ok((pb, callback))
}

/// Render frame progress until the sender side is dropped.
///
/// The declared frame count can be 0 (unknown) or wrong; the bar grows when
/// more frames arrive than declared.
pub async fn render_frames(mut rx: mpsc::UnboundedReceiver<ProgressUpdate>) -> Result<()> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} frames ({per_sec}, {eta})")
            .map_err(|e| anyhow::anyhow!("invalid progress template: {e}"))?
            .progress_chars("#>-"),
    );

    while let Some(update) = rx.recv().await {
        let len = update.total.max(update.current) as u64;
        if pb.length() != Some(len) {
            pb.set_length(len);
        }
        pb.set_position(update.current as u64);
    }

    pb.finish_and_clear();
    Ok(())
}
