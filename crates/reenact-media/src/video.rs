//! Video decode and encode through `ffmpeg`/`ffprobe` subprocesses.
//!
//! Frames cross the pipe as packed `rgb24`, one frame at a time, so memory
//! stays bounded regardless of video length.

use crate::kind::{require_file, MediaError};
use image::RgbImage;
use reenact_core::{PortError, VideoMetadata, VideoSink, VideoSource};
use serde::Deserialize;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

/// Encoder used when none is configured; available in every ffmpeg build.
pub const DEFAULT_VIDEO_CODEC: &str = "mpeg4";

/// Executables and encoder settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub codec: String,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            codec: DEFAULT_VIDEO_CODEC.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
    tags: Option<ProbeTags>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

impl ProbeStream {
    /// Display rotation in degrees, from the display matrix or the legacy
    /// `rotate` tag.
    fn rotation(&self) -> f64 {
        self.side_data_list
            .iter()
            .find_map(|side| side.rotation)
            .or_else(|| self.tags.as_ref()?.rotate.as_deref()?.trim().parse().ok())
            .unwrap_or(0.0)
    }
}

/// Metadata of the first video stream of `path`.
pub fn probe(tools: &FfmpegTools, path: &Path) -> Result<VideoMetadata, MediaError> {
    require_file(path)?;
    let output = Command::new(&tools.ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames,duration\
             :stream_tags=rotate:stream_side_data=rotation",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| MediaError::Probe(format!("cannot run {}: {e}", tools.ffprobe.display())))?;

    if !output.status.success() {
        return Err(MediaError::Probe(format!(
            "{} on {}: {}",
            output.status,
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let metadata = parse_probe(&String::from_utf8_lossy(&output.stdout))?;
    tracing::debug!(path = %path.display(), ?metadata, "probed video");
    Ok(metadata)
}

/// Build [`VideoMetadata`] from `ffprobe -of json` output.
///
/// The frame count comes from `nb_frames` when the container declares it,
/// otherwise from `duration * fps`, otherwise 0. Width and height are the
/// decoded frame size: ffmpeg autorotates, so a quarter-turn rotation swaps
/// the stored dimensions.
pub fn parse_probe(json: &str) -> Result<VideoMetadata, MediaError> {
    let parsed: ProbeOutput =
        serde_json::from_str(json).map_err(|e| MediaError::Probe(format!("invalid ffprobe output: {e}")))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| MediaError::Probe("no video stream".into()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(MediaError::Probe("video stream has no dimensions".into())),
    };
    let (width, height) = if (stream.rotation().round() as i64).rem_euclid(180) == 90 {
        (height, width)
    } else {
        (width, height)
    };

    let fps = [&stream.avg_frame_rate, &stream.r_frame_rate]
        .into_iter()
        .flatten()
        .find_map(|rate| parse_rate(rate))
        .ok_or_else(|| MediaError::Probe("video stream has no frame rate".into()))?;

    let total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<usize>().ok())
        .or_else(|| {
            let duration: f64 = stream.duration.as_deref()?.parse().ok()?;
            Some((duration * fps).round() as usize)
        })
        .unwrap_or(0);

    Ok(VideoMetadata {
        fps,
        width,
        height,
        total_frames,
    })
}

/// `"30000/1001"` or `"25"` to frames per second; `None` for zero or garbage.
fn parse_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => rate.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// Fill `buf` from `reader`; returns the bytes read, short only at EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Collect a child's stderr on a thread so it can never stall on a full pipe.
fn collect_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    let mut stderr = child.stderr.take()?;
    Some(std::thread::spawn(move || {
        let mut raw = Vec::new();
        let _ = stderr.read_to_end(&mut raw);
        String::from_utf8_lossy(&raw).trim().to_string()
    }))
}

fn stderr_text(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Decodes a video file into RGB frames.
pub struct FfmpegReader {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    metadata: VideoMetadata,
    buf: Vec<u8>,
    path: PathBuf,
    ended: bool,
}

impl FfmpegReader {
    pub fn open(tools: &FfmpegTools, path: &Path) -> Result<Self, MediaError> {
        let metadata = probe(tools, path)?;

        let mut child = Command::new(&tools.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            // Same stream that was probed.
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MediaError::Ffmpeg(format!("cannot run {}: {e}", tools.ffmpeg.display())))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::Ffmpeg("decoder stdout not captured".into()))?;
        let stderr = collect_stderr(&mut child);

        tracing::debug!(path = %path.display(), "opened video decoder");
        Ok(Self {
            child,
            stdout,
            stderr,
            buf: vec![0; frame_len(metadata.width, metadata.height)],
            metadata,
            path: path.to_path_buf(),
            ended: false,
        })
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>, MediaError> {
        if self.ended {
            return Ok(None);
        }
        let n = read_full(&mut self.stdout, &mut self.buf)?;
        if n < self.buf.len() {
            self.ended = true;
            self.check_exit()?;
            if n > 0 {
                tracing::warn!(bytes = n, expected = self.buf.len(), "truncated final frame dropped");
            }
            return Ok(None);
        }

        let frame = RgbImage::from_raw(self.metadata.width, self.metadata.height, self.buf.clone())
            .ok_or_else(|| MediaError::Ffmpeg("decoded frame has unexpected size".into()))?;
        Ok(Some(frame))
    }

    /// End of stream is only clean if the decoder exited successfully.
    fn check_exit(&mut self) -> Result<(), MediaError> {
        let status = self.child.wait()?;
        let stderr = stderr_text(self.stderr.take());
        if !status.success() {
            return Err(MediaError::Ffmpeg(format!(
                "decoder exited with {status} reading {}: {stderr}",
                self.path.display()
            )));
        }
        Ok(())
    }
}

impl VideoSource for FfmpegReader {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, PortError> {
        Ok(self.read_frame()?)
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        // The decoder may still be writing if we stopped early.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Encodes RGB frames into a video file.
pub struct FfmpegWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    width: u32,
    height: u32,
    path: PathBuf,
}

impl FfmpegWriter {
    pub fn create(tools: &FfmpegTools, path: &Path, metadata: &VideoMetadata) -> Result<Self, MediaError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut child = Command::new(&tools.ffmpeg)
            .args(["-v", "error", "-y", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", metadata.width, metadata.height)])
            .args(["-r", &format!("{}", metadata.fps)])
            .args(["-i", "-", "-an"])
            .args(["-c:v", &tools.codec, "-q:v", "2"])
            // yuv420p needs even dimensions.
            .args(["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2", "-pix_fmt", "yuv420p"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MediaError::Ffmpeg(format!("cannot run {}: {e}", tools.ffmpeg.display())))?;

        let stdin = child.stdin.take();
        let stderr = collect_stderr(&mut child);
        tracing::debug!(
            path = %path.display(),
            codec = %tools.codec,
            fps = metadata.fps,
            "opened video encoder"
        );
        Ok(Self {
            child,
            stdin,
            stderr,
            width: metadata.width,
            height: metadata.height,
            path: path.to_path_buf(),
        })
    }

    fn write(&mut self, frame: &RgbImage) -> Result<(), MediaError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(MediaError::FrameSize {
                width: self.width,
                height: self.height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::Ffmpeg("encoder already finished".into()))?;
        stdin.write_all(frame.as_raw())?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), MediaError> {
        let Some(stdin) = self.stdin.take() else {
            return Ok(());
        };
        drop(stdin);

        let status = self.child.wait()?;
        let stderr = stderr_text(self.stderr.take());
        if !status.success() {
            return Err(MediaError::Ffmpeg(format!(
                "encoder exited with {status} writing {}: {stderr}",
                self.path.display()
            )));
        }
        tracing::info!(path = %self.path.display(), "wrote video");
        Ok(())
    }
}

impl VideoSink for FfmpegWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), PortError> {
        Ok(self.write(frame)?)
    }

    fn finish(&mut self) -> Result<(), PortError> {
        Ok(self.close()?)
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("25/1"), Some(25.0));
        assert!((parse_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("24"), Some(24.0));
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("abc"), None);
    }

    #[test]
    fn test_parse_probe_declared_frames() {
        let json = r#"{"streams":[{"width":1280,"height":720,"r_frame_rate":"30/1","avg_frame_rate":"30/1","nb_frames":"300","duration":"10.0"}]}"#;
        let meta = parse_probe(json).unwrap();
        assert_eq!(
            meta,
            VideoMetadata {
                fps: 30.0,
                width: 1280,
                height: 720,
                total_frames: 300
            }
        );
    }

    #[test]
    fn test_parse_probe_frames_from_duration() {
        // Matroska streams usually omit nb_frames.
        let json = r#"{"streams":[{"width":640,"height":360,"r_frame_rate":"25/1","avg_frame_rate":"0/0","duration":"4.0"}]}"#;
        let meta = parse_probe(json).unwrap();
        assert_eq!(meta.fps, 25.0);
        assert_eq!(meta.total_frames, 100);
    }

    #[test]
    fn test_parse_probe_unknown_count() {
        let json = r#"{"streams":[{"width":64,"height":48,"r_frame_rate":"10/1"}]}"#;
        assert_eq!(parse_probe(json).unwrap().total_frames, 0);
    }

    #[test]
    fn test_parse_probe_errors() {
        assert!(matches!(parse_probe(r#"{"streams":[]}"#), Err(MediaError::Probe(_))));
        assert!(matches!(parse_probe("{}"), Err(MediaError::Probe(_))));
        assert!(matches!(parse_probe("garbage"), Err(MediaError::Probe(_))));
        let no_rate = r#"{"streams":[{"width":64,"height":48}]}"#;
        assert!(matches!(parse_probe(no_rate), Err(MediaError::Probe(_))));
    }

    #[test]
    fn test_parse_probe_quarter_rotation_swaps_dimensions() {
        // Portrait phone clip: stored landscape, display matrix rotates -90.
        let json = r#"{"streams":[{"width":1920,"height":1080,"r_frame_rate":"30/1","nb_frames":"90",
            "side_data_list":[{"rotation":-90}]}]}"#;
        let meta = parse_probe(json).unwrap();
        assert_eq!((meta.width, meta.height), (1080, 1920));

        let legacy = r#"{"streams":[{"width":1920,"height":1080,"r_frame_rate":"30/1","tags":{"rotate":"270"}}]}"#;
        let meta = parse_probe(legacy).unwrap();
        assert_eq!((meta.width, meta.height), (1080, 1920));
    }

    #[test]
    fn test_parse_probe_half_rotation_keeps_dimensions() {
        let json = r#"{"streams":[{"width":1920,"height":1080,"r_frame_rate":"30/1",
            "side_data_list":[{"side_data_type":"Display Matrix","rotation":180}],"tags":{"rotate":"90"}}]}"#;
        let meta = parse_probe(json).unwrap();
        assert_eq!((meta.width, meta.height), (1920, 1080));
    }

    #[test]
    fn test_read_full_short_at_eof() {
        let mut data: &[u8] = &[1, 2, 3, 4, 5];
        let mut buf = [0u8; 3];
        assert_eq!(read_full(&mut data, &mut buf).unwrap(), 3);
        assert_eq!(read_full(&mut data, &mut buf).unwrap(), 2);
        assert_eq!(read_full(&mut data, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_probe_missing_file() {
        let err = probe(&FfmpegTools::default(), Path::new("/nonexistent/clip.mp4")).unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    /// Shell-script stand-ins for ffprobe/ffmpeg. The probe reports a 2x2
    /// clip; `decoder` is the body of the ffmpeg script.
    #[cfg(unix)]
    fn scripted_tools(dir: &Path, decoder: &str) -> FfmpegTools {
        use std::os::unix::fs::PermissionsExt;

        let write_script = |name: &str, body: &str| {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        };
        FfmpegTools {
            ffprobe: write_script(
                "ffprobe",
                r#"echo '{"streams":[{"width":2,"height":2,"r_frame_rate":"10/1","nb_frames":"10"}]}'"#,
            ),
            ffmpeg: write_script("ffmpeg", decoder),
            ..FfmpegTools::default()
        }
    }

    #[cfg(unix)]
    fn clip(dir: &Path) -> PathBuf {
        let path = dir.join("clip.mp4");
        std::fs::write(&path, b"not really a video").unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_decoder_failure_at_start_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let tools = scripted_tools(dir.path(), "echo 'moov atom not found' >&2; exit 1");

        let mut reader = FfmpegReader::open(&tools, &clip(dir.path())).unwrap();
        let err = reader.next_frame().unwrap_err().to_string();
        assert!(err.contains("decoder exited"), "got {err}");
        assert!(err.contains("moov atom not found"), "got {err}");
    }

    #[cfg(unix)]
    #[test]
    fn test_decoder_failure_mid_stream_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let tools = scripted_tools(dir.path(), "head -c 12 /dev/zero; echo 'corrupt packet' >&2; exit 1");

        let mut reader = FfmpegReader::open(&tools, &clip(dir.path())).unwrap();
        assert!(reader.next_frame().unwrap().is_some());
        let err = reader.next_frame().unwrap_err().to_string();
        assert!(err.contains("corrupt packet"), "got {err}");
    }

    #[cfg(unix)]
    #[test]
    fn test_clean_decoder_exit_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        // Fails unless the probed stream is the one decoded.
        let tools = scripted_tools(
            dir.path(),
            r#"case "$*" in *"-map 0:v:0"*) ;; *) echo 'no stream map' >&2; exit 3;; esac
head -c 24 /dev/zero"#,
        );

        let mut reader = FfmpegReader::open(&tools, &clip(dir.path())).unwrap();
        assert_eq!(reader.metadata().total_frames, 10);
        let mut frames = 0;
        while let Some(frame) = reader.next_frame().unwrap() {
            assert_eq!(frame.dimensions(), (2, 2));
            frames += 1;
        }
        assert_eq!(frames, 2);
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_probe_missing_binary() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let tools = FfmpegTools {
            ffprobe: PathBuf::from("/nonexistent/ffprobe"),
            ..FfmpegTools::default()
        };
        let err = probe(&tools, file.path()).unwrap_err();
        assert!(matches!(err, MediaError::Probe(msg) if msg.contains("cannot run")));
    }
}
