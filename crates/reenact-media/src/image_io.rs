//! Still image decode and encode.

use crate::kind::{require_file, MediaError};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, RgbImage};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const JPEG_QUALITY: u8 = 95;

/// Decode any supported raster file into RGB8.
pub fn load_image(path: &Path) -> Result<RgbImage, MediaError> {
    require_file(path)?;
    let image = image::open(path).map_err(|source| MediaError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), width = image.width(), height = image.height(), "decoded image");
    Ok(image.to_rgb8())
}

/// Output path with a writable extension.
///
/// `.jpg`/`.jpeg` become `.jpg`, `.png` is kept, anything else (or no
/// extension) becomes `.jpg`.
pub fn normalize_output_path(path: &Path) -> PathBuf {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => path.with_extension("png"),
        _ => path.with_extension("jpg"),
    }
}

fn format_for(path: &Path) -> ImageFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => ImageFormat::Png,
        _ => ImageFormat::Jpeg,
    }
}

/// Write `image` under the normalized form of `path`, returning the path
/// actually written.
///
/// When the regular writer fails, the file is encoded again with an
/// explicitly constructed encoder before giving up.
pub fn save_output(image: &RgbImage, path: &Path) -> Result<PathBuf, MediaError> {
    let out = normalize_output_path(path);
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let format = format_for(&out);
    match image.save_with_format(&out, format) {
        Ok(()) => {}
        Err(e) => {
            tracing::warn!(path = %out.display(), error = %e, "image writer failed, retrying with fallback encoder");
            encode_fallback(image, &out, format).map_err(|reason| MediaError::Encode {
                path: out.clone(),
                reason: format!("{e}; fallback: {reason}"),
            })?;
        }
    }

    tracing::info!(path = %out.display(), "wrote image");
    Ok(out)
}

fn encode_fallback(image: &RgbImage, path: &Path, format: ImageFormat) -> Result<(), String> {
    let file = File::create(path).map_err(|e| e.to_string())?;
    let mut writer = BufWriter::new(file);
    let (width, height) = image.dimensions();

    match format {
        ImageFormat::Png => PngEncoder::new(&mut writer)
            .write_image(image.as_raw(), width, height, ExtendedColorType::Rgb8)
            .map_err(|e| e.to_string())?,
        _ => JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
            .encode_image(image)
            .map_err(|e| e.to_string())?,
    }
    writer.flush().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_normalize_output_path() {
        assert_eq!(normalize_output_path(Path::new("out.jpeg")), Path::new("out.jpg"));
        assert_eq!(normalize_output_path(Path::new("out.JPG")), Path::new("out.jpg"));
        assert_eq!(normalize_output_path(Path::new("out.png")), Path::new("out.png"));
        assert_eq!(normalize_output_path(Path::new("out.PNG")), Path::new("out.png"));
        assert_eq!(normalize_output_path(Path::new("out.tiff")), Path::new("out.jpg"));
        assert_eq!(normalize_output_path(Path::new("dir/out")), Path::new("dir/out.jpg"));
    }

    #[test]
    fn test_save_png_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbImage::from_fn(9, 7, |x, y| Rgb([x as u8 * 20, y as u8 * 30, 77]));

        let written = save_output(&image, &dir.path().join("result.png")).unwrap();
        assert_eq!(written, dir.path().join("result.png"));
        assert_eq!(load_image(&written).unwrap(), image);
    }

    #[test]
    fn test_save_unknown_extension_as_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbImage::from_pixel(16, 12, Rgb([120, 60, 30]));

        let written = save_output(&image, &dir.path().join("nested/result.gif")).unwrap();
        assert_eq!(written, dir.path().join("nested/result.jpg"));
        let bytes = std::fs::read(&written).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
        assert_eq!(load_image(&written).unwrap().dimensions(), (16, 12));
    }

    #[test]
    fn test_fallback_encoder_writes_decodable_file() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        let path = dir.path().join("fallback.png");

        encode_fallback(&image, &path, ImageFormat::Png).unwrap();
        assert_eq!(load_image(&path).unwrap(), image);
    }

    #[test]
    fn test_load_missing_image() {
        let err = load_image(Path::new("/nonexistent/face.png")).unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[test]
    fn test_load_corrupt_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(matches!(load_image(&path), Err(MediaError::Decode { .. })));
    }
}
