//! Photo downsizing.
//!
//! Decodes an inbox file, scales it to the configured maximum width keeping
//! the aspect ratio, re-encodes it as JPEG and base64-encodes the result so
//! it can be stored as text.

use crate::config::TransformConfig;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageError};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while transforming a photo.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to decode image: {0}")]
    Decode(#[source] ImageError),

    #[error("Failed to encode image: {0}")]
    Encode(#[source] ImageError),

    #[error("Path has no file name: {0}")]
    MissingFileName(PathBuf),

    #[error("Transform task failed: {0}")]
    Task(String),
}

impl TransformError {
    /// The file disappeared between being queued and being read.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransformError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Output of a successful transform.
#[derive(Debug, Clone)]
pub struct Transformed {
    /// File name without extension
    pub comment: String,
    /// Base64 JPEG bytes
    pub payload: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct TransformSettings {
    pub max_width: u32,
    pub jpeg_quality: u8,
}

impl From<&TransformConfig> for TransformSettings {
    fn from(config: &TransformConfig) -> Self {
        Self {
            max_width: config.max_width,
            jpeg_quality: config.jpeg_quality,
        }
    }
}

/// Read, resize and encode the photo at `path`.
pub fn transform_file(path: &Path, settings: TransformSettings) -> Result<Transformed, TransformError> {
    let comment = comment_for(path)?;

    let bytes = std::fs::read(path).map_err(|source| TransformError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let (payload, width, height) = transform_bytes(&bytes, settings)?;

    debug!(
        path = %path.display(),
        input_bytes = bytes.len(),
        output_size = format!("{}x{}", width, height),
        "Photo transformed"
    );

    Ok(Transformed {
        comment,
        payload,
        width,
        height,
    })
}

/// Run [`transform_file`] on the blocking thread pool.
pub async fn transform_file_blocking(
    path: PathBuf,
    settings: TransformSettings,
) -> Result<Transformed, TransformError> {
    tokio::task::spawn_blocking(move || transform_file(&path, settings))
        .await
        .map_err(|e| TransformError::Task(e.to_string()))?
}

/// Resize raw image bytes and return `(base64 jpeg, width, height)`.
pub fn transform_bytes(
    bytes: &[u8],
    settings: TransformSettings,
) -> Result<(String, u32, u32), TransformError> {
    let img = image::load_from_memory(bytes).map_err(TransformError::Decode)?;
    let img = fit_width(img, settings.max_width);
    let (width, height) = img.dimensions();

    let mut jpeg = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg, settings.jpeg_quality);
    img.to_rgb8()
        .write_with_encoder(encoder)
        .map_err(TransformError::Encode)?;

    Ok((STANDARD.encode(&jpeg), width, height))
}

/// Scale down to `max_width`, keeping the aspect ratio. Narrower images are untouched.
fn fit_width(img: DynamicImage, max_width: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= max_width {
        return img;
    }

    let scaled = (u64::from(height) * u64::from(max_width) + u64::from(width) / 2) / u64::from(width);
    let new_height = u32::try_from(scaled).unwrap_or(u32::MAX).max(1);
    img.resize_exact(max_width, new_height, FilterType::Lanczos3)
}

fn comment_for(path: &Path) -> Result<String, TransformError> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .ok_or_else(|| TransformError::MissingFileName(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    const SETTINGS: TransformSettings = TransformSettings {
        max_width: 700,
        jpeg_quality: 80,
    };

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(width, height, Rgb([200, 120, 40]))
            .save(&path)
            .unwrap();
        path
    }

    fn decode_payload(payload: &str) -> DynamicImage {
        let jpeg = STANDARD.decode(payload).unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), image::ImageFormat::Jpeg);
        image::load_from_memory(&jpeg).unwrap()
    }

    #[test]
    fn test_wide_photo_is_downsized() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "sunset at the beach.png", 1400, 700);

        let out = transform_file(&path, SETTINGS).unwrap();
        assert_eq!(out.comment, "sunset at the beach");
        assert_eq!((out.width, out.height), (700, 350));
        assert_eq!(decode_payload(&out.payload).dimensions(), (700, 350));
    }

    #[test]
    fn test_narrow_photo_keeps_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "small.png", 300, 200);

        let out = transform_file(&path, SETTINGS).unwrap();
        assert_eq!((out.width, out.height), (300, 200));
    }

    #[test]
    fn test_corrupt_file_fails_to_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        let err = transform_file(&path, SETTINGS).unwrap_err();
        assert!(matches!(err, TransformError::Decode(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = transform_file(&dir.path().join("gone.jpg"), SETTINGS).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_fit_width_never_collapses_height() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(5000, 1));
        assert_eq!(fit_width(img, 700).dimensions(), (700, 1));
    }

    #[tokio::test]
    async fn test_blocking_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "tall.png", 1000, 2000);

        let out = transform_file_blocking(path, SETTINGS).await.unwrap();
        assert_eq!((out.width, out.height), (700, 1400));
    }
}
