//! Cover upload pipeline: validation, thumbnailing and storage.

use crate::config::UploadConfig;
use crate::error::{AppError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageError, ImageFormat, ImageReader, Limits};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Content types accepted for cover uploads.
pub const ACCEPTED_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// Extension of stored covers.
const OUTPUT_EXTENSION: &str = "jpg";

/// Upper bound on decoder allocations for a single upload.
const MAX_DECODE_ALLOC: u64 = 256 * 1024 * 1024;

/// Map an accepted content type to its decoder format.
fn format_for(content_type: &str) -> Option<ImageFormat> {
    match content_type {
        "image/jpeg" => Some(ImageFormat::Jpeg),
        "image/png" => Some(ImageFormat::Png),
        "image/webp" => Some(ImageFormat::WebP),
        _ => None,
    }
}

/// A cover image received from a client, not yet processed.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Original file name as sent by the client.
    pub file_name: Option<String>,
    /// Declared content type.
    pub content_type: String,
    /// Raw bytes.
    pub data: Vec<u8>,
}

/// Turns uploads into stored thumbnails and removes them again.
#[derive(Debug, Clone)]
pub struct ImagePipeline {
    dir: PathBuf,
    max_bytes: usize,
    width: u32,
    height: u32,
    quality: u8,
    max_dimension: u32,
}

impl ImagePipeline {
    /// Create a pipeline from upload configuration.
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            max_bytes: config.max_bytes,
            width: config.width,
            height: config.height,
            quality: config.quality.clamp(1, 100),
            max_dimension: config.max_dimension,
        }
    }

    /// Directory covers are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Maximum accepted upload size.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Create the upload directory if it does not exist.
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Reject uploads with an unsupported type or an oversized body.
    pub fn check(&self, content_type: &str, len: usize) -> Result<()> {
        if format_for(content_type).is_none() {
            return Err(AppError::UnsupportedMediaType(format!(
                "'{}' is not an accepted image type (expected one of {})",
                content_type,
                ACCEPTED_TYPES.join(", ")
            )));
        }

        if len > self.max_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "Image is {} bytes, the limit is {} bytes",
                len, self.max_bytes
            )));
        }

        Ok(())
    }

    /// Validate, resize, re-encode and write an upload. Returns the stored file name.
    pub async fn store(&self, upload: Upload) -> Result<String> {
        self.check(&upload.content_type, upload.data.len())?;

        let stem = upload
            .file_name
            .as_deref()
            .and_then(|n| Path::new(n).file_stem())
            .and_then(|s| s.to_str())
            .map(sanitize_stem);

        let pipeline = self.clone();
        let encoded = tokio::task::spawn_blocking(move || pipeline.encode(&upload))
            .await
            .map_err(|e| AppError::Internal(format!("Image task failed: {}", e)))??;

        let file_name = unique_name(stem.as_deref());
        let path = self.dir.join(&file_name);

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, &encoded.bytes).await?;

        tracing::info!(
            file = %file_name,
            width = encoded.width,
            height = encoded.height,
            bytes = encoded.bytes.len(),
            "Stored cover image"
        );

        Ok(file_name)
    }

    /// Decode, fit within the thumbnail box and re-encode as JPEG.
    fn encode(&self, upload: &Upload) -> Result<Encoded> {
        let format = format_for(&upload.content_type).ok_or_else(|| {
            AppError::UnsupportedMediaType(upload.content_type.clone())
        })?;

        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        limits.max_alloc = Some(MAX_DECODE_ALLOC);

        let mut reader = ImageReader::with_format(Cursor::new(&upload.data), format);
        reader.limits(limits);

        let img = reader.decode().map_err(|e| match e {
            ImageError::Limits(_) => AppError::Validation(format!(
                "Image dimensions exceed the {0}x{0} limit: {1}",
                self.max_dimension, e
            )),
            e => AppError::Validation(format!("Uploaded file is not a valid image: {}", e)),
        })?;

        // Never upscale small covers.
        let img = if img.width() > self.width || img.height() > self.height {
            img.thumbnail(self.width, self.height)
        } else {
            img
        };

        // JPEG has no alpha channel.
        let rgb = img.to_rgb8();

        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, self.quality).encode_image(&rgb)?;

        Ok(Encoded {
            width: rgb.width(),
            height: rgb.height(),
            bytes,
        })
    }

    /// Build the public URL of a stored cover.
    pub fn public_url(base_url: &str, file_name: &str) -> String {
        format!("{}/uploads/{}", base_url.trim_end_matches('/'), file_name)
    }

    /// Remove the file behind a cover URL. Missing files are ignored.
    pub async fn remove_by_url(&self, image_url: &str) {
        let Some(file_name) = file_name_from_url(image_url) else {
            return;
        };

        let path = self.dir.join(file_name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::info!(file = %file_name, "Removed cover image"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(file = %file_name, "Cover image already gone");
            }
            Err(e) => {
                tracing::warn!(file = %file_name, error = %e, "Failed to remove cover image");
            }
        }
    }
}

struct Encoded {
    width: u32,
    height: u32,
    bytes: Vec<u8>,
}

/// Generate `<millis>-<stem>-<uuid8>.jpg`, or `<millis>-<uuid8>.jpg` without a stem.
fn unique_name(stem: Option<&str>) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];

    match stem.filter(|s| !s.is_empty()) {
        Some(stem) => format!("{}-{}-{}.{}", millis, stem, suffix, OUTPUT_EXTENSION),
        None => format!("{}-{}.{}", millis, suffix, OUTPUT_EXTENSION),
    }
}

/// Last path segment of an image URL, if it is a plain file name.
pub fn file_name_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let name = path.rsplit('/').next()?;

    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        return None;
    }

    Some(name)
}

/// Keep ASCII alphanumerics, `-` and `_`; spaces become `_`.
fn sanitize_stem(stem: &str) -> String {
    stem.chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .take(40)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};

    fn pipeline(dir: &Path) -> ImagePipeline {
        ImagePipeline::new(&UploadConfig {
            dir: dir.to_path_buf(),
            max_bytes: 1024 * 1024,
            width: 100,
            height: 150,
            quality: 80,
            max_dimension: 1000,
        })
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 40, 40]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn check_rejects_non_images() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());

        assert!(matches!(
            p.check("text/plain", 10),
            Err(AppError::UnsupportedMediaType(_))
        ));
        assert!(matches!(
            p.check("image/gif", 10),
            Err(AppError::UnsupportedMediaType(_))
        ));
        for ty in ACCEPTED_TYPES {
            assert!(p.check(ty, 10).is_ok());
        }
    }

    #[test]
    fn check_rejects_oversized() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());

        assert!(p.check("image/png", 1024 * 1024).is_ok());
        assert!(matches!(
            p.check("image/png", 1024 * 1024 + 1),
            Err(AppError::PayloadTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn store_resizes_and_reencodes() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());

        let name = p
            .store(Upload {
                file_name: Some("cover.png".to_string()),
                content_type: "image/png".to_string(),
                data: png_bytes(400, 300),
            })
            .await
            .unwrap();

        assert!(name.ends_with(".jpg"));
        let stored = std::fs::read(dir.path().join(&name)).unwrap();
        let img = image::load_from_memory_with_format(&stored, ImageFormat::Jpeg).unwrap();
        assert!(img.width() <= 100 && img.height() <= 150);
        assert_eq!(img.width(), 100);

        // Only the final file is left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn store_does_not_upscale() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());

        let name = p
            .store(Upload {
                file_name: None,
                content_type: "image/png".to_string(),
                data: png_bytes(20, 30),
            })
            .await
            .unwrap();

        let img = image::open(dir.path().join(name)).unwrap();
        assert_eq!((img.width(), img.height()), (20, 30));
    }

    #[tokio::test]
    async fn store_rejects_garbage_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());

        let result = p
            .store(Upload {
                file_name: None,
                content_type: "image/png".to_string(),
                data: b"definitely not a png".to_vec(),
            })
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn store_rejects_oversized_dimensions_before_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());

        // Small on the wire, large once decoded.
        let data = png_bytes(1200, 4);
        assert!(data.len() < p.max_bytes());

        let result = p
            .store(Upload {
                file_name: Some("wide.png".to_string()),
                content_type: "image/png".to_string(),
                data,
            })
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn store_keeps_clean_stem() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());

        let name = p
            .store(Upload {
                file_name: Some("my cover (final).png".to_string()),
                content_type: "image/png".to_string(),
                data: png_bytes(10, 10),
            })
            .await
            .unwrap();

        assert!(name.contains("-my_cover_final-"), "{}", name);
        assert!(dir.path().join(&name).exists());
    }

    #[tokio::test]
    async fn remove_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let file = dir.path().join("123-abc.jpg");
        std::fs::write(&file, b"x").unwrap();

        p.remove_by_url("http://localhost:4000/uploads/123-abc.jpg")
            .await;
        assert!(!file.exists());

        // Second removal of the same file is silent.
        p.remove_by_url("http://localhost:4000/uploads/123-abc.jpg")
            .await;
    }

    #[test]
    fn file_name_from_url_extracts_last_segment() {
        assert_eq!(
            file_name_from_url("http://h/uploads/a.jpg?v=2"),
            Some("a.jpg")
        );
        assert_eq!(file_name_from_url("a.jpg"), Some("a.jpg"));
        assert_eq!(file_name_from_url("http://h/uploads/"), None);
        assert_eq!(file_name_from_url("http://h/uploads/.."), None);
        assert_eq!(file_name_from_url("..\\secret"), None);
    }

    #[test]
    fn public_url_joins_cleanly() {
        assert_eq!(
            ImagePipeline::public_url("http://localhost:4000/", "a.jpg"),
            "http://localhost:4000/uploads/a.jpg"
        );
    }
}
