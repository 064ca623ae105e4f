/// Image transcoding for blob derivatives
///
/// Resizes and re-encodes images into the formats the derivative cache
/// serves. Decoding and encoding run on the blocking thread pool.
use crate::{
    blob_store::OutputFormat,
    error::{BlobError, BlobResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use std::io::Cursor;

/// Everything a transcoder needs to produce one derivative
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub format: OutputFormat,
    /// Target width, 0 to keep
    pub width: u32,
    /// Target height, 0 to keep
    pub height: u32,
    pub data: Bytes,
    /// Content type of the source bytes
    pub content_type: String,
}

/// Produces derivative bytes from verified source bytes
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Transcode `request.data` into `request.format`
    ///
    /// Returns the encoded bytes. Source types the transcoder cannot read
    /// must fail with `TranscodeUnsupportedFormat`.
    async fn transcode(&self, request: TranscodeRequest) -> BlobResult<Bytes>;
}

/// Largest output side when none is configured
pub const DEFAULT_MAX_DIMENSION: u32 = 4096;

const WEBP_LOSSY_QUALITY: f32 = 75.0;

/// Transcoder built on the `image` crate
#[derive(Debug, Clone)]
pub struct ImageTranscoder {
    max_dimension: u32,
}

impl Default for ImageTranscoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION)
    }
}

impl ImageTranscoder {
    /// Transcoder refusing outputs wider or taller than `max_dimension`
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    /// Decoder for a source content type, if supported
    fn source_format(content_type: &str) -> Option<ImageFormat> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            "image/gif" => Some(ImageFormat::Gif),
            "image/webp" => Some(ImageFormat::WebP),
            _ => None,
        }
    }

    fn target_format(format: OutputFormat) -> Option<ImageFormat> {
        match format {
            OutputFormat::WebP => Some(ImageFormat::WebP),
            OutputFormat::Png => Some(ImageFormat::Png),
            OutputFormat::Jpeg => Some(ImageFormat::Jpeg),
            OutputFormat::Raw => None,
        }
    }

    fn transcode_blocking(request: TranscodeRequest, max_dimension: u32) -> BlobResult<Bytes> {
        let unsupported = || BlobError::TranscodeUnsupportedFormat {
            source_type: request.content_type.clone(),
            target: request.format.to_string(),
        };
        let source = Self::source_format(&request.content_type).ok_or_else(unsupported)?;
        let target = Self::target_format(request.format).ok_or_else(unsupported)?;

        let img = image::load_from_memory_with_format(&request.data, source)
            .map_err(|e| BlobError::TranscodeFailed(format!("Failed to decode image: {}", e)))?;

        // Keeping the decoded size never allocates more than decoding did
        let (width, height) =
            target_size(img.width(), img.height(), request.width, request.height);
        let img = if (width, height) == (img.width(), img.height()) {
            img
        } else if width > max_dimension || height > max_dimension {
            return Err(BlobError::InvalidRequest(format!(
                "Derivative of {}x{} exceeds the limit of {}",
                width, height, max_dimension
            )));
        } else {
            img.resize_exact(width, height, FilterType::Lanczos3)
        };

        // Photos stay lossy; everything else keeps its pixels exact
        if target == ImageFormat::WebP && source == ImageFormat::Jpeg {
            return encode_lossy_webp(&img);
        }

        // JPEG has no alpha channel; the WebP encoder takes 8-bit RGBA
        let img = match target {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
            ImageFormat::WebP => DynamicImage::ImageRgba8(img.to_rgba8()),
            _ => img,
        };

        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), target)
            .map_err(|e| BlobError::TranscodeFailed(format!("Failed to encode image: {}", e)))?;

        Ok(Bytes::from(buf))
    }
}

/// Lossy WebP at the quality JPEG sources are re-encoded with
fn encode_lossy_webp(img: &DynamicImage) -> BlobResult<Bytes> {
    let rgb = img.to_rgb8();
    let encoded = webp::Encoder::from_rgb(rgb.as_raw(), rgb.width(), rgb.height())
        .encode_simple(false, WEBP_LOSSY_QUALITY)
        .map_err(|e| BlobError::TranscodeFailed(format!("Failed to encode webp: {:?}", e)))?;
    Ok(Bytes::copy_from_slice(&encoded))
}

/// Output size for a requested box
///
/// A zero dimension is derived from the other one to keep the aspect
/// ratio; both zero keeps the original size.
fn target_size(orig_w: u32, orig_h: u32, width: u32, height: u32) -> (u32, u32) {
    let (w1, h1) = (orig_w.max(1), orig_h.max(1));
    match (width, height) {
        (0, 0) => (orig_w, orig_h),
        (w, 0) => (w, scale(h1, w, w1)),
        (0, h) => (scale(w1, h, h1), h),
        (w, h) => (w, h),
    }
}

/// `value * num / den`, rounded, at least 1
fn scale(value: u32, num: u32, den: u32) -> u32 {
    let scaled = (value as u64 * num as u64 + den as u64 / 2) / den as u64;
    scaled.clamp(1, u32::MAX as u64) as u32
}

#[async_trait]
impl Transcoder for ImageTranscoder {
    async fn transcode(&self, request: TranscodeRequest) -> BlobResult<Bytes> {
        let max_dimension = self.max_dimension;
        tokio::task::spawn_blocking(move || Self::transcode_blocking(request, max_dimension))
            .await
            .map_err(|e| BlobError::Internal(format!("Transcode task failed: {}", e)))?
    }
}
