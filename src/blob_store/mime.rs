/// Content type detection from blob bytes
use image::ImageFormat;

/// Fallback for anything we cannot recognise
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Detect the content type of `data` from its leading bytes
///
/// Images are recognised through the `image` crate's format guesser;
/// the video containers ATProto accepts are matched by signature.
pub fn sniff(data: &[u8]) -> &'static str {
    if let Ok(format) = image::guess_format(data) {
        if let Some(mime) = image_mime(format) {
            return mime;
        }
    }

    // ISO base media: "ftyp" box at offset 4
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return match &data[8..12] {
            b"qt  " => "video/quicktime",
            _ => "video/mp4",
        };
    }

    // EBML header (Matroska / WebM)
    if data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return "video/webm";
    }

    if data.starts_with(b"%PDF-") {
        return "application/pdf";
    }

    if !data.is_empty() && std::str::from_utf8(data).is_ok() {
        return "text/plain; charset=utf-8";
    }

    OCTET_STREAM
}

fn image_mime(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Bmp => Some("image/bmp"),
        ImageFormat::Tiff => Some("image/tiff"),
        ImageFormat::Avif => Some("image/avif"),
        ImageFormat::Ico => Some("image/x-icon"),
        _ => None,
    }
}
