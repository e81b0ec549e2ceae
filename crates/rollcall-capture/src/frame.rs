//! Frame type and image processing — decoding, dark detection, JPEG encoding.

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use rollcall_core::CapturedImage;
use std::io::Cursor;
use std::path::Path;

/// Size the recognition service is fed, matching the capture canvas.
pub const CAPTURE_WIDTH: u32 = 640;
pub const CAPTURE_HEIGHT: u32 = 480;

/// Fraction of near-black pixels above which a frame is rejected.
const DARK_THRESHOLD_PCT: f32 = 0.95;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("image not found: {0}")]
    NotFound(String),
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("frame too dark to recognize ({dark_pct:.0}% dark pixels)")]
    TooDark { dark_pct: f32 },
    #[error("could not encode image: {0}")]
    Encode(String),
}

/// A decoded grayscale frame, used for quality checks before upload.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn from_image(image: &DynamicImage) -> Self {
        let gray = image.to_luma8();
        Self {
            width: gray.width(),
            height: gray.height(),
            data: gray.into_raw(),
        }
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Fraction of pixels in the darkest histogram bucket (0–31).
    pub fn dark_fraction(&self) -> f32 {
        dark_fraction(&self.data)
    }
}

fn dark_fraction(gray: &[u8]) -> f32 {
    if gray.is_empty() {
        return 1.0;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    dark_count as f32 / gray.len() as f32
}

/// Check if a frame is dark using an 8-bucket histogram.
///
/// Returns true if more than `threshold_pct` of pixels fall in the darkest
/// bucket (0–31). An empty frame is dark.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    dark_fraction(gray) > threshold_pct
}

/// Load an image file and prepare it for recognition.
pub fn load_image(path: &Path) -> Result<CapturedImage, CaptureError> {
    if !path.exists() {
        return Err(CaptureError::NotFound(path.display().to_string()));
    }
    let image = image::open(path).map_err(|e| CaptureError::Decode(e.to_string()))?;
    tracing::debug!(
        path = %path.display(),
        width = image.width(),
        height = image.height(),
        "image loaded"
    );
    prepare(image)
}

/// Prepare an already-encoded image held in memory.
pub fn capture_from_bytes(bytes: &[u8]) -> Result<CapturedImage, CaptureError> {
    let image = image::load_from_memory(bytes).map_err(|e| CaptureError::Decode(e.to_string()))?;
    prepare(image)
}

/// Resize to the capture canvas, reject dark frames and encode as JPEG.
fn prepare(image: DynamicImage) -> Result<CapturedImage, CaptureError> {
    let resized = image.resize_exact(CAPTURE_WIDTH, CAPTURE_HEIGHT, FilterType::Triangle);

    let frame = Frame::from_image(&resized);
    if is_dark_frame(&frame.data, DARK_THRESHOLD_PCT) {
        let dark_pct = frame.dark_fraction() * 100.0;
        tracing::debug!(dark_pct, brightness = frame.avg_brightness(), "rejecting dark frame");
        return Err(CaptureError::TooDark { dark_pct });
    }

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut bytes = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;

    tracing::debug!(bytes = bytes.len(), "frame encoded");
    Ok(CapturedImage::jpeg(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, RgbaImage};

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("rollcall-capture-{}-{name}", std::process::id()))
    }

    fn png_bytes(image: DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_dark_frame_all_black() {
        let gray = vec![0u8; 1000];
        assert!(is_dark_frame(&gray, 0.95));
    }

    #[test]
    fn test_dark_frame_normal() {
        let gray = vec![128u8; 1000];
        assert!(!is_dark_frame(&gray, 0.95));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn test_dark_frame_borderline_bright() {
        // 94% dark, 6% bright → should NOT be dark
        let mut gray = vec![10u8; 940];
        gray.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&gray, 0.95));
    }

    #[test]
    fn test_frame_brightness() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([200])));
        let frame = Frame::from_image(&image);
        assert_eq!(frame.data.len(), 16);
        assert!((frame.avg_brightness() - 200.0).abs() < 1e-3);
        assert_eq!(frame.dark_fraction(), 0.0);
    }

    #[test]
    fn test_capture_from_bytes_produces_jpeg() {
        let bytes = png_bytes(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            32,
            24,
            Luma([140]),
        )));
        let captured = capture_from_bytes(&bytes).unwrap();
        assert_eq!(captured.mime, "image/jpeg");
        assert_eq!(&captured.bytes[..2], &[0xff, 0xd8]);

        let decoded = image::load_from_memory(&captured.bytes).unwrap();
        assert_eq!(decoded.width(), CAPTURE_WIDTH);
        assert_eq!(decoded.height(), CAPTURE_HEIGHT);
    }

    #[test]
    fn test_alpha_image_encodes() {
        let bytes = png_bytes(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            8,
            8,
            image::Rgba([120, 130, 140, 128]),
        )));
        assert!(capture_from_bytes(&bytes).is_ok());
    }

    #[test]
    fn test_dark_image_rejected() {
        let bytes = png_bytes(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            16,
            16,
            Luma([5]),
        )));
        assert!(matches!(
            capture_from_bytes(&bytes),
            Err(CaptureError::TooDark { .. })
        ));
    }

    #[test]
    fn test_load_image_from_file() {
        let path = temp_path("ok.png");
        std::fs::write(
            &path,
            png_bytes(DynamicImage::ImageLuma8(GrayImage::from_pixel(
                10,
                10,
                Luma([180]),
            ))),
        )
        .unwrap();
        let captured = load_image(&path).unwrap();
        assert!(captured.to_data_url().starts_with("data:image/jpeg;base64,"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_missing_image() {
        let path = temp_path("missing.png");
        assert!(matches!(load_image(&path), Err(CaptureError::NotFound(_))));
    }

    #[test]
    fn test_load_garbage_file() {
        let path = temp_path("garbage.png");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(matches!(load_image(&path), Err(CaptureError::Decode(_))));
        std::fs::remove_file(&path).unwrap();
    }
}
