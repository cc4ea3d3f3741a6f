//! Still frames and the encoding helpers that produce them

use crate::error::PipelineError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, RgbImage};

/// Immutable snapshot sampled from a capture source
#[derive(Debug, Clone)]
pub struct Frame {
    /// Seconds relative to the start of the source
    pub timestamp_secs: f64,
    /// JPEG-encoded image
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(timestamp_secs: f64, data: Bytes, width: u32, height: u32) -> Self {
        Self {
            timestamp_secs,
            data,
            width,
            height,
            captured_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Centered square region `(x, y, side)` of a `width` x `height` image
pub fn square_crop_region(width: u32, height: u32) -> (u32, u32, u32) {
    if width > height {
        ((width - height) / 2, 0, height)
    } else {
        (0, (height - width) / 2, width)
    }
}

/// Wrap packed RGB24 bytes as an image
pub fn rgb_from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<RgbImage, PipelineError> {
    let expected = width as usize * height as usize * 3;
    if data.len() != expected {
        return Err(PipelineError::CaptureFailed(format!(
            "Expected {} bytes for {}x{} RGB frame, got {}",
            expected,
            width,
            height,
            data.len()
        )));
    }
    RgbImage::from_raw(width, height, data)
        .ok_or_else(|| PipelineError::CaptureFailed("Invalid frame buffer".to_string()))
}

/// JPEG-encode an RGB image at the given quality (1-100)
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Bytes, PipelineError> {
    let mut buffer = Vec::with_capacity(image.as_raw().len() / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder.encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)?;
    Ok(Bytes::from(buffer))
}

/// Center-crop to a square, scale to `edge` x `edge` and JPEG-encode.
///
/// Used for live capture so the detector always sees the same geometry.
pub fn encode_square(image: &RgbImage, edge: u32, quality: u8) -> Result<(Bytes, u32), PipelineError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::CaptureFailed("Empty frame".to_string()));
    }
    if edge == 0 {
        return Err(PipelineError::Config("Frame edge cannot be zero".to_string()));
    }

    let (x, y, side) = square_crop_region(image.width(), image.height());
    let cropped = imageops::crop_imm(image, x, y, side, side).to_image();
    let scaled = if side == edge {
        cropped
    } else {
        imageops::resize(&cropped, edge, edge, FilterType::Triangle)
    };
    Ok((encode_jpeg(&scaled, quality)?, edge))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageFormat};

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
    }

    #[test]
    fn test_square_crop_landscape() {
        assert_eq!(square_crop_region(1280, 720), (280, 0, 720));
    }

    #[test]
    fn test_square_crop_portrait() {
        assert_eq!(square_crop_region(480, 640), (0, 80, 480));
    }

    #[test]
    fn test_square_crop_square() {
        assert_eq!(square_crop_region(640, 640), (0, 0, 640));
    }

    #[test]
    fn test_rgb_from_raw_size_mismatch() {
        assert!(matches!(
            rgb_from_raw(4, 4, vec![0; 10]),
            Err(PipelineError::CaptureFailed(_))
        ));
        assert!(rgb_from_raw(4, 4, vec![0; 48]).is_ok());
    }

    #[test]
    fn test_encode_jpeg_keeps_native_size() {
        let data = encode_jpeg(&gradient(64, 36), 70).unwrap();
        let decoded = image::load_from_memory_with_format(&data, ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (64, 36));
    }

    #[test]
    fn test_encode_square_output_geometry() {
        let (data, edge) = encode_square(&gradient(160, 90), 64, 90).unwrap();
        assert_eq!(edge, 64);
        let decoded = image::load_from_memory_with_format(&data, ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (64, 64));
    }

    #[test]
    fn test_encode_square_rejects_empty() {
        assert!(encode_square(&RgbImage::new(0, 0), 64, 90).is_err());
    }
}
