//! Canonical lossy encoding.
//!
//! Every raster variant is stored as WebP. The encoder works on RGBA buffers,
//! so images are converted first regardless of their decoded color type.

use bytes::Bytes;
use image::{DynamicImage, GenericImageView};

use crate::error::TranscodeError;

pub struct WebpEncoder;

impl WebpEncoder {
    /// Encode `img` as lossy WebP at `quality` (1-100).
    pub fn encode(img: &DynamicImage, quality: u8) -> Result<Bytes, TranscodeError> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(TranscodeError::Encode("image has no pixels".to_string()));
        }

        let rgba_img = img.to_rgba8();
        let encoder = webp::Encoder::from_rgba(&rgba_img, width, height);
        let webp_data = encoder.encode(f32::from(quality.clamp(1, 100)));

        if webp_data.is_empty() {
            return Err(TranscodeError::Encode(format!(
                "WebP encoder produced no output for {}x{}",
                width, height
            )));
        }

        Ok(Bytes::copy_from_slice(&webp_data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_encode_produces_webp_container() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 20, Rgba([10, 200, 30, 255])));
        let data = WebpEncoder::encode(&img, 80).unwrap();
        assert_eq!(&data[0..4], b"RIFF");
        assert_eq!(&data[8..12], b"WEBP");

        let decoded = image::load_from_memory(&data).unwrap();
        assert_eq!(decoded.dimensions(), (40, 20));
    }

    #[test]
    fn test_lower_quality_is_not_larger() {
        let mut img = RgbaImage::new(64, 64);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgba([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8, 255]);
        }
        let img = DynamicImage::ImageRgba8(img);
        let high = WebpEncoder::encode(&img, 95).unwrap();
        let low = WebpEncoder::encode(&img, 20).unwrap();
        assert!(low.len() <= high.len());
    }
}
