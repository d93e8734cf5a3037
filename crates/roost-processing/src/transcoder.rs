//! Image transcoder
//!
//! Decodes an upload once and renders the stored variant set from it:
//! `Original` bounded to a maximum dimension with its aspect ratio kept, and
//! `Large`/`Medium`/`Thumbnail` center-cropped to fill their fixed sizes. All
//! raster output is WebP. PDFs skip transcoding and keep their bytes as the
//! single `Original` variant.
//!
//! Everything here is CPU-bound and synchronous; async callers run it on the
//! blocking pool.

use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use roost_core::constants::{CANONICAL_IMAGE_MIME, DEFAULT_ORIGINAL_MAX_DIMENSION};
use roost_core::{Config, MimeKind, Variant};
use std::collections::BTreeMap;
use std::io::Cursor;

use crate::compression::WebpEncoder;
use crate::error::TranscodeError;
use crate::orientation::ImageOrientation;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Result of [`ImageTranscoder::to_canonical`].
#[derive(Debug, Clone)]
pub struct CanonicalImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub source_format: MimeKind,
}

/// Every variant of one upload, ready to stage.
#[derive(Debug, Clone)]
pub struct TranscodedSet {
    pub variants: BTreeMap<Variant, Bytes>,
    pub source_format: MimeKind,
    /// MIME type every variant is stored with.
    pub content_type: &'static str,
    /// Dimensions of the stored `Original`; `None` for documents.
    pub original_size: Option<(u32, u32)>,
}

#[derive(Debug, Clone)]
pub struct ImageTranscoder {
    quality: u8,
    original_max_dimension: u32,
}

impl Default for ImageTranscoder {
    fn default() -> Self {
        Self::new(80, DEFAULT_ORIGINAL_MAX_DIMENSION)
    }
}

fn mime_for_format(format: ImageFormat) -> Option<MimeKind> {
    match format {
        ImageFormat::Jpeg => Some(MimeKind::Jpeg),
        ImageFormat::Png => Some(MimeKind::Png),
        ImageFormat::WebP => Some(MimeKind::Webp),
        ImageFormat::Gif => Some(MimeKind::Gif),
        _ => None,
    }
}

impl ImageTranscoder {
    pub fn new(quality: u8, original_max_dimension: u32) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            original_max_dimension: original_max_dimension.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.image_quality(), config.original_max_dimension())
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Sniff and decode, applying EXIF orientation.
    fn decode(raw: &[u8]) -> Result<(DynamicImage, MimeKind), TranscodeError> {
        if raw.is_empty() {
            return Err(TranscodeError::EmptyInput);
        }

        let reader = ImageReader::new(Cursor::new(raw))
            .with_guessed_format()
            .map_err(|e| TranscodeError::CorruptInput(e.to_string()))?;

        let format = reader
            .format()
            .ok_or_else(|| TranscodeError::UnsupportedFormat("unrecognized image data".to_string()))?;
        let source_format = mime_for_format(format)
            .ok_or_else(|| TranscodeError::UnsupportedFormat(format!("{:?}", format)))?;

        let img = reader
            .decode()
            .map_err(|e| TranscodeError::CorruptInput(e.to_string()))?;

        Ok((ImageOrientation::apply_exif_orientation(img, raw), source_format))
    }

    fn bounded(img: &DynamicImage, max_width: Option<u32>, max_dimension: Option<u32>) -> DynamicImage {
        let (width, height) = img.dimensions();

        if let Some(max_width) = max_width {
            if width > max_width {
                let new_height = ((height as u64 * max_width as u64) / width as u64).max(1) as u32;
                return img.resize_exact(max_width, new_height, FilterType::Lanczos3);
            }
        }

        if let Some(max_dim) = max_dimension {
            if width > max_dim || height > max_dim {
                // resize keeps the aspect ratio within the box
                return img.resize(max_dim, max_dim, FilterType::Lanczos3);
            }
        }

        img.clone()
    }

    /// Decode `raw`, scale it down to `max_width` if wider, and re-encode as
    /// WebP at `quality` (clamped to 1-100).
    pub fn to_canonical(
        &self,
        raw: &[u8],
        max_width: Option<u32>,
        quality: u8,
    ) -> Result<CanonicalImage, TranscodeError> {
        let (img, source_format) = Self::decode(raw)?;
        let scaled = Self::bounded(&img, max_width, None);
        let (width, height) = scaled.dimensions();
        let data = WebpEncoder::encode(&scaled, quality)?;

        Ok(CanonicalImage {
            data,
            width,
            height,
            source_format,
        })
    }

    fn crop_to_fill(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
        img.resize_to_fill(width, height, FilterType::Lanczos3)
    }

    /// Center-crop `raw` to fill exactly `width` x `height`, then encode.
    pub fn variant(&self, raw: &[u8], width: u32, height: u32) -> Result<Bytes, TranscodeError> {
        if width == 0 || height == 0 {
            return Err(TranscodeError::Encode(format!(
                "invalid variant size {}x{}",
                width, height
            )));
        }
        let (img, _) = Self::decode(raw)?;
        WebpEncoder::encode(&Self::crop_to_fill(&img, width, height), self.quality)
    }

    /// Produce every variant required for `declared`.
    ///
    /// The input is decoded once; each variant is rendered into its own
    /// buffer. Any failure drops whatever was already rendered.
    pub fn process_all(
        &self,
        raw: &[u8],
        declared: MimeKind,
        max_input_bytes: usize,
    ) -> Result<TranscodedSet, TranscodeError> {
        if raw.is_empty() {
            return Err(TranscodeError::EmptyInput);
        }
        if raw.len() > max_input_bytes {
            return Err(TranscodeError::InputTooLarge {
                size: raw.len(),
                max: max_input_bytes,
            });
        }

        if declared.is_document() {
            if !raw.starts_with(PDF_MAGIC) {
                return Err(TranscodeError::CorruptInput(
                    "declared PDF does not start with a PDF header".to_string(),
                ));
            }
            let mut variants = BTreeMap::new();
            variants.insert(Variant::Original, Bytes::copy_from_slice(raw));
            return Ok(TranscodedSet {
                variants,
                source_format: declared,
                content_type: declared.as_mime(),
                original_size: None,
            });
        }

        let (img, source_format) = Self::decode(raw)?;

        let original = Self::bounded(&img, None, Some(self.original_max_dimension));
        let original_size = original.dimensions();

        let mut variants = BTreeMap::new();
        for variant in declared.required_variants() {
            let rendered = match variant.crop_size() {
                None => WebpEncoder::encode(&original, self.quality)?,
                Some((w, h)) => WebpEncoder::encode(&Self::crop_to_fill(&img, w, h), self.quality)?,
            };
            variants.insert(*variant, rendered);
        }

        tracing::debug!(
            source_format = ?source_format,
            width = original_size.0,
            height = original_size.1,
            variants = variants.len(),
            "Transcoded upload"
        );

        Ok(TranscodedSet {
            variants,
            source_format,
            content_type: CANONICAL_IMAGE_MIME,
            original_size: Some(original_size),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([120, 60, 30, 255]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([20, 90, 200]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
            .unwrap();
        buffer
    }

    fn dims(data: &[u8]) -> (u32, u32) {
        image::load_from_memory(data).unwrap().dimensions()
    }

    #[test]
    fn test_to_canonical_scales_down_wide_input() {
        let transcoder = ImageTranscoder::default();
        let out = transcoder.to_canonical(&png(400, 200), Some(100), 80).unwrap();
        assert_eq!((out.width, out.height), (100, 50));
        assert_eq!(out.source_format, MimeKind::Png);
        assert_eq!(dims(&out.data), (100, 50));
    }

    #[test]
    fn test_to_canonical_never_upscales() {
        let transcoder = ImageTranscoder::default();
        let out = transcoder.to_canonical(&jpeg(80, 60), Some(1000), 80).unwrap();
        assert_eq!((out.width, out.height), (80, 60));
        assert_eq!(out.source_format, MimeKind::Jpeg);
    }

    #[test]
    fn test_to_canonical_honours_caller_quality() {
        let transcoder = ImageTranscoder::new(100, 1000);
        let mut img = RgbaImage::new(256, 256);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgba([(x ^ y) as u8, (x * 3 + y) as u8, (x * y) as u8, 255]);
        }
        let mut raw = Vec::new();
        img.write_to(&mut Cursor::new(&mut raw), ImageFormat::Png)
            .unwrap();

        let low = transcoder.to_canonical(&raw, None, 10).unwrap();
        let high = transcoder.to_canonical(&raw, None, 100).unwrap();
        assert!(low.data.len() < high.data.len());
        assert_eq!(dims(&low.data), (256, 256));
    }

    #[test]
    fn test_variant_is_exact_size() {
        let transcoder = ImageTranscoder::default();
        let data = transcoder.variant(&png(500, 500), 300, 200).unwrap();
        assert_eq!(dims(&data), (300, 200));
    }

    #[test]
    fn test_unsupported_and_corrupt_inputs() {
        let transcoder = ImageTranscoder::default();
        assert!(matches!(
            transcoder.to_canonical(b"plain text, not pixels", None, 80),
            Err(TranscodeError::UnsupportedFormat(_))
        ));

        let mut truncated = png(50, 50);
        truncated.truncate(40);
        assert!(matches!(
            transcoder.to_canonical(&truncated, None, 80),
            Err(TranscodeError::CorruptInput(_))
        ));
    }

    #[test]
    fn test_process_all_raster_produces_four_variants() {
        let transcoder = ImageTranscoder::new(80, 1000);
        let set = transcoder
            .process_all(&jpeg(1600, 900), MimeKind::Jpeg, 10 * 1024 * 1024)
            .unwrap();

        assert_eq!(set.variants.len(), 4);
        assert_eq!(set.content_type, "image/webp");
        assert_eq!(set.original_size, Some((1000, 563)));
        assert_eq!(dims(&set.variants[&Variant::Large]), (1200, 800));
        assert_eq!(dims(&set.variants[&Variant::Medium]), (800, 533));
        assert_eq!(dims(&set.variants[&Variant::Thumbnail]), (300, 200));
    }

    #[test]
    fn test_process_all_pdf_is_single_passthrough() {
        let transcoder = ImageTranscoder::default();
        let pdf = b"%PDF-1.4\n%fake body\n%%EOF".to_vec();
        let set = transcoder
            .process_all(&pdf, MimeKind::Pdf, 1024)
            .unwrap();

        assert_eq!(set.variants.len(), 1);
        assert_eq!(set.variants[&Variant::Original].as_ref(), pdf.as_slice());
        assert_eq!(set.content_type, "application/pdf");
        assert_eq!(set.original_size, None);
    }

    #[test]
    fn test_process_all_rejects_oversized_input() {
        let transcoder = ImageTranscoder::default();
        let data = png(10, 10);
        let result = transcoder.process_all(&data, MimeKind::Png, data.len() - 1);
        assert!(matches!(result, Err(TranscodeError::InputTooLarge { .. })));
    }

    #[test]
    fn test_process_all_rejects_fake_pdf() {
        let transcoder = ImageTranscoder::default();
        let result = transcoder.process_all(&png(10, 10), MimeKind::Pdf, 1024 * 1024);
        assert!(matches!(result, Err(TranscodeError::CorruptInput(_))));
    }
}
