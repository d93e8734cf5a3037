use image::metadata::Orientation;
use image::DynamicImage;
use std::io::Cursor;

/// EXIF orientation handling (rotation and flipping)
pub struct ImageOrientation;

impl ImageOrientation {
    /// Read the EXIF orientation tag (1-8) from encoded image bytes.
    ///
    /// Returns 1 (normal) when the container has no EXIF block or no
    /// orientation field.
    pub fn read_exif_orientation(data: &[u8]) -> u8 {
        let mut cursor = Cursor::new(data);
        let exif = match exif::Reader::new().read_from_container(&mut cursor) {
            Ok(exif) => exif,
            Err(_) => return 1,
        };

        exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .filter(|v| (1..=8).contains(v))
            .map(|v| v as u8)
            .unwrap_or(1)
    }

    /// Rotate/flip a decoded image so it displays upright.
    pub fn apply_exif_orientation(mut img: DynamicImage, data: &[u8]) -> DynamicImage {
        let orientation = Self::read_exif_orientation(data);
        if orientation == 1 {
            return img;
        }

        if let Some(transform) = Orientation::from_exif(orientation) {
            tracing::debug!(orientation, "Applying EXIF orientation");
            img.apply_orientation(transform);
        }
        img
    }
}
