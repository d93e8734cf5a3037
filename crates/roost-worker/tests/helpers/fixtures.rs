use bytes::Bytes;
use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;

/// Solid-colour PNG of the given size.
pub fn png(width: u32, height: u32) -> Bytes {
    let img = RgbaImage::from_pixel(width, height, Rgba([200, 120, 40, 255]));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .expect("encode png fixture");
    Bytes::from(buffer)
}

pub fn jpeg(width: u32, height: u32) -> Bytes {
    let img = RgbImage::from_pixel(width, height, Rgb([30, 80, 160]));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
        .expect("encode jpeg fixture");
    Bytes::from(buffer)
}

/// Smallest thing that passes as a PDF upload.
pub fn pdf() -> Bytes {
    Bytes::from_static(b"%PDF-1.4\n1 0 obj << /Type /Catalog >> endobj\ntrailer << >>\n%%EOF\n")
}
