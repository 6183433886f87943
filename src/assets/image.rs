//! Image Decoding
//!
//! Decodes fetched bytes to RGBA8, caps the result at 256×256 preserving
//! aspect, and records the transparency statistics the upload and
//! classification paths consume.

use image::imageops::FilterType;
use image::GenericImageView;

use crate::errors::Result;
use crate::gpu::format::has_meaningful_transparency;

/// Textures are capped at this dimension, aspect-preserving.
pub const MAX_TEXTURE_DIMENSION: u32 = 256;

/// Decoded, capped RGBA8 pixels.
#[derive(Debug, Clone)]
pub struct ImagePixels {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// More than 1 % of pixels are translucent.
    pub has_transparency: bool,
    /// The source container was PNG.
    pub is_png: bool,
}

impl ImagePixels {
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }
}

/// Decodes `bytes` into capped RGBA8.
pub fn decode_rgba8(bytes: &[u8]) -> Result<ImagePixels> {
    let is_png = image::guess_format(bytes)
        .map(|f| f == image::ImageFormat::Png)
        .unwrap_or(false);

    let mut decoded = image::load_from_memory(bytes)?;

    let (width, height) = decoded.dimensions();
    if width > MAX_TEXTURE_DIMENSION || height > MAX_TEXTURE_DIMENSION {
        let scale = f64::from(MAX_TEXTURE_DIMENSION) / f64::from(width.max(height));
        let new_w = ((f64::from(width) * scale) as u32).max(1);
        let new_h = ((f64::from(height) * scale) as u32).max(1);
        decoded = decoded.resize_exact(new_w, new_h, FilterType::Triangle);
    }

    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let data = rgba.into_raw();
    let has_transparency = has_meaningful_transparency(&data);

    Ok(ImagePixels {
        width,
        height,
        data,
        has_transparency,
        is_png,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_png(width: u32, height: u32, alpha: u8) -> Vec<u8> {
        let mut img = image::RgbaImage::new(width, height);
        for pixel in img.pixels_mut() {
            *pixel = image::Rgba([200, 100, 50, alpha]);
        }
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn oversize_images_are_capped_preserving_aspect() {
        let bytes = encode_png(512, 256, 255);
        let pixels = decode_rgba8(&bytes).unwrap();
        assert_eq!((pixels.width, pixels.height), (256, 128));
        assert!(pixels.is_png);
    }

    #[test]
    fn transparency_is_detected() {
        let opaque = decode_rgba8(&encode_png(8, 8, 255)).unwrap();
        assert!(!opaque.has_transparency);

        let translucent = decode_rgba8(&encode_png(8, 8, 100)).unwrap();
        assert!(translucent.has_transparency);
    }

    #[test]
    fn small_images_untouched() {
        let bytes = encode_png(16, 32, 255);
        let pixels = decode_rgba8(&bytes).unwrap();
        assert_eq!((pixels.width, pixels.height), (16, 32));
        assert_eq!(pixels.data.len(), 16 * 32 * 4);
    }
}
