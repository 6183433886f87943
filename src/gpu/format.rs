//! Texture Format Sizing and Upload Rules
//!
//! The bytes-per-pixel lookup is exhaustive over the non-compressed formats
//! and *throws* for block-compressed ones — a silent wrong answer there
//! corrupts every row-pitch computation downstream. Compressed formats go
//! through the block-size path instead.

use crate::errors::{CathodeError, Result};

/// Upload row alignment required by WebGPU-family APIs.
pub const ROW_ALIGNMENT: u32 = 256;

/// Fraction of translucent pixels above which premultiplication applies.
pub const TRANSPARENCY_THRESHOLD: f64 = 0.01;

/// Texture formats the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgba32Float,
    Depth24Plus,
    Depth32Float,
    // Block-compressed families
    Bc1RgbaUnorm,
    Bc3RgbaUnorm,
    Bc7RgbaUnorm,
    Etc2Rgb8Unorm,
    Astc4x4Unorm,
}

impl TextureFormat {
    /// Bytes per pixel for uncompressed formats.
    ///
    /// Fails with [`CathodeError::CompressedFormat`] for block-compressed
    /// formats; callers working with those must use
    /// [`block_info`](Self::block_info).
    pub fn bytes_per_pixel(self) -> Result<u32> {
        match self {
            TextureFormat::R8Unorm => Ok(1),
            TextureFormat::Rg8Unorm => Ok(2),
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb | TextureFormat::Bgra8Unorm => Ok(4),
            TextureFormat::R16Float => Ok(2),
            TextureFormat::Rg16Float => Ok(4),
            TextureFormat::Rgba16Float => Ok(8),
            TextureFormat::R32Float => Ok(4),
            TextureFormat::Rg32Float => Ok(8),
            TextureFormat::Rgba32Float => Ok(16),
            TextureFormat::Depth24Plus | TextureFormat::Depth32Float => Ok(4),
            TextureFormat::Bc1RgbaUnorm => Err(CathodeError::CompressedFormat("Bc1RgbaUnorm")),
            TextureFormat::Bc3RgbaUnorm => Err(CathodeError::CompressedFormat("Bc3RgbaUnorm")),
            TextureFormat::Bc7RgbaUnorm => Err(CathodeError::CompressedFormat("Bc7RgbaUnorm")),
            TextureFormat::Etc2Rgb8Unorm => Err(CathodeError::CompressedFormat("Etc2Rgb8Unorm")),
            TextureFormat::Astc4x4Unorm => Err(CathodeError::CompressedFormat("Astc4x4Unorm")),
        }
    }

    /// `(block_width, block_height, bytes_per_block)` for compressed
    /// formats, `None` for uncompressed ones.
    #[must_use]
    pub fn block_info(self) -> Option<(u32, u32, u32)> {
        match self {
            TextureFormat::Bc1RgbaUnorm => Some((4, 4, 8)),
            TextureFormat::Bc3RgbaUnorm | TextureFormat::Bc7RgbaUnorm => Some((4, 4, 16)),
            TextureFormat::Etc2Rgb8Unorm => Some((4, 4, 8)),
            TextureFormat::Astc4x4Unorm => Some((4, 4, 16)),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_compressed(self) -> bool {
        self.block_info().is_some()
    }

    #[must_use]
    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth24Plus | TextureFormat::Depth32Float)
    }

    /// Total bytes for a `w × h` image of this format (block-rounded for
    /// compressed formats).
    pub fn byte_size(self, width: u32, height: u32) -> Result<u64> {
        if let Some((bw, bh, bytes)) = self.block_info() {
            let blocks_x = width.div_ceil(bw) as u64;
            let blocks_y = height.div_ceil(bh) as u64;
            return Ok(blocks_x * blocks_y * u64::from(bytes));
        }
        Ok(u64::from(width) * u64::from(height) * u64::from(self.bytes_per_pixel()?))
    }
}

/// Row pitch padded to the 256-byte upload alignment:
/// `ceil(w · bpp / 256) · 256`.
#[must_use]
pub fn aligned_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
    (width * bytes_per_pixel).div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT
}

/// Fraction of pixels with alpha below 255 in an RGBA8 image.
#[must_use]
pub fn transparency_ratio(rgba: &[u8]) -> f64 {
    let pixels = rgba.len() / 4;
    if pixels == 0 {
        return 0.0;
    }
    let translucent = rgba.chunks_exact(4).filter(|p| p[3] < 255).count();
    translucent as f64 / pixels as f64
}

/// Whether more than 1 % of pixels carry meaningful transparency.
#[must_use]
pub fn has_meaningful_transparency(rgba: &[u8]) -> bool {
    transparency_ratio(rgba) > TRANSPARENCY_THRESHOLD
}

/// Multiplies alpha into RGB in place. Applied on upload when the source is
/// flagged as meaningfully transparent, so the renderer can blend with
/// `(One, OneMinusSrcAlpha)` without dark fringes.
pub fn premultiply_alpha(rgba: &mut [u8]) {
    for pixel in rgba.chunks_exact_mut(4) {
        let a = u32::from(pixel[3]);
        if a < 255 {
            pixel[0] = ((u32::from(pixel[0]) * a) / 255) as u8;
            pixel[1] = ((u32::from(pixel[1]) * a) / 255) as u8;
            pixel[2] = ((u32::from(pixel[2]) * a) / 255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpp_lookup_is_exact_for_uncompressed() {
        assert_eq!(TextureFormat::Rgba8Unorm.bytes_per_pixel().unwrap(), 4);
        assert_eq!(TextureFormat::Rgba16Float.bytes_per_pixel().unwrap(), 8);
        assert_eq!(TextureFormat::R8Unorm.bytes_per_pixel().unwrap(), 1);
    }

    #[test]
    fn bpp_lookup_throws_for_compressed() {
        assert!(matches!(
            TextureFormat::Bc7RgbaUnorm.bytes_per_pixel(),
            Err(CathodeError::CompressedFormat(_))
        ));
        // The block path serves them instead
        assert_eq!(TextureFormat::Bc7RgbaUnorm.block_info(), Some((4, 4, 16)));
    }

    #[test]
    fn compressed_byte_size_rounds_to_blocks() {
        // 5×5 BC1 → 2×2 blocks of 8 bytes
        assert_eq!(TextureFormat::Bc1RgbaUnorm.byte_size(5, 5).unwrap(), 32);
    }

    #[test]
    fn row_pitch_alignment() {
        assert_eq!(aligned_bytes_per_row(64, 4), 256);
        assert_eq!(aligned_bytes_per_row(65, 4), 512);
        assert_eq!(aligned_bytes_per_row(256, 4), 1024);
        assert_eq!(aligned_bytes_per_row(1, 1), 256);
    }

    #[test]
    fn transparency_detection_threshold() {
        // 99 opaque + 1 translucent = exactly 1%, not "more than"
        let mut pixels = vec![255u8; 100 * 4];
        pixels[3] = 128;
        assert!(!has_meaningful_transparency(&pixels));
        pixels[7] = 128;
        assert!(has_meaningful_transparency(&pixels));
    }

    #[test]
    fn premultiply_scales_rgb() {
        let mut pixels = vec![200, 100, 50, 127, 200, 100, 50, 255];
        premultiply_alpha(&mut pixels);
        // First pixel scaled by 127/255, second untouched
        assert_eq!(&pixels[4..], &[200, 100, 50, 255]);
        assert_eq!(pixels[0], (200 * 127 / 255) as u8);
    }
}
