//! Post-Process Parameter Blocks
//!
//! Fixed-size UBO layouts with explicit padding. The shader side consumes
//! raw bytes, so field order and padding here are load-bearing — the
//! compile-time size assertions below pin every layout.

use bytemuck::{Pod, Zeroable};

/// Camera block: view-projection, eye, and the pad that keeps the struct a
/// multiple of 16 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniforms {
    pub view_proj: [f32; 16],
    pub eye: [f32; 3],
    pub _pad: f32,
}

const _: () = assert!(std::mem::size_of::<CameraUniforms>() == 80);

/// Luminance-threshold extract parameters.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BloomExtractParams {
    pub threshold: f32,
    pub _pad: [f32; 7],
}

const _: () = assert!(std::mem::size_of::<BloomExtractParams>() == 32);

/// 13-tap downsample parameters. `texel_size` is `1/srcWidth, 1/srcHeight`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DownsampleParams {
    pub texel_size: [f32; 2],
    pub _pad: [f32; 6],
}

const _: () = assert!(std::mem::size_of::<DownsampleParams>() == 32);

/// 3×3 tent upsample parameters with the per-level blend factor.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct UpsampleParams {
    pub texel_size: [f32; 2],
    pub blend_factor: f32,
    pub _pad: [f32; 5],
}

const _: () = assert!(std::mem::size_of::<UpsampleParams>() == 32);

/// Scene + bloom + grain composite parameters.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CompositeParams {
    pub bloom_intensity: f32,
    pub grain_amount: f32,
    pub gamma: f32,
    pub dither_pattern: u32,
    pub time: f32,
    pub _pad: [f32; 7],
}

const _: () = assert!(std::mem::size_of::<CompositeParams>() == 48);

/// The CRT block: 24 floats.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CrtParams {
    pub resolution: [f32; 2],
    pub source_size: [f32; 2],
    pub master_intensity: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub scanlines_strength: f32,
    pub beam_width_min: f32,
    pub beam_width_max: f32,
    pub beam_shape: f32,
    pub mask_intensity: f32,
    pub mask_type: f32,
    pub curvature: f32,
    pub vignette: f32,
    pub corner_radius: f32,
    pub color_overflow: f32,
    pub _pad: [f32; 6],
}

const _: () = assert!(std::mem::size_of::<CrtParams>() == 96);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn composite_field_order() {
        assert_eq!(offset_of!(CompositeParams, bloom_intensity), 0);
        assert_eq!(offset_of!(CompositeParams, grain_amount), 4);
        assert_eq!(offset_of!(CompositeParams, gamma), 8);
        assert_eq!(offset_of!(CompositeParams, dither_pattern), 12);
        assert_eq!(offset_of!(CompositeParams, time), 16);
    }

    #[test]
    fn crt_block_is_24_floats() {
        assert_eq!(std::mem::size_of::<CrtParams>(), 24 * 4);
        assert_eq!(offset_of!(CrtParams, resolution), 0);
        assert_eq!(offset_of!(CrtParams, source_size), 8);
        assert_eq!(offset_of!(CrtParams, master_intensity), 16);
        assert_eq!(offset_of!(CrtParams, color_overflow), 68);
        assert_eq!(offset_of!(CrtParams, _pad), 72);
    }

    #[test]
    fn upsample_blend_factor_follows_texel_size() {
        assert_eq!(offset_of!(UpsampleParams, texel_size), 0);
        assert_eq!(offset_of!(UpsampleParams, blend_factor), 8);
    }
}
