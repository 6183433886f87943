//! Renderer Tunables
//!
//! Every runtime knob in one place, with clamped setters so a UI slider
//! can never push a parameter out of its domain. The
//! [`RetroPostProcessor`] facade exposes just the post-processing subset.

use crate::render::params::CrtParams;

/// The fifteen CRT parameters.
#[derive(Debug, Clone)]
pub struct CrtSettings {
    pub master_intensity: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub scanlines_strength: f32,
    pub beam_width_min: f32,
    pub beam_width_max: f32,
    pub beam_shape: f32,
    pub mask_intensity: f32,
    pub mask_type: u32,
    pub curvature: f32,
    pub vignette: f32,
    pub corner_radius: f32,
    pub color_overflow: f32,
    pub gamma: f32,
}

impl Default for CrtSettings {
    fn default() -> Self {
        Self {
            master_intensity: 1.0,
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            scanlines_strength: 0.55,
            beam_width_min: 0.6,
            beam_width_max: 1.2,
            beam_shape: 2.0,
            mask_intensity: 0.25,
            mask_type: 0,
            curvature: 0.035,
            vignette: 0.25,
            corner_radius: 0.02,
            color_overflow: 0.15,
            gamma: 2.2,
        }
    }
}

impl CrtSettings {
    /// Packs the settings into the shader block.
    #[must_use]
    pub fn to_params(&self, output_w: u32, output_h: u32, source_w: u32, source_h: u32) -> CrtParams {
        CrtParams {
            resolution: [output_w as f32, output_h as f32],
            source_size: [source_w as f32, source_h as f32],
            master_intensity: self.master_intensity,
            brightness: self.brightness,
            contrast: self.contrast,
            saturation: self.saturation,
            scanlines_strength: self.scanlines_strength,
            beam_width_min: self.beam_width_min,
            beam_width_max: self.beam_width_max,
            beam_shape: self.beam_shape,
            mask_intensity: self.mask_intensity,
            mask_type: self.mask_type as f32,
            curvature: self.curvature,
            vignette: self.vignette,
            corner_radius: self.corner_radius,
            color_overflow: self.color_overflow,
            _pad: [0.0; 6],
        }
    }
}

/// All runtime-settable renderer state.
#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub wireframe: bool,

    pub light_azimuth: f32,
    pub light_elevation: f32,
    pub light_intensity: f32,

    bloom_threshold: f32,
    bloom_intensity: f32,
    bloom_mip_levels: u32,

    grain_amount: f32,
    gamma: f32,

    pub crt_enabled: bool,
    pub crt: CrtSettings,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            wireframe: false,
            light_azimuth: 0.8,
            light_elevation: 0.9,
            light_intensity: 1.0,
            bloom_threshold: 1.0,
            bloom_intensity: 0.35,
            bloom_mip_levels: 4,
            grain_amount: 0.03,
            gamma: 2.2,
            crt_enabled: true,
            crt: CrtSettings::default(),
        }
    }
}

impl RendererSettings {
    #[must_use]
    pub fn bloom_threshold(&self) -> f32 {
        self.bloom_threshold
    }

    pub fn set_bloom_threshold(&mut self, threshold: f32) {
        self.bloom_threshold = threshold.max(0.0);
    }

    #[must_use]
    pub fn bloom_intensity(&self) -> f32 {
        self.bloom_intensity
    }

    pub fn set_bloom_intensity(&mut self, intensity: f32) {
        self.bloom_intensity = intensity.max(0.0);
    }

    #[must_use]
    pub fn bloom_mip_levels(&self) -> u32 {
        self.bloom_mip_levels
    }

    /// Clamped to the supported 1..=5 pyramid depth.
    pub fn set_bloom_mip_levels(&mut self, levels: u32) {
        self.bloom_mip_levels = levels.clamp(1, 5);
    }

    #[must_use]
    pub fn grain_amount(&self) -> f32 {
        self.grain_amount
    }

    pub fn set_grain_amount(&mut self, amount: f32) {
        self.grain_amount = amount.clamp(0.0, 1.0);
    }

    #[must_use]
    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    pub fn set_gamma(&mut self, gamma: f32) {
        self.gamma = gamma.clamp(0.1, 5.0);
    }
}

/// Thin facade over the post-processing subset of the settings, handed out
/// by the renderer so UI code does not touch the rest.
pub struct RetroPostProcessor<'a> {
    settings: &'a mut RendererSettings,
}

impl<'a> RetroPostProcessor<'a> {
    pub(crate) fn new(settings: &'a mut RendererSettings) -> Self {
        Self { settings }
    }

    pub fn set_bloom_threshold(&mut self, threshold: f32) {
        self.settings.set_bloom_threshold(threshold);
    }

    pub fn set_bloom_intensity(&mut self, intensity: f32) {
        self.settings.set_bloom_intensity(intensity);
    }

    pub fn set_bloom_mip_levels(&mut self, levels: u32) {
        self.settings.set_bloom_mip_levels(levels);
    }

    pub fn set_grain_amount(&mut self, amount: f32) {
        self.settings.set_grain_amount(amount);
    }

    pub fn set_gamma(&mut self, gamma: f32) {
        self.settings.set_gamma(gamma);
    }

    pub fn set_crt_enabled(&mut self, enabled: bool) {
        self.settings.crt_enabled = enabled;
    }

    pub fn crt(&mut self) -> &mut CrtSettings {
        &mut self.settings.crt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_levels_clamped() {
        let mut settings = RendererSettings::default();
        settings.set_bloom_mip_levels(0);
        assert_eq!(settings.bloom_mip_levels(), 1);
        settings.set_bloom_mip_levels(9);
        assert_eq!(settings.bloom_mip_levels(), 5);
    }

    #[test]
    fn facade_forwards() {
        let mut settings = RendererSettings::default();
        {
            let mut post = RetroPostProcessor::new(&mut settings);
            post.set_gamma(1.8);
            post.set_crt_enabled(false);
            post.crt().master_intensity = 0.5;
        }
        assert!((settings.gamma() - 1.8).abs() < f32::EPSILON);
        assert!(!settings.crt_enabled);
        assert!((settings.crt.master_intensity - 0.5).abs() < f32::EPSILON);
    }
}
