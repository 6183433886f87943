//! Render-Mode Classification
//!
//! Material groups are partitioned into four draw phases. The rules, in
//! precedence order:
//!
//! 1. A texture or material name containing an effect keyword (`fx`,
//!    `effect`, `burst`, `glow`, `beam`, `laser`, `particle`, any case)
//!    draws additive.
//! 2. An explicit `dissolve < 1` or an alpha map draws alpha-blended.
//! 3. Detected texture transparency (> 1 % translucent pixels) draws
//!    alpha-blended — except PNG-sourced textures that did not opt into
//!    blending, which default to alpha-cutout.
//! 4. Everything else is opaque.

use glam::Vec3;

/// Draw phase of a material group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderMode {
    Opaque,
    AlphaCutout,
    AlphaBlend,
    Additive,
}

/// Keywords that force the additive phase.
const ADDITIVE_KEYWORDS: [&str; 7] = ["fx", "effect", "burst", "glow", "beam", "laser", "particle"];

/// Alpha-cutout discard threshold used by the scene shaders.
pub const ALPHA_CUTOUT_THRESHOLD: f32 = 0.1;

/// What classification needs to know about a material group.
#[derive(Debug, Clone)]
pub struct MaterialInfo {
    pub name: String,
    pub texture_name: Option<String>,
    /// `1.0` = fully opaque (wavefront `d`).
    pub dissolve: f32,
    pub has_alpha_map: bool,
    /// More than 1 % of texture pixels are translucent.
    pub texture_has_transparency: bool,
    /// Source image was a PNG.
    pub texture_is_png: bool,
}

impl Default for MaterialInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            texture_name: None,
            dissolve: 1.0,
            has_alpha_map: false,
            texture_has_transparency: false,
            texture_is_png: false,
        }
    }
}

fn matches_additive(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ADDITIVE_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Applies the classification rules.
#[must_use]
pub fn classify_material(info: &MaterialInfo) -> RenderMode {
    if matches_additive(&info.name)
        || info.texture_name.as_deref().is_some_and(matches_additive)
    {
        return RenderMode::Additive;
    }
    if info.dissolve < 1.0 || info.has_alpha_map {
        return RenderMode::AlphaBlend;
    }
    if info.texture_has_transparency {
        // PNGs without an explicit blending opt-in cut out instead of
        // blending, which keeps depth writes on for foliage-style content.
        if info.texture_is_png {
            return RenderMode::AlphaCutout;
        }
        return RenderMode::AlphaBlend;
    }
    RenderMode::Opaque
}

/// Sorts group indices back-to-front by squared centroid distance to the
/// eye (for the blend and additive phases).
pub fn sort_back_to_front(centroids: &[Vec3], eye: Vec3, indices: &mut [usize]) {
    indices.sort_by(|&a, &b| {
        let da = centroids[a].distance_squared(eye);
        let db = centroids[b].distance_squared(eye);
        db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
    });
}
