//! Backend Contract
//!
//! The trait a graphics implementation fulfils: initialization with
//! capability probing, frame bracketing, pass execution, and CRUD for the
//! eight GPU object classes. Handles are opaque branded ids; the engine
//! never touches a concrete API type outside a backend module.

use smallvec::SmallVec;
use xxhash_rust::xxh3::Xxh3;

use crate::errors::Result;
use crate::gpu::draw::DrawCommand;
use crate::gpu::format::TextureFormat;
use crate::gpu::handle::{
    BindGroupHandle, BindGroupLayoutHandle, BufferHandle, FramebufferHandle, PipelineHandle,
    SamplerHandle, ShaderHandle, TextureHandle,
};
use crate::gpu::vram::{VramAccounting, VramBudgets};

bitflags::bitflags! {
    /// Compressed-texture family support reported by the adapter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CompressedFamilies: u32 {
        const BC = 1 << 0;
        const ETC2 = 1 << 1;
        const ASTC = 1 << 2;
    }
}

/// What the adapter/device can do.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub compute: bool,
    pub max_texture_size: u32,
    pub max_uniform_buffer_size: u64,
    pub max_vertex_attributes: u32,
    pub max_color_attachments: u32,
    pub max_compute_workgroups_per_dimension: u32,
    pub anisotropy: bool,
    pub compressed: CompressedFamilies,
    pub timestamp_queries: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            compute: true,
            max_texture_size: 8192,
            max_uniform_buffer_size: 64 * 1024,
            max_vertex_attributes: 16,
            max_color_attachments: 8,
            max_compute_workgroups_per_dimension: 65_535,
            anisotropy: true,
            compressed: CompressedFamilies::empty(),
            timestamp_queries: false,
        }
    }
}

/// Backend initialization parameters.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Internal render resolution.
    pub width: u32,
    pub height: u32,
    pub vram_budgets: VramBudgets,
    /// Request timestamp-query support when available.
    pub enable_profiling: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            vram_budgets: VramBudgets::default(),
            enable_profiling: false,
        }
    }
}

// ============================================================================
// Resource descriptors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
    Storage,
}

#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub label: String,
    pub kind: BufferKind,
    pub size: u64,
    /// Dynamic vertex/index buffers route through the bucketed pool.
    pub dynamic: bool,
}

#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub mip_level_count: u32,
    pub render_target: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

#[derive(Debug, Clone)]
pub struct SamplerDesc {
    pub label: String,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub address_mode: AddressMode,
    pub anisotropy_clamp: u16,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            label: String::new(),
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            address_mode: AddressMode::ClampToEdge,
            anisotropy_clamp: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FramebufferDesc {
    pub label: String,
    pub color: SmallVec<[TextureHandle; 4]>,
    pub depth: Option<TextureHandle>,
}

/// What a bind-group layout slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    UniformBuffer,
    StorageBuffer,
    Sampler,
    Texture,
}

#[derive(Debug, Clone)]
pub struct BindGroupLayoutDesc {
    pub label: String,
    /// `(slot, kind)` pairs.
    pub entries: SmallVec<[(u32, BindingKind); 8]>,
}

/// A concrete resource bound into a bind-group slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingResource {
    Buffer(BufferHandle),
    Sampler(SamplerHandle),
    Texture {
        texture: TextureHandle,
        sampler: Option<SamplerHandle>,
    },
}

// ============================================================================
// Pipelines
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    F32,
    F32x2,
    F32x3,
    F32x4,
    U8x4Norm,
    U16x2,
    U32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub name: String,
    pub format: VertexFormat,
    /// Scalar count of the attribute, folded into the layout hash.
    pub components: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// xxh3 over attribute name, element type, element count, offset, and
    /// stride — the layout component of the pipeline cache key.
    #[must_use]
    pub fn hash64(&self) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(&self.stride.to_le_bytes());
        for attr in &self.attributes {
            hasher.update(attr.name.as_bytes());
            hasher.update(&(attr.format as u32).to_le_bytes());
            hasher.update(&attr.components.to_le_bytes());
            hasher.update(&attr.offset.to_le_bytes());
        }
        hasher.digest()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// No blending.
    Replace,
    /// Premultiplied alpha: `(One, OneMinusSrcAlpha)`.
    Premultiplied,
    /// Classic additive: `(SrcAlpha, One)`.
    Additive,
    /// Full additive accumulation: `(One, One)`.
    AdditiveFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Back,
    Front,
}

#[derive(Debug, Clone)]
pub struct PipelineDesc {
    pub label: String,
    pub shader: ShaderHandle,
    pub vertex_layout: VertexLayout,
    pub instanced: bool,
    pub bind_group_layouts: SmallVec<[BindGroupLayoutHandle; 4]>,
    pub blend: BlendMode,
    pub depth_write: bool,
    pub depth_test: bool,
    pub cull: CullMode,
    pub color_targets: SmallVec<[TextureFormat; 4]>,
    pub wireframe: bool,
}

/// Render pipeline cache key: `(shader, hashed vertex layout, instanced)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub shader: ShaderHandle,
    pub layout_hash: u64,
    pub instanced: bool,
}

impl PipelineKey {
    #[must_use]
    pub fn of(desc: &PipelineDesc) -> Self {
        Self {
            shader: desc.shader,
            layout_hash: desc.vertex_layout.hash64(),
            instanced: desc.instanced,
        }
    }
}

// ============================================================================
// Pass submission
// ============================================================================

/// Where a pass renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassTarget {
    /// The backend's presentation target.
    Swapchain,
    Framebuffer(FramebufferHandle),
}

#[derive(Debug, Clone, Copy)]
pub struct DepthOps {
    /// Clear value; `None` loads the existing depth.
    pub clear: Option<f32>,
}

/// One render or compute pass with its ordered command list. The backend
/// must preserve command order within the submitted frame.
#[derive(Debug, Clone)]
pub struct PassSubmission {
    pub label: String,
    pub target: PassTarget,
    /// Clear color; `None` = load the existing contents.
    pub clear_color: Option<[f64; 4]>,
    pub depth: Option<DepthOps>,
    pub commands: Vec<DrawCommand>,
}

// ============================================================================
// The backend trait
// ============================================================================

/// A graphics backend. All calls happen on the main thread.
pub trait GpuBackend {
    /// Brings the device up. Returns `false` when the host has no usable
    /// adapter (the embedder shows remediation and stops the frame loop).
    fn initialize(&mut self, config: &BackendConfig) -> Result<bool>;

    fn capabilities(&self) -> Capabilities;

    fn begin_frame(&mut self) -> Result<()>;

    /// Executes passes in order; commands keep their submission order.
    fn execute(&mut self, passes: &[PassSubmission]) -> Result<()>;

    fn end_frame(&mut self) -> Result<()>;

    fn resize(&mut self, width: u32, height: u32);

    // ---- Shaders -----------------------------------------------------------

    fn create_shader(&mut self, label: &str, source: &str) -> Result<ShaderHandle>;
    fn destroy_shader(&mut self, handle: ShaderHandle);

    // ---- Buffers -----------------------------------------------------------

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle>;
    fn write_buffer(&mut self, handle: BufferHandle, offset: u64, data: &[u8]) -> Result<()>;
    fn destroy_buffer(&mut self, handle: BufferHandle);

    // ---- Textures ----------------------------------------------------------

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle>;
    /// Uploads RGBA8 (or format-matching) data; the backend applies the
    /// 256-byte row alignment and premultiplication rules.
    fn upload_texture(&mut self, handle: TextureHandle, data: &[u8]) -> Result<()>;
    fn destroy_texture(&mut self, handle: TextureHandle);

    // ---- Samplers ----------------------------------------------------------

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerHandle>;
    fn destroy_sampler(&mut self, handle: SamplerHandle);

    // ---- Framebuffers ------------------------------------------------------

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferHandle>;
    fn destroy_framebuffer(&mut self, handle: FramebufferHandle);

    // ---- Bind groups -------------------------------------------------------

    fn create_bind_group_layout(&mut self, desc: &BindGroupLayoutDesc) -> Result<BindGroupLayoutHandle>;
    fn destroy_bind_group_layout(&mut self, handle: BindGroupLayoutHandle);

    /// Creates a bind group, validating each `(slot, resource)` against the
    /// layout.
    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindingResource)],
    ) -> Result<BindGroupHandle>;
    fn destroy_bind_group(&mut self, handle: BindGroupHandle);

    // ---- Pipelines ---------------------------------------------------------

    /// Creates or returns the cached pipeline for the descriptor's
    /// [`PipelineKey`].
    fn create_render_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineHandle>;
    fn create_compute_pipeline(&mut self, label: &str, shader: ShaderHandle) -> Result<PipelineHandle>;
    fn destroy_pipeline(&mut self, handle: PipelineHandle);

    // ---- Accounting --------------------------------------------------------

    fn vram(&self) -> &VramAccounting;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(names: &[&str]) -> VertexLayout {
        VertexLayout {
            stride: 32,
            attributes: names
                .iter()
                .enumerate()
                .map(|(i, n)| VertexAttribute {
                    name: (*n).to_string(),
                    format: VertexFormat::F32x3,
                    components: 3,
                    offset: (i * 12) as u32,
                })
                .collect(),
        }
    }

    #[test]
    fn layout_hash_is_stable_and_discriminating() {
        let a = layout(&["position", "normal"]);
        let b = layout(&["position", "normal"]);
        assert_eq!(a.hash64(), b.hash64());

        let renamed = layout(&["position", "tangent"]);
        assert_ne!(a.hash64(), renamed.hash64());

        let mut restrided = layout(&["position", "normal"]);
        restrided.stride = 48;
        assert_ne!(a.hash64(), restrided.hash64());

        let mut moved = layout(&["position", "normal"]);
        moved.attributes[1].offset = 16;
        assert_ne!(a.hash64(), moved.hash64());
    }
}
