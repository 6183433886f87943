//! GPU Abstraction Layer
//!
//! Typed opaque handles over a backend contract sufficient for a
//! WebGPU-family implementation: resource CRUD, VRAM accounting with
//! budgets, a bucketed buffer pool, a unified draw-command model, the
//! per-frame hot-path cache, and device-loss recovery.
//!
//! # Module Map
//!
//! - [`handle`] — branded handle kinds for the eight GPU object classes
//! - [`format`] — texture format sizing, row-pitch alignment, premultiply
//! - [`vram`] — per-category budgets and the centralised bucket formula
//! - [`backend`] — the backend trait, descriptors, capabilities
//! - [`draw`] — draw commands and the one-shot builder
//! - [`encoder`] — the within-frame redundancy filter and handle cache
//! - [`null`] — headless recording backend (tests, CI)
//! - [`recovery`] — resource registry + device-loss recovery state machine
//! - [`wgpu_backend`] — the concrete wgpu implementation
//! - [`profiler`] — double-buffered GPU timestamp readback

pub mod backend;
pub mod draw;
pub mod encoder;
pub mod format;
pub mod handle;
pub mod null;
pub mod profiler;
pub mod recovery;
pub mod vram;
pub mod wgpu_backend;

pub use backend::{
    BackendConfig, BindingKind, BindingResource, BlendMode, BufferDesc, BufferKind, Capabilities,
    CompressedFamilies, CullMode, DepthOps, FramebufferDesc, GpuBackend, PassSubmission,
    PassTarget, PipelineDesc, SamplerDesc, TextureDesc, VertexAttribute, VertexFormat,
    VertexLayout,
};
pub use draw::{DrawCommand, DrawCommandBuilder, Geometry, IndexFormat, MAX_BIND_SLOT};
pub use encoder::{FrameCache, FrameCacheStats};
pub use format::TextureFormat;
pub use handle::{
    BindGroupHandle, BindGroupLayoutHandle, BufferHandle, FramebufferHandle, PipelineHandle,
    SamplerHandle, ShaderHandle, TextureHandle,
};
pub use null::NullBackend;
pub use recovery::{RecoveryConfig, RecoveryManager, RecoveryPhase, ResourceRegistry};
pub use vram::{bucket_size, VramAccounting, VramBudgets, VramCategory, MAX_BUCKET, MIN_BUCKET};
pub use wgpu_backend::WgpuBackend;
