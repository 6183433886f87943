//! Branded GPU Handles
//!
//! Every GPU object class gets its own key type, so a buffer handle can
//! never be passed where a texture handle is expected. Handles are ids into
//! the owning backend's slotmaps; after destruction an id never resolves
//! again (slotmap generations make stale ids misses, not aliases).

use slotmap::new_key_type;
use slotmap::Key;

new_key_type! {
    pub struct ShaderHandle;
    pub struct BufferHandle;
    pub struct TextureHandle;
    pub struct SamplerHandle;
    pub struct FramebufferHandle;
    pub struct BindGroupLayoutHandle;
    pub struct BindGroupHandle;
    pub struct PipelineHandle;
}

/// Stable `u64` id for cache keys and diagnostics.
pub trait HandleId {
    fn id(&self) -> u64;
}

macro_rules! impl_handle_id {
    ($($ty:ty),+ $(,)?) => {
        $(impl HandleId for $ty {
            #[inline]
            fn id(&self) -> u64 {
                self.data().as_ffi()
            }
        })+
    };
}

impl_handle_id!(
    ShaderHandle,
    BufferHandle,
    TextureHandle,
    SamplerHandle,
    FramebufferHandle,
    BindGroupLayoutHandle,
    BindGroupHandle,
    PipelineHandle,
);
