//! Headless Recording Backend
//!
//! Implements the full backend contract without a GPU: resources are
//! records in slotmaps, draws become an ordered op log, and handle
//! resolution runs through the real [`FrameCache`]. The test-suite and CI
//! drive this backend to pin ordering, validation, pooling, and cache-rate
//! behaviour that would otherwise need a device.

use std::sync::Arc;

use slotmap::SlotMap;

use crate::errors::{CathodeError, Result};
use crate::gpu::backend::{
    BackendConfig, BindGroupLayoutDesc, BindingKind, BindingResource, BufferDesc, BufferKind,
    Capabilities, FramebufferDesc, GpuBackend, PassSubmission, PipelineDesc, PipelineKey,
    SamplerDesc, TextureDesc,
};
use crate::gpu::draw::Geometry;
use crate::gpu::encoder::{FrameCache, FrameCacheStats};
use crate::gpu::handle::{
    BindGroupHandle, BindGroupLayoutHandle, BufferHandle, FramebufferHandle, HandleId,
    PipelineHandle, SamplerHandle, ShaderHandle, TextureHandle,
};
use crate::gpu::vram::{bucket_size, BucketPool, VramAccounting, VramCategory};
use rustc_hash::FxHashMap;

#[derive(Debug)]
struct BufferRecord {
    desc: BufferDesc,
    /// Bytes charged to the accounting (bucket size for pooled buffers).
    charged: u64,
    category: VramCategory,
    pooled: bool,
}

#[derive(Debug)]
struct TextureRecord {
    #[allow(dead_code)]
    desc: TextureDesc,
    charged: u64,
}

/// The headless backend.
pub struct NullBackend {
    initialized: bool,
    capabilities: Capabilities,
    width: u32,
    height: u32,

    shaders: SlotMap<ShaderHandle, String>,
    buffers: SlotMap<BufferHandle, BufferRecord>,
    textures: SlotMap<TextureHandle, TextureRecord>,
    samplers: SlotMap<SamplerHandle, SamplerDesc>,
    framebuffers: SlotMap<FramebufferHandle, FramebufferDesc>,
    layouts: SlotMap<BindGroupLayoutHandle, BindGroupLayoutDesc>,
    bind_groups: SlotMap<BindGroupHandle, Vec<(u32, BindingResource)>>,
    pipelines: SlotMap<PipelineHandle, PipelineKey>,
    pipeline_cache: FxHashMap<PipelineKey, PipelineHandle>,

    vram: VramAccounting,
    pool: BucketPool<BufferHandle>,
    frame_cache: FrameCache,

    /// Ordered op log for the current frame.
    ops: Vec<String>,
    /// How many times a resolver closure actually ran.
    resolver_calls: u64,
}

impl NullBackend {
    #[must_use]
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            initialized: false,
            capabilities: Capabilities::default(),
            width: config.width,
            height: config.height,
            shaders: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            layouts: SlotMap::with_key(),
            bind_groups: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            pipeline_cache: FxHashMap::default(),
            vram: VramAccounting::new(config.vram_budgets.clone()),
            pool: BucketPool::new(),
            frame_cache: FrameCache::new(),
            ops: Vec::new(),
            resolver_calls: 0,
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The op log for the current frame, in submission order.
    #[must_use]
    pub fn ops(&self) -> &[String] {
        &self.ops
    }

    /// Resolution-memo statistics for the current frame.
    #[must_use]
    pub fn cache_stats(&self) -> FrameCacheStats {
        self.frame_cache.stats()
    }

    #[must_use]
    pub fn resolver_calls(&self) -> u64 {
        self.resolver_calls
    }

    #[must_use]
    pub fn pool_free_count(&self) -> usize {
        self.pool.free_count()
    }

    fn category_of(kind: BufferKind) -> VramCategory {
        match kind {
            BufferKind::Vertex => VramCategory::Vertex,
            BufferKind::Index => VramCategory::Index,
            BufferKind::Uniform => VramCategory::Uniform,
            BufferKind::Storage => VramCategory::Storage,
        }
    }

    fn record_draw(&mut self, cmd: &crate::gpu::draw::DrawCommand) -> Result<()> {
        // 1. Resolution through the per-frame memo. The null "objects" are
        // the handle ids themselves.
        let pipeline_id = cmd.pipeline.id();
        let live = self.pipelines.contains_key(cmd.pipeline);
        let calls = &mut self.resolver_calls;
        self.frame_cache.resolve(pipeline_id, || {
            *calls += 1;
            live.then(|| Arc::new(pipeline_id))
                .ok_or(CathodeError::StaleHandle("pipeline"))
        })?;

        for (_, group) in &cmd.bind_groups {
            let gid = group.id();
            let live = self.bind_groups.contains_key(*group);
            let calls = &mut self.resolver_calls;
            self.frame_cache.resolve(gid, || {
                *calls += 1;
                live.then(|| Arc::new(gid))
                    .ok_or(CathodeError::StaleHandle("bind group"))
            })?;
        }

        let vbuffers: Vec<BufferHandle> = match &cmd.geometry {
            Geometry::Indexed { vbuffers, .. }
            | Geometry::NonIndexed { vbuffers, .. }
            | Geometry::Indirect { vbuffers, .. } => vbuffers.to_vec(),
            Geometry::Compute { .. } => Vec::new(),
        };
        for vb in &vbuffers {
            let bid = vb.id();
            let live = self.buffers.contains_key(*vb);
            let calls = &mut self.resolver_calls;
            self.frame_cache.resolve(bid, || {
                *calls += 1;
                live.then(|| Arc::new(bid))
                    .ok_or(CathodeError::StaleHandle("vertex buffer"))
            })?;
        }

        let index_and_indirect: Vec<BufferHandle> = match &cmd.geometry {
            Geometry::Indexed { ibuffer, .. } => vec![*ibuffer],
            Geometry::Indirect {
                ibuffer,
                indirect_buffer,
                ..
            } => ibuffer.iter().copied().chain([*indirect_buffer]).collect(),
            _ => Vec::new(),
        };
        for handle in &index_and_indirect {
            let bid = handle.id();
            let live = self.buffers.contains_key(*handle);
            let calls = &mut self.resolver_calls;
            self.frame_cache.resolve(bid, || {
                *calls += 1;
                live.then(|| Arc::new(bid))
                    .ok_or(CathodeError::StaleHandle("index/indirect buffer"))
            })?;
        }

        // 2. Redundancy-filtered binds.
        if self.frame_cache.bind_pipeline(pipeline_id) {
            self.ops.push(format!("bind_pipeline:{pipeline_id}"));
        }
        for (slot, group) in &cmd.bind_groups {
            if self.frame_cache.bind_group(*slot, group.id()) {
                self.ops.push(format!("bind_group:{slot}"));
            }
        }
        for (slot, vb) in vbuffers.iter().enumerate() {
            if self.frame_cache.bind_vertex_buffer(slot, vb.id()) {
                self.ops.push(format!("set_vbuffer:{slot}"));
            }
        }

        // 3. The draw itself.
        match &cmd.geometry {
            Geometry::Indexed {
                ibuffer,
                index_count,
                instance_count,
                ..
            } => {
                if self.frame_cache.bind_index_buffer(ibuffer.id()) {
                    self.ops.push("set_ibuffer".into());
                }
                self.ops
                    .push(format!("draw_indexed:{index_count}x{instance_count}"));
            }
            Geometry::NonIndexed {
                vertex_count,
                instance_count,
                ..
            } => {
                self.ops.push(format!("draw:{vertex_count}x{instance_count}"));
            }
            Geometry::Indirect {
                indirect_buffer,
                indirect_offset,
                ..
            } => {
                if self.frame_cache.bind_indirect_buffer(indirect_buffer.id()) {
                    self.ops.push("set_indirect".into());
                }
                self.ops.push(format!("draw_indirect:{indirect_offset}"));
            }
            Geometry::Compute { workgroups } => {
                self.ops.push(format!(
                    "dispatch:{}x{}x{}",
                    workgroups.0, workgroups.1, workgroups.2
                ));
            }
        }
        Ok(())
    }
}

impl GpuBackend for NullBackend {
    fn initialize(&mut self, config: &BackendConfig) -> Result<bool> {
        self.width = config.width;
        self.height = config.height;
        self.initialized = true;
        Ok(true)
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.frame_cache.clear();
        self.ops.clear();
        self.resolver_calls = 0;
        Ok(())
    }

    fn execute(&mut self, passes: &[PassSubmission]) -> Result<()> {
        for pass in passes {
            self.ops.push(format!("pass:{}", pass.label));
            // Binding state does not carry across pass boundaries.
            self.frame_cache.reset_bindings();
            for cmd in &pass.commands {
                self.record_draw(cmd)?;
            }
        }
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn create_shader(&mut self, label: &str, _source: &str) -> Result<ShaderHandle> {
        Ok(self.shaders.insert(label.to_string()))
    }

    fn destroy_shader(&mut self, handle: ShaderHandle) {
        self.shaders.remove(handle);
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        let category = Self::category_of(desc.kind);
        let poolable = desc.dynamic
            && matches!(desc.kind, BufferKind::Vertex | BufferKind::Index);

        if poolable {
            if let Some((handle, _bucket)) = self.pool.acquire(desc.size) {
                // Recycled: charge already held by the pooled record.
                return Ok(handle);
            }
            let charged = bucket_size(desc.size);
            self.vram.charge(category, charged)?;
            return Ok(self.buffers.insert(BufferRecord {
                desc: desc.clone(),
                charged,
                category,
                pooled: true,
            }));
        }

        self.vram.charge(category, desc.size)?;
        Ok(self.buffers.insert(BufferRecord {
            desc: desc.clone(),
            charged: desc.size,
            category,
            pooled: false,
        }))
    }

    fn write_buffer(&mut self, handle: BufferHandle, _offset: u64, _data: &[u8]) -> Result<()> {
        if !self.buffers.contains_key(handle) {
            return Err(CathodeError::StaleHandle("buffer"));
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        let Some(record) = self.buffers.get(handle) else {
            return;
        };
        if record.pooled {
            // Pooled buffers go back to their bucket; the charge stays with
            // them. Release accounts the full bucket, not the request.
            let requested = record.desc.size;
            let bucket = self.pool.release(handle, requested);
            debug_assert_eq!(bucket, self.buffers[handle].charged);
        } else {
            let record = self.buffers.remove(handle).expect("checked above");
            self.vram.release(record.category, record.charged);
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        let charged = desc.format.byte_size(desc.width, desc.height)?;
        self.vram.charge(VramCategory::Texture, charged)?;
        Ok(self.textures.insert(TextureRecord {
            desc: desc.clone(),
            charged,
        }))
    }

    fn upload_texture(&mut self, handle: TextureHandle, _data: &[u8]) -> Result<()> {
        if !self.textures.contains_key(handle) {
            return Err(CathodeError::StaleHandle("texture"));
        }
        Ok(())
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        if let Some(record) = self.textures.remove(handle) {
            self.vram.release(VramCategory::Texture, record.charged);
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerHandle> {
        Ok(self.samplers.insert(desc.clone()))
    }

    fn destroy_sampler(&mut self, handle: SamplerHandle) {
        self.samplers.remove(handle);
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferHandle> {
        for color in &desc.color {
            if !self.textures.contains_key(*color) {
                return Err(CathodeError::StaleHandle("framebuffer color"));
            }
        }
        if let Some(depth) = desc.depth {
            if !self.textures.contains_key(depth) {
                return Err(CathodeError::StaleHandle("framebuffer depth"));
            }
        }
        Ok(self.framebuffers.insert(desc.clone()))
    }

    fn destroy_framebuffer(&mut self, handle: FramebufferHandle) {
        self.framebuffers.remove(handle);
    }

    fn create_bind_group_layout(&mut self, desc: &BindGroupLayoutDesc) -> Result<BindGroupLayoutHandle> {
        Ok(self.layouts.insert(desc.clone()))
    }

    fn destroy_bind_group_layout(&mut self, handle: BindGroupLayoutHandle) {
        self.layouts.remove(handle);
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindingResource)],
    ) -> Result<BindGroupHandle> {
        let layout_desc = self
            .layouts
            .get(layout)
            .ok_or(CathodeError::StaleHandle("bind group layout"))?;
        for (slot, resource) in entries {
            let Some((_, kind)) = layout_desc.entries.iter().find(|(s, _)| s == slot) else {
                return Err(CathodeError::BindGroupMismatch(format!(
                    "slot {slot} not in layout"
                )));
            };
            let matches = matches!(
                (kind, resource),
                (BindingKind::UniformBuffer | BindingKind::StorageBuffer, BindingResource::Buffer(_))
                    | (BindingKind::Sampler, BindingResource::Sampler(_))
                    | (BindingKind::Texture, BindingResource::Texture { .. })
            );
            if !matches {
                return Err(CathodeError::BindGroupMismatch(format!(
                    "slot {slot}: resource does not match layout kind {kind:?}"
                )));
            }
        }
        Ok(self.bind_groups.insert(entries.to_vec()))
    }

    fn destroy_bind_group(&mut self, handle: BindGroupHandle) {
        self.bind_groups.remove(handle);
    }

    fn create_render_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineHandle> {
        let key = PipelineKey::of(desc);
        if let Some(&cached) = self.pipeline_cache.get(&key) {
            return Ok(cached);
        }
        if !self.shaders.contains_key(desc.shader) {
            return Err(CathodeError::StaleHandle("shader"));
        }
        let handle = self.pipelines.insert(key);
        self.pipeline_cache.insert(key, handle);
        Ok(handle)
    }

    fn create_compute_pipeline(&mut self, _label: &str, shader: ShaderHandle) -> Result<PipelineHandle> {
        if !self.shaders.contains_key(shader) {
            return Err(CathodeError::StaleHandle("shader"));
        }
        let key = PipelineKey {
            shader,
            layout_hash: 0,
            instanced: false,
        };
        Ok(self.pipelines.insert(key))
    }

    fn destroy_pipeline(&mut self, handle: PipelineHandle) {
        if let Some(key) = self.pipelines.remove(handle) {
            self.pipeline_cache.remove(&key);
        }
    }

    fn vram(&self) -> &VramAccounting {
        &self.vram
    }
}
