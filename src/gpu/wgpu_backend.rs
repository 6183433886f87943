//! wgpu Backend
//!
//! The concrete implementation of the backend contract over wgpu. Headless
//! by design: the "swapchain" is an internal presentation target the
//! embedder reads out, so the same backend serves windowed hosts, tests,
//! and offscreen capture.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::errors::{CathodeError, Result};
use crate::gpu::backend::{
    AddressMode, BackendConfig, BindGroupLayoutDesc, BindingKind, BindingResource, BlendMode,
    BufferDesc, BufferKind, Capabilities, CompressedFamilies, CullMode, FilterMode,
    FramebufferDesc, GpuBackend, PassSubmission, PassTarget, PipelineDesc, PipelineKey,
    SamplerDesc, TextureDesc, VertexFormat,
};
use crate::gpu::draw::{DrawCommand, Geometry, IndexFormat};
use crate::gpu::encoder::FrameCache;
use crate::gpu::format::{
    aligned_bytes_per_row, has_meaningful_transparency, premultiply_alpha, TextureFormat,
};
use crate::gpu::handle::{
    BindGroupHandle, BindGroupLayoutHandle, BufferHandle, FramebufferHandle, HandleId,
    PipelineHandle, SamplerHandle, ShaderHandle, TextureHandle,
};
use crate::gpu::profiler::TimestampProfiler;
use crate::gpu::vram::{bucket_size, BucketPool, VramAccounting, VramCategory};

struct BufferRecord {
    buffer: Arc<wgpu::Buffer>,
    desc: BufferDesc,
    charged: u64,
    category: VramCategory,
    pooled: bool,
}

struct TextureRecord {
    #[allow(dead_code)]
    texture: Arc<wgpu::Texture>,
    view: Arc<wgpu::TextureView>,
    desc: TextureDesc,
    charged: u64,
}

enum PipelineObject {
    Render(Arc<wgpu::RenderPipeline>),
    Compute(Arc<wgpu::ComputePipeline>),
}

/// One draw with its resources resolved ahead of the pass, so the borrow of
/// the command encoder can begin after every fallible lookup is done.
struct ResolvedDraw {
    pipeline: Arc<wgpu::RenderPipeline>,
    pipeline_id: u64,
    bind_groups: Vec<(u32, u64, Arc<wgpu::BindGroup>)>,
    vbuffers: Vec<(u64, Arc<wgpu::Buffer>)>,
    geometry: Geometry,
    ibuffer: Option<(u64, Arc<wgpu::Buffer>)>,
    indirect: Option<(u64, Arc<wgpu::Buffer>)>,
}

struct ResolvedDispatch {
    pipeline: Arc<wgpu::ComputePipeline>,
    bind_groups: Vec<(u32, Arc<wgpu::BindGroup>)>,
    workgroups: (u32, u32, u32),
}

enum ResolvedCommand {
    Draw(ResolvedDraw),
    Dispatch(ResolvedDispatch),
}

/// The wgpu-backed implementation.
pub struct WgpuBackend {
    device: Option<wgpu::Device>,
    queue: Option<wgpu::Queue>,
    capabilities: Capabilities,
    width: u32,
    height: u32,

    shaders: SlotMap<ShaderHandle, Arc<wgpu::ShaderModule>>,
    buffers: SlotMap<BufferHandle, BufferRecord>,
    textures: SlotMap<TextureHandle, TextureRecord>,
    samplers: SlotMap<SamplerHandle, Arc<wgpu::Sampler>>,
    framebuffers: SlotMap<FramebufferHandle, FramebufferDesc>,
    layouts: SlotMap<BindGroupLayoutHandle, (Arc<wgpu::BindGroupLayout>, BindGroupLayoutDesc)>,
    bind_groups: SlotMap<BindGroupHandle, Arc<wgpu::BindGroup>>,
    pipelines: SlotMap<PipelineHandle, PipelineObject>,
    pipeline_cache: FxHashMap<PipelineKey, PipelineHandle>,

    vram: VramAccounting,
    pool: BucketPool<BufferHandle>,
    frame_cache: FrameCache,

    /// Headless presentation target + depth.
    present_target: Option<(Arc<wgpu::TextureView>, Arc<wgpu::TextureView>)>,
    profiler: Option<TimestampProfiler>,
    wireframe_supported: bool,
}

impl WgpuBackend {
    #[must_use]
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            device: None,
            queue: None,
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
            present_target: None,
            profiler: None,
            wireframe_supported: false,
        }
    }

    /// Last measured GPU frame time, if a readback completed.
    #[must_use]
    pub fn gpu_time_ms(&self) -> Option<f64> {
        self.profiler.as_ref().and_then(TimestampProfiler::gpu_time_ms)
    }

    /// Per-frame resolution cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> crate::gpu::encoder::FrameCacheStats {
        self.frame_cache.stats()
    }

    fn device(&self) -> Result<&wgpu::Device> {
        self.device
            .as_ref()
            .ok_or_else(|| CathodeError::DeviceLost("device not initialized".into()))
    }

    fn queue(&self) -> Result<&wgpu::Queue> {
        self.queue
            .as_ref()
            .ok_or_else(|| CathodeError::DeviceLost("queue not initialized".into()))
    }

    async fn request_device(
        config: &BackendConfig,
    ) -> Result<(wgpu::Device, wgpu::Queue, Capabilities)> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| CathodeError::AdapterRequestFailed(e.to_string()))?;

        // Probe optional features before asking for them.
        let adapter_features = adapter.features();
        let mut required_features = wgpu::Features::empty();
        if config.enable_profiling && adapter_features.contains(wgpu::Features::TIMESTAMP_QUERY) {
            required_features |= wgpu::Features::TIMESTAMP_QUERY;
        }
        let mut compressed = CompressedFamilies::empty();
        if adapter_features.contains(wgpu::Features::TEXTURE_COMPRESSION_BC) {
            required_features |= wgpu::Features::TEXTURE_COMPRESSION_BC;
            compressed |= CompressedFamilies::BC;
        }
        if adapter_features.contains(wgpu::Features::TEXTURE_COMPRESSION_ETC2) {
            required_features |= wgpu::Features::TEXTURE_COMPRESSION_ETC2;
            compressed |= CompressedFamilies::ETC2;
        }
        if adapter_features.contains(wgpu::Features::TEXTURE_COMPRESSION_ASTC) {
            required_features |= wgpu::Features::TEXTURE_COMPRESSION_ASTC;
            compressed |= CompressedFamilies::ASTC;
        }
        if adapter_features.contains(wgpu::Features::POLYGON_MODE_LINE) {
            required_features |= wgpu::Features::POLYGON_MODE_LINE;
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features,
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        let limits = device.limits();
        let capabilities = Capabilities {
            compute: true,
            max_texture_size: limits.max_texture_dimension_2d,
            max_uniform_buffer_size: u64::from(limits.max_uniform_buffer_binding_size),
            max_vertex_attributes: limits.max_vertex_attributes,
            max_color_attachments: limits.max_color_attachments,
            max_compute_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
            anisotropy: true,
            compressed,
            timestamp_queries: required_features.contains(wgpu::Features::TIMESTAMP_QUERY),
        };
        Ok((device, queue, capabilities))
    }

    fn create_present_target(&mut self) -> Result<()> {
        let device = self.device()?;
        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Present Target"),
            size: wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Present Depth"),
            size: wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth24Plus,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        self.present_target = Some((
            Arc::new(color.create_view(&wgpu::TextureViewDescriptor::default())),
            Arc::new(depth.create_view(&wgpu::TextureViewDescriptor::default())),
        ));
        Ok(())
    }

    fn category_of(kind: BufferKind) -> VramCategory {
        match kind {
            BufferKind::Vertex => VramCategory::Vertex,
            BufferKind::Index => VramCategory::Index,
            BufferKind::Uniform => VramCategory::Uniform,
            BufferKind::Storage => VramCategory::Storage,
        }
    }

    fn usages_of(kind: BufferKind) -> wgpu::BufferUsages {
        let base = wgpu::BufferUsages::COPY_DST;
        match kind {
            BufferKind::Vertex => base | wgpu::BufferUsages::VERTEX,
            BufferKind::Index => base | wgpu::BufferUsages::INDEX,
            BufferKind::Uniform => base | wgpu::BufferUsages::UNIFORM,
            BufferKind::Storage => {
                base | wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::INDIRECT
            }
        }
    }

    fn convert_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
            TextureFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::R16Float => wgpu::TextureFormat::R16Float,
            TextureFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
            TextureFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::Depth24Plus => wgpu::TextureFormat::Depth24Plus,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            TextureFormat::Bc1RgbaUnorm => wgpu::TextureFormat::Bc1RgbaUnorm,
            TextureFormat::Bc3RgbaUnorm => wgpu::TextureFormat::Bc3RgbaUnorm,
            TextureFormat::Bc7RgbaUnorm => wgpu::TextureFormat::Bc7RgbaUnorm,
            TextureFormat::Etc2Rgb8Unorm => wgpu::TextureFormat::Etc2Rgb8Unorm,
            TextureFormat::Astc4x4Unorm => wgpu::TextureFormat::Astc {
                block: wgpu::AstcBlock::B4x4,
                channel: wgpu::AstcChannel::Unorm,
            },
        }
    }

    fn convert_blend(blend: BlendMode) -> Option<wgpu::BlendState> {
        match blend {
            BlendMode::Replace => None,
            BlendMode::Premultiplied => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent::OVER,
            }),
            BlendMode::Additive => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::SrcAlpha,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent::OVER,
            }),
            BlendMode::AdditiveFull => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent::OVER,
            }),
        }
    }

    fn convert_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
        match format {
            VertexFormat::F32 => wgpu::VertexFormat::Float32,
            VertexFormat::F32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::F32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::F32x4 => wgpu::VertexFormat::Float32x4,
            VertexFormat::U8x4Norm => wgpu::VertexFormat::Unorm8x4,
            VertexFormat::U16x2 => wgpu::VertexFormat::Uint16x2,
            VertexFormat::U32 => wgpu::VertexFormat::Uint32,
        }
    }

    /// Resolves every resource a command references through the per-frame
    /// cache, before the render pass borrows the encoder.
    fn resolve_command(&mut self, cmd: &DrawCommand) -> Result<ResolvedCommand> {
        if let Geometry::Compute { workgroups } = cmd.geometry {
            let pipeline = match self.pipelines.get(cmd.pipeline) {
                Some(PipelineObject::Compute(p)) => Arc::clone(p),
                _ => return Err(CathodeError::StaleHandle("compute pipeline")),
            };
            let mut groups = Vec::with_capacity(cmd.bind_groups.len());
            for (slot, group) in &cmd.bind_groups {
                let object = self
                    .bind_groups
                    .get(*group)
                    .ok_or(CathodeError::StaleHandle("bind group"))?;
                groups.push((*slot, Arc::clone(object)));
            }
            return Ok(ResolvedCommand::Dispatch(ResolvedDispatch {
                pipeline,
                bind_groups: groups,
                workgroups,
            }));
        }

        let pipeline_id = cmd.pipeline.id();
        let pipeline = {
            let pipelines = &self.pipelines;
            let handle = cmd.pipeline;
            self.frame_cache.resolve(pipeline_id, || {
                match pipelines.get(handle) {
                    Some(PipelineObject::Render(p)) => Ok(Arc::clone(p)),
                    _ => Err(CathodeError::StaleHandle("render pipeline")),
                }
            })?
        };

        let mut groups = Vec::with_capacity(cmd.bind_groups.len());
        for (slot, group) in &cmd.bind_groups {
            let gid = group.id();
            let bind_groups = &self.bind_groups;
            let handle = *group;
            let object = self.frame_cache.resolve(gid, || {
                bind_groups
                    .get(handle)
                    .map(Arc::clone)
                    .ok_or(CathodeError::StaleHandle("bind group"))
            })?;
            groups.push((*slot, gid, object));
        }

        let vbuffer_handles: &[BufferHandle] = match &cmd.geometry {
            Geometry::Indexed { vbuffers, .. }
            | Geometry::NonIndexed { vbuffers, .. }
            | Geometry::Indirect { vbuffers, .. } => vbuffers,
            Geometry::Compute { .. } => &[],
        };
        let mut vbuffers = Vec::with_capacity(vbuffer_handles.len());
        for vb in vbuffer_handles {
            let bid = vb.id();
            let buffers = &self.buffers;
            let handle = *vb;
            let object = self.frame_cache.resolve(bid, || {
                buffers
                    .get(handle)
                    .map(|r| Arc::clone(&r.buffer))
                    .ok_or(CathodeError::StaleHandle("vertex buffer"))
            })?;
            vbuffers.push((bid, object));
        }

        fn resolve_buffer(
            cache: &mut FrameCache,
            buffers: &SlotMap<BufferHandle, BufferRecord>,
            handle: BufferHandle,
            what: &'static str,
        ) -> Result<(u64, Arc<wgpu::Buffer>)> {
            let bid = handle.id();
            cache
                .resolve(bid, || {
                    buffers
                        .get(handle)
                        .map(|r| Arc::clone(&r.buffer))
                        .ok_or(CathodeError::StaleHandle(what))
                })
                .map(|b| (bid, b))
        }

        let ibuffer = match &cmd.geometry {
            Geometry::Indexed { ibuffer, .. } => Some(resolve_buffer(
                &mut self.frame_cache,
                &self.buffers,
                *ibuffer,
                "index buffer",
            )?),
            Geometry::Indirect { ibuffer: Some(ib), .. } => Some(resolve_buffer(
                &mut self.frame_cache,
                &self.buffers,
                *ib,
                "index buffer",
            )?),
            _ => None,
        };
        let indirect = match &cmd.geometry {
            Geometry::Indirect { indirect_buffer, .. } => Some(resolve_buffer(
                &mut self.frame_cache,
                &self.buffers,
                *indirect_buffer,
                "indirect buffer",
            )?),
            _ => None,
        };

        Ok(ResolvedCommand::Draw(ResolvedDraw {
            pipeline,
            pipeline_id,
            bind_groups: groups,
            vbuffers,
            geometry: cmd.geometry.clone(),
            ibuffer,
            indirect,
        }))
    }

    fn pass_views(
        &self,
        target: PassTarget,
    ) -> Result<(Vec<Arc<wgpu::TextureView>>, Option<Arc<wgpu::TextureView>>)> {
        match target {
            PassTarget::Swapchain => {
                let (color, depth) = self
                    .present_target
                    .as_ref()
                    .ok_or_else(|| CathodeError::DeviceLost("no present target".into()))?;
                Ok((vec![Arc::clone(color)], Some(Arc::clone(depth))))
            }
            PassTarget::Framebuffer(handle) => {
                let desc = self
                    .framebuffers
                    .get(handle)
                    .ok_or(CathodeError::StaleHandle("framebuffer"))?;
                let mut colors = Vec::with_capacity(desc.color.len());
                for texture in &desc.color {
                    let record = self
                        .textures
                        .get(*texture)
                        .ok_or(CathodeError::StaleHandle("framebuffer color"))?;
                    colors.push(Arc::clone(&record.view));
                }
                let depth = match desc.depth {
                    Some(texture) => Some(Arc::clone(
                        &self
                            .textures
                            .get(texture)
                            .ok_or(CathodeError::StaleHandle("framebuffer depth"))?
                            .view,
                    )),
                    None => None,
                };
                Ok((colors, depth))
            }
        }
    }

    fn encode_render_pass(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &PassSubmission,
        draws: &[ResolvedCommand],
    ) -> Result<()> {
        let (colors, depth) = self.pass_views(pass.target)?;

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = colors
            .iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view: view.as_ref(),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: match pass.clear_color {
                            Some([r, g, b, a]) => {
                                wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a })
                            }
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })
            })
            .collect();

        let depth_stencil_attachment = match (&depth, pass.depth) {
            (Some(view), Some(ops)) => Some(wgpu::RenderPassDepthStencilAttachment {
                view: view.as_ref(),
                depth_ops: Some(wgpu::Operations {
                    load: match ops.clear {
                        Some(value) => wgpu::LoadOp::Clear(value),
                        None => wgpu::LoadOp::Load,
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            _ => None,
        };

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&pass.label),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            ..Default::default()
        });

        // Binding state is per pass.
        self.frame_cache.reset_bindings();

        for resolved in draws {
            let ResolvedCommand::Draw(draw) = resolved else {
                continue;
            };
            if self.frame_cache.bind_pipeline(draw.pipeline_id) {
                rpass.set_pipeline(&draw.pipeline);
            }
            for (slot, gid, group) in &draw.bind_groups {
                if self.frame_cache.bind_group(*slot, *gid) {
                    rpass.set_bind_group(*slot, group.as_ref(), &[]);
                }
            }
            for (slot, (bid, buffer)) in draw.vbuffers.iter().enumerate() {
                if self.frame_cache.bind_vertex_buffer(slot, *bid) {
                    rpass.set_vertex_buffer(slot as u32, buffer.slice(..));
                }
            }

            match &draw.geometry {
                Geometry::Indexed {
                    format,
                    index_count,
                    instance_count,
                    first_index,
                    base_vertex,
                    first_instance,
                    ..
                } => {
                    let (bid, ibuffer) = draw.ibuffer.as_ref().expect("indexed draw has ibuffer");
                    if self.frame_cache.bind_index_buffer(*bid) {
                        rpass.set_index_buffer(
                            ibuffer.slice(..),
                            match format {
                                IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
                                IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
                            },
                        );
                    }
                    rpass.draw_indexed(
                        *first_index..(first_index + index_count),
                        *base_vertex,
                        *first_instance..(first_instance + instance_count),
                    );
                }
                Geometry::NonIndexed {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                    ..
                } => {
                    rpass.draw(
                        *first_vertex..(first_vertex + vertex_count),
                        *first_instance..(first_instance + instance_count),
                    );
                }
                Geometry::Indirect {
                    indirect_offset, ..
                } => {
                    let (bid, indirect) =
                        draw.indirect.as_ref().expect("indirect draw has buffer");
                    let _ = self.frame_cache.bind_indirect_buffer(*bid);
                    if let Some((ibid, ibuffer)) = &draw.ibuffer {
                        if self.frame_cache.bind_index_buffer(*ibid) {
                            rpass.set_index_buffer(ibuffer.slice(..), wgpu::IndexFormat::Uint32);
                        }
                        rpass.draw_indexed_indirect(indirect, *indirect_offset);
                    } else {
                        rpass.draw_indirect(indirect, *indirect_offset);
                    }
                }
                Geometry::Compute { .. } => {}
            }
        }
        Ok(())
    }
}

impl GpuBackend for WgpuBackend {
    fn initialize(&mut self, config: &BackendConfig) -> Result<bool> {
        self.width = config.width;
        self.height = config.height;
        let (device, queue, capabilities) = match pollster::block_on(Self::request_device(config)) {
            Ok(parts) => parts,
            Err(CathodeError::AdapterRequestFailed(reason)) => {
                log::error!("no usable GPU adapter: {reason}");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        self.capabilities = capabilities;
        self.wireframe_supported = device.features().contains(wgpu::Features::POLYGON_MODE_LINE);

        if config.enable_profiling && self.capabilities.timestamp_queries {
            self.profiler = Some(TimestampProfiler::new(&device, &queue));
        }

        self.device = Some(device);
        self.queue = Some(queue);

        // A fresh device invalidates every old object.
        self.shaders.clear();
        self.buffers.clear();
        self.textures.clear();
        self.samplers.clear();
        self.framebuffers.clear();
        self.layouts.clear();
        self.bind_groups.clear();
        self.pipelines.clear();
        self.pipeline_cache.clear();
        self.pool.drain();

        self.create_present_target()?;
        Ok(true)
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.frame_cache.clear();
        Ok(())
    }

    fn execute(&mut self, passes: &[PassSubmission]) -> Result<()> {
        let device = self.device()?.clone();
        let queue = self.queue()?.clone();

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        });

        if let Some(profiler) = &mut self.profiler {
            profiler.begin(&mut encoder);
        }

        for pass in passes {
            // Resolve first; the render pass borrows the encoder afterwards.
            let mut resolved = Vec::with_capacity(pass.commands.len());
            for cmd in &pass.commands {
                resolved.push(self.resolve_command(cmd)?);
            }

            let has_draws = resolved.iter().any(|r| matches!(r, ResolvedCommand::Draw(_)));
            if has_draws {
                self.encode_render_pass(&mut encoder, pass, &resolved)?;
            }

            for command in &resolved {
                let ResolvedCommand::Dispatch(dispatch) = command else {
                    continue;
                };
                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(&pass.label),
                    timestamp_writes: None,
                });
                cpass.set_pipeline(&dispatch.pipeline);
                for (slot, group) in &dispatch.bind_groups {
                    cpass.set_bind_group(*slot, group.as_ref(), &[]);
                }
                let (x, y, z) = dispatch.workgroups;
                cpass.dispatch_workgroups(x, y, z);
            }
        }

        if let Some(profiler) = &mut self.profiler {
            profiler.end(&mut encoder);
            profiler.resolve(&mut encoder);
        }

        queue.submit(std::iter::once(encoder.finish()));

        if let Some(profiler) = &mut self.profiler {
            profiler.after_submit(&device);
        }
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        if let Some(device) = &self.device {
            let _ = device.poll(wgpu::PollType::Poll);
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.width = width;
        self.height = height;
        if self.device.is_some() {
            if let Err(e) = self.create_present_target() {
                log::error!("present target resize failed: {e}");
            }
        }
    }

    fn create_shader(&mut self, label: &str, source: &str) -> Result<ShaderHandle> {
        let module = self
            .device()?
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        Ok(self.shaders.insert(Arc::new(module)))
    }

    fn destroy_shader(&mut self, handle: ShaderHandle) {
        self.shaders.remove(handle);
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        let category = Self::category_of(desc.kind);
        let poolable = desc.dynamic && matches!(desc.kind, BufferKind::Vertex | BufferKind::Index);

        if poolable {
            if let Some((handle, _)) = self.pool.acquire(desc.size) {
                return Ok(handle);
            }
            let charged = bucket_size(desc.size);
            self.vram.charge(category, charged)?;
            let buffer = self.device()?.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&desc.label),
                size: charged,
                usage: Self::usages_of(desc.kind),
                mapped_at_creation: false,
            });
            return Ok(self.buffers.insert(BufferRecord {
                buffer: Arc::new(buffer),
                desc: desc.clone(),
                charged,
                category,
                pooled: true,
            }));
        }

        self.vram.charge(category, desc.size)?;
        let buffer = self.device()?.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size: desc.size,
            usage: Self::usages_of(desc.kind),
            mapped_at_creation: false,
        });
        Ok(self.buffers.insert(BufferRecord {
            buffer: Arc::new(buffer),
            desc: desc.clone(),
            charged: desc.size,
            category,
            pooled: false,
        }))
    }

    fn write_buffer(&mut self, handle: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let record = self
            .buffers
            .get(handle)
            .ok_or(CathodeError::StaleHandle("buffer"))?;
        self.queue()?.write_buffer(&record.buffer, offset, data);
        Ok(())
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        let Some(record) = self.buffers.get(handle) else {
            return;
        };
        if record.pooled {
            let requested = record.desc.size;
            self.pool.release(handle, requested);
        } else if let Some(record) = self.buffers.remove(handle) {
            self.vram.release(record.category, record.charged);
            record.buffer.destroy();
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        let charged = desc.format.byte_size(desc.width, desc.height)?;
        self.vram.charge(VramCategory::Texture, charged)?;

        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        if desc.render_target {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let texture = self.device()?.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: desc.mip_level_count.max(1),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_format(desc.format),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(self.textures.insert(TextureRecord {
            texture: Arc::new(texture),
            view: Arc::new(view),
            desc: desc.clone(),
            charged,
        }))
    }

    fn upload_texture(&mut self, handle: TextureHandle, data: &[u8]) -> Result<()> {
        let record = self
            .textures
            .get(handle)
            .ok_or(CathodeError::StaleHandle("texture"))?;
        let desc = &record.desc;
        let bpp = desc.format.bytes_per_pixel()?;

        // Premultiply RGBA sources that carry meaningful transparency.
        let mut owned;
        let mut source: &[u8] = data;
        if matches!(
            desc.format,
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb
        ) && has_meaningful_transparency(data)
        {
            owned = data.to_vec();
            premultiply_alpha(&mut owned);
            source = &owned;
        }

        // Pad each row out to the 256-byte pitch.
        let unpadded = desc.width * bpp;
        let padded = aligned_bytes_per_row(desc.width, bpp);
        let padded_data;
        if padded != unpadded {
            let mut buf = vec![0u8; (padded * desc.height) as usize];
            for row in 0..desc.height as usize {
                let src = row * unpadded as usize;
                let dst = row * padded as usize;
                buf[dst..dst + unpadded as usize]
                    .copy_from_slice(&source[src..src + unpadded as usize]);
            }
            padded_data = buf;
            source = &padded_data;
        }

        self.queue()?.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &record.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            source,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        if let Some(record) = self.textures.remove(handle) {
            self.vram.release(VramCategory::Texture, record.charged);
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerHandle> {
        let convert_filter = |f: FilterMode| match f {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        };
        let address = match desc.address_mode {
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
            AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
        };
        let sampler = self.device()?.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&desc.label),
            address_mode_u: address,
            address_mode_v: address,
            mag_filter: convert_filter(desc.mag_filter),
            min_filter: convert_filter(desc.min_filter),
            anisotropy_clamp: desc.anisotropy_clamp.max(1),
            ..Default::default()
        });
        Ok(self.samplers.insert(Arc::new(sampler)))
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
        let entries: Vec<wgpu::BindGroupLayoutEntry> = desc
            .entries
            .iter()
            .map(|(slot, kind)| wgpu::BindGroupLayoutEntry {
                binding: *slot,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT.union(wgpu::ShaderStages::COMPUTE),
                ty: match kind {
                    BindingKind::UniformBuffer => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    BindingKind::StorageBuffer => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    BindingKind::Sampler => {
                        wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
                    }
                    BindingKind::Texture => wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                },
                count: None,
            })
            .collect();

        let layout = self
            .device()?
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&desc.label),
                entries: &entries,
            });
        Ok(self.layouts.insert((Arc::new(layout), desc.clone())))
    }

    fn destroy_bind_group_layout(&mut self, handle: BindGroupLayoutHandle) {
        self.layouts.remove(handle);
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindingResource)],
    ) -> Result<BindGroupHandle> {
        let (layout_object, layout_desc) = self
            .layouts
            .get(layout)
            .ok_or(CathodeError::StaleHandle("bind group layout"))?;

        let mut wgpu_entries: Vec<wgpu::BindGroupEntry> = Vec::with_capacity(entries.len());
        for (slot, resource) in entries {
            let Some((_, kind)) = layout_desc.entries.iter().find(|(s, _)| s == slot) else {
                return Err(CathodeError::BindGroupMismatch(format!(
                    "slot {slot} not in layout"
                )));
            };
            match (kind, resource) {
                (
                    BindingKind::UniformBuffer | BindingKind::StorageBuffer,
                    BindingResource::Buffer(handle),
                ) => {
                    let record = self
                        .buffers
                        .get(*handle)
                        .ok_or(CathodeError::StaleHandle("buffer"))?;
                    wgpu_entries.push(wgpu::BindGroupEntry {
                        binding: *slot,
                        resource: record.buffer.as_entire_binding(),
                    });
                }
                (BindingKind::Sampler, BindingResource::Sampler(handle)) => {
                    let sampler = self
                        .samplers
                        .get(*handle)
                        .ok_or(CathodeError::StaleHandle("sampler"))?;
                    wgpu_entries.push(wgpu::BindGroupEntry {
                        binding: *slot,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    });
                }
                (BindingKind::Texture, BindingResource::Texture { texture, .. }) => {
                    let record = self
                        .textures
                        .get(*texture)
                        .ok_or(CathodeError::StaleHandle("texture"))?;
                    wgpu_entries.push(wgpu::BindGroupEntry {
                        binding: *slot,
                        resource: wgpu::BindingResource::TextureView(&record.view),
                    });
                }
                _ => {
                    return Err(CathodeError::BindGroupMismatch(format!(
                        "slot {slot}: resource does not match layout kind {kind:?}"
                    )));
                }
            }
        }

        let bind_group = self.device()?.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: layout_object,
            entries: &wgpu_entries,
        });
        Ok(self.bind_groups.insert(Arc::new(bind_group)))
    }

    fn destroy_bind_group(&mut self, handle: BindGroupHandle) {
        self.bind_groups.remove(handle);
    }

    fn create_render_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineHandle> {
        let key = PipelineKey::of(desc);
        if let Some(&cached) = self.pipeline_cache.get(&key) {
            return Ok(cached);
        }

        let module = self
            .shaders
            .get(desc.shader)
            .ok_or(CathodeError::StaleHandle("shader"))?;

        let mut layout_refs: Vec<Option<&wgpu::BindGroupLayout>> = Vec::new();
        for handle in &desc.bind_group_layouts {
            let (layout, _) = self
                .layouts
                .get(*handle)
                .ok_or(CathodeError::StaleHandle("bind group layout"))?;
            layout_refs.push(Some(layout));
        }
        let pipeline_layout = self
            .device()?
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&desc.label),
                bind_group_layouts: &layout_refs,
                immediate_size: 0,
            });

        let attributes: Vec<wgpu::VertexAttribute> = desc
            .vertex_layout
            .attributes
            .iter()
            .enumerate()
            .map(|(i, attr)| wgpu::VertexAttribute {
                format: Self::convert_vertex_format(attr.format),
                offset: u64::from(attr.offset),
                shader_location: i as u32,
            })
            .collect();
        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: u64::from(desc.vertex_layout.stride),
            step_mode: if desc.instanced {
                wgpu::VertexStepMode::Instance
            } else {
                wgpu::VertexStepMode::Vertex
            },
            attributes: &attributes,
        }];

        let blend = Self::convert_blend(desc.blend);
        let targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .color_targets
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: Self::convert_format(*format),
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let pipeline = self
            .device()?
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&desc.label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some("vs_main"),
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some("fs_main"),
                    targets: &targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: match desc.cull {
                        CullMode::None => None,
                        CullMode::Back => Some(wgpu::Face::Back),
                        CullMode::Front => Some(wgpu::Face::Front),
                    },
                    polygon_mode: if desc.wireframe && self.wireframe_supported {
                        wgpu::PolygonMode::Line
                    } else {
                        if desc.wireframe {
                            log::warn!("wireframe requested but POLYGON_MODE_LINE is unavailable");
                        }
                        wgpu::PolygonMode::Fill
                    },
                    ..Default::default()
                },
                depth_stencil: desc.depth_test.then(|| wgpu::DepthStencilState {
                    format: wgpu::TextureFormat::Depth24Plus,
                    depth_write_enabled: Some(desc.depth_write),
                    depth_compare: Some(wgpu::CompareFunction::Less),
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview_mask: None,
                cache: None,
            });

        let handle = self
            .pipelines
            .insert(PipelineObject::Render(Arc::new(pipeline)));
        self.pipeline_cache.insert(key, handle);
        Ok(handle)
    }

    fn create_compute_pipeline(&mut self, label: &str, shader: ShaderHandle) -> Result<PipelineHandle> {
        let module = self
            .shaders
            .get(shader)
            .ok_or(CathodeError::StaleHandle("shader"))?;
        let pipeline = self
            .device()?
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: None,
                module,
                entry_point: Some("cs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
        Ok(self.pipelines.insert(PipelineObject::Compute(Arc::new(pipeline))))
    }

    fn destroy_pipeline(&mut self, handle: PipelineHandle) {
        if self.pipelines.remove(handle).is_some() {
            self.pipeline_cache.retain(|_, h| *h != handle);
        }
    }

    fn vram(&self) -> &VramAccounting {
        &self.vram
    }
}
