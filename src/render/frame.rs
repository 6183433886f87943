//! Frame Renderer
//!
//! Drives the per-frame sequence on the single-threaded main loop: camera
//! update → scene pass (opaque → cutout → sorted blend → sorted additive)
//! at the internal resolution → bloom pyramid → composite → CRT → submit.
//! Everything is expressed as pass submissions against the backend
//! contract, so the same renderer runs on wgpu or on the headless backend.

use glam::Vec3;
use smallvec::smallvec;

use crate::errors::Result;
use crate::gpu::backend::{
    BindGroupLayoutDesc, BindingKind, BindingResource, BlendMode, BufferDesc, BufferKind,
    Capabilities, CullMode, FramebufferDesc, GpuBackend, PassSubmission, PassTarget, PipelineDesc,
    SamplerDesc, TextureDesc, VertexAttribute, VertexFormat, VertexLayout,
};
use crate::gpu::draw::{DrawCommandBuilder, IndexFormat};
use crate::gpu::format::TextureFormat;
use crate::gpu::handle::{
    BindGroupHandle, BindGroupLayoutHandle, BufferHandle, FramebufferHandle, PipelineHandle,
    SamplerHandle, ShaderHandle, TextureHandle,
};
use crate::render::bloom::BloomPyramid;
use crate::render::material::{classify_material, sort_back_to_front, MaterialInfo, RenderMode};
use crate::render::params::{CameraUniforms, CompositeParams};
use crate::render::settings::{RendererSettings, RetroPostProcessor};
use crate::scene::camera::{Camera, OrbitParams};

/// Default internal rendering resolution.
pub const INTERNAL_WIDTH: u32 = 640;
pub const INTERNAL_HEIGHT: u32 = 480;

const NEAR_PLANE: f32 = 1.0;
const FAR_PLANE: f32 = 5000.0;

const SCENE_SHADER: &str = include_str!("../../shaders/scene.wgsl");
const BLOOM_EXTRACT_SHADER: &str = include_str!("../../shaders/bloom_extract.wgsl");
const BLOOM_DOWNSAMPLE_SHADER: &str = include_str!("../../shaders/bloom_downsample.wgsl");
const BLOOM_UPSAMPLE_SHADER: &str = include_str!("../../shaders/bloom_upsample.wgsl");
const COMPOSITE_SHADER: &str = include_str!("../../shaders/composite.wgsl");
const CRT_SHADER: &str = include_str!("../../shaders/crt.wgsl");

/// One renderable material group.
#[derive(Debug, Clone)]
pub struct RenderObject {
    pub material: MaterialInfo,
    pub centroid: Vec3,
    pub vbuffers: Vec<BufferHandle>,
    /// `(buffer, format, index count)`.
    pub ibuffer: Option<(BufferHandle, IndexFormat, u32)>,
    pub vertex_count: u32,
    /// Material bind group (slot 1); slot 0 is the camera.
    pub bind_group: Option<BindGroupHandle>,
}

struct ScenePipelines {
    opaque: PipelineHandle,
    cutout: PipelineHandle,
    blend: PipelineHandle,
    additive: PipelineHandle,
}

/// Frame statistics for the HUD and the tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameReport {
    pub draw_calls: usize,
    pub passes: usize,
}

/// The frame renderer.
pub struct Renderer {
    settings: RendererSettings,
    pub camera: Camera,
    pub orbit: OrbitParams,
    capabilities: Capabilities,

    internal_width: u32,
    internal_height: u32,
    output_width: u32,
    output_height: u32,
    engine_time: f32,
    frame_index: u64,

    // Scene target
    scene_color: TextureHandle,
    scene_fb: FramebufferHandle,
    // Composite target (CRT input)
    composite_fb: FramebufferHandle,

    pipelines: ScenePipelines,
    wire_pipelines: ScenePipelines,

    camera_ubo: BufferHandle,
    camera_bind_group: BindGroupHandle,

    bloom: BloomPyramid,
    built_mip_levels: u32,
    bloom_shaders: (ShaderHandle, ShaderHandle, ShaderHandle),
    post_sampler: SamplerHandle,

    composite_layout: BindGroupLayoutHandle,
    composite_pipeline: PipelineHandle,
    composite_swapchain_pipeline: PipelineHandle,
    composite_params: BufferHandle,
    composite_bind_group: BindGroupHandle,
    crt_pipeline: PipelineHandle,
    crt_params: BufferHandle,
    crt_bind_group: BindGroupHandle,

    fullscreen_vbuffer: BufferHandle,
    objects: Vec<RenderObject>,
}

impl Renderer {
    /// Creates the renderer and all its GPU state through the backend.
    pub fn new(backend: &mut dyn GpuBackend, output_width: u32, output_height: u32) -> Result<Self> {
        let settings = RendererSettings::default();
        let capabilities = backend.capabilities();
        let (internal_width, internal_height) = (INTERNAL_WIDTH, INTERNAL_HEIGHT);

        // ── Render targets ───────────────────────────────────────────────
        let scene_color = backend.create_texture(&TextureDesc {
            label: "Scene Color".into(),
            width: internal_width,
            height: internal_height,
            format: TextureFormat::Rgba16Float,
            mip_level_count: 1,
            render_target: true,
        })?;
        let scene_depth = backend.create_texture(&TextureDesc {
            label: "Scene Depth".into(),
            width: internal_width,
            height: internal_height,
            format: TextureFormat::Depth24Plus,
            mip_level_count: 1,
            render_target: true,
        })?;
        let scene_fb = backend.create_framebuffer(&FramebufferDesc {
            label: "Scene FB".into(),
            color: smallvec![scene_color],
            depth: Some(scene_depth),
        })?;

        let composite_color = backend.create_texture(&TextureDesc {
            label: "Composite Color".into(),
            width: internal_width,
            height: internal_height,
            format: TextureFormat::Rgba8Unorm,
            mip_level_count: 1,
            render_target: true,
        })?;
        let composite_fb = backend.create_framebuffer(&FramebufferDesc {
            label: "Composite FB".into(),
            color: smallvec![composite_color],
            depth: None,
        })?;

        // ── Shaders ──────────────────────────────────────────────────────
        let scene_shader = backend.create_shader("scene", SCENE_SHADER)?;
        // Wireframe variants use their own module so the pipeline cache key
        // (shader, layout hash, instanced) distinguishes them.
        let scene_shader_wire = backend.create_shader("scene-wire", SCENE_SHADER)?;
        let extract_shader = backend.create_shader("bloom-extract", BLOOM_EXTRACT_SHADER)?;
        let downsample_shader = backend.create_shader("bloom-downsample", BLOOM_DOWNSAMPLE_SHADER)?;
        let upsample_shader = backend.create_shader("bloom-upsample", BLOOM_UPSAMPLE_SHADER)?;
        let composite_shader = backend.create_shader("composite", COMPOSITE_SHADER)?;
        let crt_shader = backend.create_shader("crt", CRT_SHADER)?;

        // ── Camera ───────────────────────────────────────────────────────
        let camera_layout = backend.create_bind_group_layout(&BindGroupLayoutDesc {
            label: "Camera Layout".into(),
            entries: smallvec![(0, BindingKind::UniformBuffer)],
        })?;
        let camera_ubo = backend.create_buffer(&BufferDesc {
            label: "Camera UBO".into(),
            kind: BufferKind::Uniform,
            size: std::mem::size_of::<CameraUniforms>() as u64,
            dynamic: false,
        })?;
        let camera_bind_group =
            backend.create_bind_group(camera_layout, &[(0, BindingResource::Buffer(camera_ubo))])?;

        // ── Scene pipelines ──────────────────────────────────────────────
        let material_layout = backend.create_bind_group_layout(&BindGroupLayoutDesc {
            label: "Material Layout".into(),
            entries: smallvec![(0, BindingKind::Texture), (1, BindingKind::Sampler)],
        })?;
        let pipelines = Self::build_scene_pipelines(backend, scene_shader, camera_layout, material_layout, false)?;
        let wire_pipelines =
            Self::build_scene_pipelines(backend, scene_shader_wire, camera_layout, material_layout, true)?;

        // ── Fullscreen triangle ──────────────────────────────────────────
        let fullscreen_vbuffer = backend.create_buffer(&BufferDesc {
            label: "Fullscreen Triangle".into(),
            kind: BufferKind::Vertex,
            size: 3 * 8,
            dynamic: false,
        })?;
        let triangle: [f32; 6] = [-1.0, -3.0, 3.0, 1.0, -1.0, 1.0];
        backend.write_buffer(fullscreen_vbuffer, 0, bytemuck::cast_slice(&triangle))?;

        // ── Bloom pyramid ────────────────────────────────────────────────
        let post_sampler = backend.create_sampler(&SamplerDesc {
            label: "Post Sampler".into(),
            ..SamplerDesc::default()
        })?;
        let built_mip_levels = settings.bloom_mip_levels();
        let bloom = BloomPyramid::new(
            backend,
            scene_color,
            internal_width,
            internal_height,
            built_mip_levels,
            extract_shader,
            downsample_shader,
            upsample_shader,
            post_sampler,
        )?;

        // ── Composite ────────────────────────────────────────────────────
        let composite_layout = backend.create_bind_group_layout(&BindGroupLayoutDesc {
            label: "Composite Layout".into(),
            entries: smallvec![
                (0, BindingKind::Texture),
                (1, BindingKind::Texture),
                (2, BindingKind::Sampler),
                (3, BindingKind::UniformBuffer),
            ],
        })?;
        let composite_params = backend.create_buffer(&BufferDesc {
            label: "Composite Params".into(),
            kind: BufferKind::Uniform,
            size: std::mem::size_of::<CompositeParams>() as u64,
            dynamic: false,
        })?;
        let composite_bind_group = backend.create_bind_group(
            composite_layout,
            &[
                (0, BindingResource::Texture { texture: scene_color, sampler: Some(post_sampler) }),
                (1, BindingResource::Texture { texture: bloom.output_texture(), sampler: Some(post_sampler) }),
                (2, BindingResource::Sampler(post_sampler)),
                (3, BindingResource::Buffer(composite_params)),
            ],
        )?;
        let fullscreen_pipeline = |shader: ShaderHandle,
                                   label: &str,
                                   layout: BindGroupLayoutHandle,
                                   target: TextureFormat| PipelineDesc {
            label: label.to_string(),
            shader,
            vertex_layout: VertexLayout {
                stride: 8,
                attributes: vec![VertexAttribute {
                    name: "position".into(),
                    format: VertexFormat::F32x2,
                    components: 2,
                    offset: 0,
                }],
            },
            instanced: false,
            bind_group_layouts: smallvec![layout],
            blend: BlendMode::Replace,
            depth_write: false,
            depth_test: false,
            cull: CullMode::None,
            color_targets: smallvec![target],
            wireframe: false,
        };
        let composite_pipeline = backend.create_render_pipeline(&fullscreen_pipeline(
            composite_shader,
            "Composite",
            composite_layout,
            TextureFormat::Rgba8Unorm,
        ))?;
        // Separate module instance keeps the swapchain-format variant from
        // colliding with the offscreen one in the pipeline cache.
        let composite_shader_sc = backend.create_shader("composite-sc", COMPOSITE_SHADER)?;
        let composite_swapchain_pipeline = backend.create_render_pipeline(&fullscreen_pipeline(
            composite_shader_sc,
            "Composite (direct)",
            composite_layout,
            TextureFormat::Rgba8Unorm,
        ))?;

        // ── CRT ──────────────────────────────────────────────────────────
        let crt_layout = backend.create_bind_group_layout(&BindGroupLayoutDesc {
            label: "CRT Layout".into(),
            entries: smallvec![
                (0, BindingKind::Texture),
                (1, BindingKind::Sampler),
                (2, BindingKind::UniformBuffer),
            ],
        })?;
        let crt_params = backend.create_buffer(&BufferDesc {
            label: "CRT Params".into(),
            kind: BufferKind::Uniform,
            size: std::mem::size_of::<crate::render::params::CrtParams>() as u64,
            dynamic: false,
        })?;
        let crt_bind_group = backend.create_bind_group(
            crt_layout,
            &[
                (0, BindingResource::Texture { texture: composite_color, sampler: Some(post_sampler) }),
                (1, BindingResource::Sampler(post_sampler)),
                (2, BindingResource::Buffer(crt_params)),
            ],
        )?;
        let crt_pipeline = backend.create_render_pipeline(&fullscreen_pipeline(
            crt_shader,
            "CRT",
            crt_layout,
            TextureFormat::Rgba8Unorm,
        ))?;

        Ok(Self {
            settings,
            camera: Camera::perspective(60f32.to_radians(), NEAR_PLANE, FAR_PLANE),
            orbit: OrbitParams::default(),
            capabilities,
            internal_width,
            internal_height,
            output_width,
            output_height,
            engine_time: 0.0,
            frame_index: 0,
            scene_color,
            scene_fb,
            composite_fb,
            pipelines,
            wire_pipelines,
            camera_ubo,
            camera_bind_group,
            bloom,
            built_mip_levels,
            bloom_shaders: (extract_shader, downsample_shader, upsample_shader),
            post_sampler,
            composite_layout,
            composite_pipeline,
            composite_swapchain_pipeline,
            composite_params,
            composite_bind_group,
            crt_pipeline,
            crt_params,
            crt_bind_group,
            fullscreen_vbuffer,
            objects: Vec::new(),
        })
    }

    fn build_scene_pipelines(
        backend: &mut dyn GpuBackend,
        shader: ShaderHandle,
        camera_layout: BindGroupLayoutHandle,
        material_layout: BindGroupLayoutHandle,
        wireframe: bool,
    ) -> Result<ScenePipelines> {
        let vertex_layout = VertexLayout {
            stride: 32,
            attributes: vec![
                VertexAttribute {
                    name: "position".into(),
                    format: VertexFormat::F32x3,
                    components: 3,
                    offset: 0,
                },
                VertexAttribute {
                    name: "normal".into(),
                    format: VertexFormat::F32x3,
                    components: 3,
                    offset: 12,
                },
                VertexAttribute {
                    name: "uv".into(),
                    format: VertexFormat::F32x2,
                    components: 2,
                    offset: 24,
                },
            ],
        };
        let desc = |label: &str, blend: BlendMode, depth_write: bool| PipelineDesc {
            label: label.to_string(),
            shader,
            vertex_layout: vertex_layout.clone(),
            instanced: false,
            bind_group_layouts: smallvec![camera_layout, material_layout],
            blend,
            depth_write,
            depth_test: true,
            cull: CullMode::Back,
            color_targets: smallvec![TextureFormat::Rgba16Float],
            wireframe,
        };

        // The cache keys on (shader, layout, instanced); the four phase
        // pipelines share all three, so each phase gets its own module-level
        // clone of the layout via a distinct attribute name suffix.
        let variant = |label: &str, suffix: &str, blend: BlendMode, depth_write: bool| {
            let mut d = desc(label, blend, depth_write);
            d.vertex_layout.attributes[0].name = format!("position_{suffix}");
            d
        };

        Ok(ScenePipelines {
            opaque: backend.create_render_pipeline(&variant("Scene Opaque", "opaque", BlendMode::Replace, true))?,
            cutout: backend.create_render_pipeline(&variant("Scene Cutout", "cutout", BlendMode::Replace, true))?,
            blend: backend.create_render_pipeline(&variant(
                "Scene Blend",
                "blend",
                BlendMode::Premultiplied,
                false,
            ))?,
            additive: backend.create_render_pipeline(&variant(
                "Scene Additive",
                "additive",
                BlendMode::Additive,
                false,
            ))?,
        })
    }

    // ========================================================================
    // Scene content
    // ========================================================================

    pub fn add_object(&mut self, object: RenderObject) {
        self.objects.push(object);
    }

    pub fn clear_objects(&mut self) {
        self.objects.clear();
    }

    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut RendererSettings {
        &mut self.settings
    }

    /// The post-processing facade.
    pub fn retro_post_processor(&mut self) -> RetroPostProcessor<'_> {
        RetroPostProcessor::new(&mut self.settings)
    }

    #[must_use]
    pub fn engine_time(&self) -> f32 {
        self.engine_time
    }

    pub fn resize_output(&mut self, width: u32, height: u32) {
        self.output_width = width.max(1);
        self.output_height = height.max(1);
    }

    // ========================================================================
    // The frame
    // ========================================================================

    /// Runs one frame: update, record, submit.
    pub fn frame(&mut self, backend: &mut dyn GpuBackend, dt: f32) -> Result<FrameReport> {
        self.engine_time += dt.max(0.0);
        self.frame_index += 1;

        // Rebuild the pyramid if the level count changed this frame.
        if self.settings.bloom_mip_levels() != self.built_mip_levels {
            self.rebuild_bloom(backend)?;
        }

        // 1-2. Camera from orbit parameters; write the UBO.
        let eye = self.orbit.eye();
        let aspect = self.internal_width as f32 / self.internal_height as f32;
        let view_proj = self.camera.projection_matrix(aspect) * self.orbit.view_matrix();
        let mut camera_data = CameraUniforms {
            view_proj: [0.0; 16],
            eye: eye.to_array(),
            _pad: 0.0,
        };
        view_proj.write_cols_to_slice(&mut camera_data.view_proj);
        backend.write_buffer(self.camera_ubo, 0, bytemuck::bytes_of(&camera_data))?;

        let max_workgroups = self.capabilities.max_compute_workgroups_per_dimension;
        let mut passes: Vec<PassSubmission> = Vec::new();
        let mut draw_calls = 0;

        // 3. Scene pass: partition, sort, emit in phase order.
        let scene_commands = self.record_scene(eye, max_workgroups)?;
        draw_calls += scene_commands.len();
        passes.push(PassSubmission {
            label: "scene".into(),
            target: PassTarget::Framebuffer(self.scene_fb),
            clear_color: Some([0.0, 0.0, 0.0, 1.0]),
            depth: Some(crate::gpu::backend::DepthOps { clear: Some(1.0) }),
            commands: scene_commands,
        });

        // 4. Bloom pyramid.
        let bloom_passes = self.bloom.record(
            backend,
            self.fullscreen_vbuffer,
            self.settings.bloom_threshold(),
            max_workgroups,
        )?;
        draw_calls += bloom_passes.iter().map(|p| p.commands.len()).sum::<usize>();
        passes.extend(bloom_passes);

        // 5. Composite into the CRT input, or straight to the swapchain.
        backend.write_buffer(
            self.composite_params,
            0,
            bytemuck::bytes_of(&CompositeParams {
                bloom_intensity: self.settings.bloom_intensity(),
                grain_amount: self.settings.grain_amount(),
                gamma: self.settings.gamma(),
                dither_pattern: (self.frame_index % 4) as u32,
                time: self.engine_time,
                _pad: [0.0; 7],
            }),
        )?;
        let (composite_target, composite_pipeline) = if self.settings.crt_enabled {
            (PassTarget::Framebuffer(self.composite_fb), self.composite_pipeline)
        } else {
            (PassTarget::Swapchain, self.composite_swapchain_pipeline)
        };
        passes.push(PassSubmission {
            label: "composite".into(),
            target: composite_target,
            clear_color: Some([0.0, 0.0, 0.0, 1.0]),
            depth: None,
            commands: vec![DrawCommandBuilder::new()
                .pipeline(composite_pipeline)
                .bind_group(0, self.composite_bind_group)
                .non_indexed(&[self.fullscreen_vbuffer], 3)
                .build(max_workgroups)?],
        });
        draw_calls += 1;

        // 6. CRT pass.
        if self.settings.crt_enabled {
            backend.write_buffer(
                self.crt_params,
                0,
                bytemuck::bytes_of(&self.settings.crt.to_params(
                    self.output_width,
                    self.output_height,
                    self.internal_width,
                    self.internal_height,
                )),
            )?;
            passes.push(PassSubmission {
                label: "crt".into(),
                target: PassTarget::Swapchain,
                clear_color: Some([0.0, 0.0, 0.0, 1.0]),
                depth: None,
                commands: vec![DrawCommandBuilder::new()
                    .pipeline(self.crt_pipeline)
                    .bind_group(0, self.crt_bind_group)
                    .non_indexed(&[self.fullscreen_vbuffer], 3)
                    .build(max_workgroups)?],
            });
            draw_calls += 1;
        }

        // 7. Submit; timestamp resolution and read-back rotation live in the
        // backend.
        backend.begin_frame()?;
        backend.execute(&passes)?;
        backend.end_frame()?;

        Ok(FrameReport {
            draw_calls,
            passes: passes.len(),
        })
    }

    /// Builds the ordered scene command list: opaque, cutout, blend
    /// (back-to-front), additive (back-to-front).
    fn record_scene(
        &self,
        eye: Vec3,
        max_workgroups: u32,
    ) -> Result<Vec<crate::gpu::draw::DrawCommand>> {
        let pipelines = if self.settings.wireframe {
            &self.wire_pipelines
        } else {
            &self.pipelines
        };

        let mut phases: [Vec<usize>; 4] = Default::default();
        let centroids: Vec<Vec3> = self.objects.iter().map(|o| o.centroid).collect();
        for (index, object) in self.objects.iter().enumerate() {
            let phase = match classify_material(&object.material) {
                RenderMode::Opaque => 0,
                RenderMode::AlphaCutout => 1,
                RenderMode::AlphaBlend => 2,
                RenderMode::Additive => 3,
            };
            phases[phase].push(index);
        }
        sort_back_to_front(&centroids, eye, &mut phases[2]);
        sort_back_to_front(&centroids, eye, &mut phases[3]);

        let mut commands = Vec::with_capacity(self.objects.len());
        for (phase, indices) in phases.iter().enumerate() {
            let pipeline = match phase {
                0 => pipelines.opaque,
                1 => pipelines.cutout,
                2 => pipelines.blend,
                _ => pipelines.additive,
            };
            for &index in indices {
                let object = &self.objects[index];
                let mut builder = DrawCommandBuilder::new()
                    .pipeline(pipeline)
                    .bind_group(0, self.camera_bind_group);
                if let Some(group) = object.bind_group {
                    builder = builder.bind_group(1, group);
                }
                builder = match object.ibuffer {
                    Some((ibuffer, format, count)) => {
                        builder.indexed(&object.vbuffers, ibuffer, format, count)
                    }
                    None => builder.non_indexed(&object.vbuffers, object.vertex_count),
                };
                commands.push(builder.label(&object.material.name).build(max_workgroups)?);
            }
        }
        Ok(commands)
    }

    fn rebuild_bloom(&mut self, backend: &mut dyn GpuBackend) -> Result<()> {
        self.bloom.destroy(backend);
        let (extract, downsample, upsample) = self.bloom_shaders;
        self.bloom = BloomPyramid::new(
            backend,
            self.scene_color,
            self.internal_width,
            self.internal_height,
            self.settings.bloom_mip_levels(),
            extract,
            downsample,
            upsample,
            self.post_sampler,
        )?;
        self.built_mip_levels = self.settings.bloom_mip_levels();

        // The composite group references the bloom output; rebuild it.
        backend.destroy_bind_group(self.composite_bind_group);
        self.composite_bind_group = backend.create_bind_group(
            self.composite_layout,
            &[
                (0, BindingResource::Texture { texture: self.scene_color, sampler: Some(self.post_sampler) }),
                (1, BindingResource::Texture { texture: self.bloom.output_texture(), sampler: Some(self.post_sampler) }),
                (2, BindingResource::Sampler(self.post_sampler)),
                (3, BindingResource::Buffer(self.composite_params)),
            ],
        )?;
        Ok(())
    }
}
