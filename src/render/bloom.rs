//! Bloom Mip Pyramid
//!
//! Quarter-resolution pyramid with a luminance-threshold extract, a 13-tap
//! downsample chain, and a 3×3 tent upsample chain that runs on
//! additive-blend pipelines with `clear` load ops, applying a per-level
//! blend factor from the parameter block. The accumulated bloom ends in
//! the extract texture (level 0), which the composite stage samples.

use smallvec::smallvec;

use crate::errors::Result;
use crate::gpu::backend::{
    BindGroupLayoutDesc, BindingKind, BindingResource, BlendMode, BufferDesc, BufferKind,
    CullMode, FramebufferDesc, GpuBackend, PassSubmission, PassTarget, PipelineDesc,
    VertexLayout,
};
use crate::gpu::draw::DrawCommandBuilder;
use crate::gpu::format::TextureFormat;
use crate::gpu::handle::{
    BindGroupHandle, BindGroupLayoutHandle, BufferHandle, FramebufferHandle, PipelineHandle,
    SamplerHandle, ShaderHandle, TextureHandle,
};
use crate::gpu::backend::TextureDesc;
use crate::render::params::{BloomExtractParams, DownsampleParams, UpsampleParams};

/// Per-level additive blend factors, finest (top) to coarsest (bottom).
pub const LEVEL_BLEND_FACTORS: [f32; 5] = [0.3, 0.5, 0.6, 0.8, 1.0];

struct MipLevel {
    texture: TextureHandle,
    framebuffer: FramebufferHandle,
    width: u32,
    height: u32,
}

/// The pyramid's GPU state.
pub struct BloomPyramid {
    levels: Vec<MipLevel>,
    extract_pipeline: PipelineHandle,
    downsample_pipeline: PipelineHandle,
    upsample_pipeline: PipelineHandle,
    layout: BindGroupLayoutHandle,

    extract_params: BufferHandle,
    downsample_params: Vec<BufferHandle>,
    upsample_params: Vec<BufferHandle>,

    extract_bind_group: BindGroupHandle,
    downsample_bind_groups: Vec<BindGroupHandle>,
    upsample_bind_groups: Vec<BindGroupHandle>,
}

impl BloomPyramid {
    /// Builds the full pyramid for `mip_levels` ∈ 1..=5 over a scene target
    /// of `scene_w × scene_h`.
    pub fn new(
        backend: &mut dyn GpuBackend,
        scene_texture: TextureHandle,
        scene_w: u32,
        scene_h: u32,
        mip_levels: u32,
        extract_shader: ShaderHandle,
        downsample_shader: ShaderHandle,
        upsample_shader: ShaderHandle,
        sampler: SamplerHandle,
    ) -> Result<Self> {
        let mip_levels = mip_levels.clamp(1, 5) as usize;

        let layout = backend.create_bind_group_layout(&BindGroupLayoutDesc {
            label: "Bloom Layout".into(),
            entries: smallvec![
                (0, BindingKind::Texture),
                (1, BindingKind::Sampler),
                (2, BindingKind::UniformBuffer),
            ],
        })?;

        // ── Mip chain: level 0 starts at quarter resolution ───────────────
        let mut levels = Vec::with_capacity(mip_levels);
        let mut width = (scene_w / 4).max(1);
        let mut height = (scene_h / 4).max(1);
        for index in 0..mip_levels {
            let texture = backend.create_texture(&TextureDesc {
                label: format!("Bloom Mip {index}"),
                width,
                height,
                format: TextureFormat::Rgba16Float,
                mip_level_count: 1,
                render_target: true,
            })?;
            let framebuffer = backend.create_framebuffer(&FramebufferDesc {
                label: format!("Bloom Mip {index} FB"),
                color: smallvec![texture],
                depth: None,
            })?;
            levels.push(MipLevel {
                texture,
                framebuffer,
                width,
                height,
            });
            width = (width / 2).max(1);
            height = (height / 2).max(1);
        }

        // ── Fullscreen pipelines ─────────────────────────────────────────
        let fullscreen = |shader: ShaderHandle, label: &str, blend: BlendMode| PipelineDesc {
            label: label.to_string(),
            shader,
            vertex_layout: VertexLayout {
                stride: 8,
                attributes: vec![crate::gpu::backend::VertexAttribute {
                    name: "position".into(),
                    format: crate::gpu::backend::VertexFormat::F32x2,
                    components: 2,
                    offset: 0,
                }],
            },
            instanced: false,
            bind_group_layouts: smallvec![layout],
            blend,
            depth_write: false,
            depth_test: false,
            cull: CullMode::None,
            color_targets: smallvec![TextureFormat::Rgba16Float],
            wireframe: false,
        };

        let extract_pipeline =
            backend.create_render_pipeline(&fullscreen(extract_shader, "Bloom Extract", BlendMode::Replace))?;
        let downsample_pipeline = backend.create_render_pipeline(&fullscreen(
            downsample_shader,
            "Bloom Downsample",
            BlendMode::Replace,
        ))?;
        // Additive accumulation with per-level factors from the params.
        let upsample_pipeline = backend.create_render_pipeline(&fullscreen(
            upsample_shader,
            "Bloom Upsample",
            BlendMode::AdditiveFull,
        ))?;

        // ── Parameter buffers ────────────────────────────────────────────
        let uniform = |label: String| BufferDesc {
            label,
            kind: BufferKind::Uniform,
            size: 32,
            dynamic: false,
        };
        let extract_params = backend.create_buffer(&uniform("Bloom Extract Params".into()))?;

        let mut downsample_params = Vec::new();
        let mut upsample_params = Vec::new();
        for index in 1..levels.len() {
            let src = &levels[index - 1];
            let buffer = backend.create_buffer(&uniform(format!("Bloom DS Params {index}")))?;
            backend.write_buffer(
                buffer,
                0,
                bytemuck::bytes_of(&DownsampleParams {
                    texel_size: [1.0 / src.width as f32, 1.0 / src.height as f32],
                    _pad: [0.0; 6],
                }),
            )?;
            downsample_params.push(buffer);

            // Upsample step writing into level index-1, sourced from index.
            let source = &levels[index];
            let target_level = index - 1;
            let buffer = backend.create_buffer(&uniform(format!("Bloom US Params {target_level}")))?;
            backend.write_buffer(
                buffer,
                0,
                bytemuck::bytes_of(&UpsampleParams {
                    texel_size: [1.0 / source.width as f32, 1.0 / source.height as f32],
                    blend_factor: LEVEL_BLEND_FACTORS[target_level.min(LEVEL_BLEND_FACTORS.len() - 1)],
                    _pad: [0.0; 5],
                }),
            )?;
            upsample_params.push(buffer);
        }

        // ── Bind groups ──────────────────────────────────────────────────
        fn bind(
            backend: &mut dyn GpuBackend,
            layout: BindGroupLayoutHandle,
            sampler: SamplerHandle,
            texture: TextureHandle,
            params: BufferHandle,
        ) -> Result<BindGroupHandle> {
            backend.create_bind_group(
                layout,
                &[
                    (0, BindingResource::Texture { texture, sampler: Some(sampler) }),
                    (1, BindingResource::Sampler(sampler)),
                    (2, BindingResource::Buffer(params)),
                ],
            )
        }

        let extract_bind_group = bind(backend, layout, sampler, scene_texture, extract_params)?;
        let mut downsample_bind_groups = Vec::new();
        let mut upsample_bind_groups = Vec::new();
        for index in 1..levels.len() {
            downsample_bind_groups.push(bind(
                backend,
                layout,
                sampler,
                levels[index - 1].texture,
                downsample_params[index - 1],
            )?);
            upsample_bind_groups.push(bind(
                backend,
                layout,
                sampler,
                levels[index].texture,
                upsample_params[index - 1],
            )?);
        }

        Ok(Self {
            levels,
            extract_pipeline,
            downsample_pipeline,
            upsample_pipeline,
            layout,
            extract_params,
            downsample_params,
            upsample_params,
            extract_bind_group,
            downsample_bind_groups,
            upsample_bind_groups,
        })
    }

    /// The texture holding the accumulated bloom after the pyramid ran.
    #[must_use]
    pub fn output_texture(&self) -> TextureHandle {
        self.levels[0].texture
    }

    #[must_use]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    #[must_use]
    pub fn level_size(&self, index: usize) -> (u32, u32) {
        (self.levels[index].width, self.levels[index].height)
    }

    /// Writes the frame's threshold and emits the pass list: extract, the
    /// downsample chain, then the upsample chain from the deepest level back
    /// up.
    pub fn record(
        &self,
        backend: &mut dyn GpuBackend,
        fullscreen_vbuffer: BufferHandle,
        threshold: f32,
        max_workgroups: u32,
    ) -> Result<Vec<PassSubmission>> {
        backend.write_buffer(
            self.extract_params,
            0,
            bytemuck::bytes_of(&BloomExtractParams {
                threshold,
                _pad: [0.0; 7],
            }),
        )?;

        let mut passes = Vec::with_capacity(1 + 2 * (self.levels.len() - 1));

        let fullscreen_draw = |pipeline: PipelineHandle, group: BindGroupHandle| {
            DrawCommandBuilder::new()
                .pipeline(pipeline)
                .bind_group(0, group)
                .non_indexed(&[fullscreen_vbuffer], 3)
                .build(max_workgroups)
        };

        // Extract: scene → level 0.
        passes.push(PassSubmission {
            label: "bloom extract".into(),
            target: PassTarget::Framebuffer(self.levels[0].framebuffer),
            clear_color: Some([0.0, 0.0, 0.0, 1.0]),
            depth: None,
            commands: vec![fullscreen_draw(self.extract_pipeline, self.extract_bind_group)?],
        });

        // Downsample chain: level i-1 → level i.
        for index in 1..self.levels.len() {
            passes.push(PassSubmission {
                label: format!("bloom downsample {index}"),
                target: PassTarget::Framebuffer(self.levels[index].framebuffer),
                clear_color: Some([0.0, 0.0, 0.0, 1.0]),
                depth: None,
                commands: vec![fullscreen_draw(
                    self.downsample_pipeline,
                    self.downsample_bind_groups[index - 1],
                )?],
            });
        }

        // Upsample chain: deepest → level 0, additive pipelines, clear load.
        for index in (1..self.levels.len()).rev() {
            let target_level = index - 1;
            passes.push(PassSubmission {
                label: format!("bloom upsample {target_level}"),
                target: PassTarget::Framebuffer(self.levels[target_level].framebuffer),
                clear_color: Some([0.0, 0.0, 0.0, 1.0]),
                depth: None,
                commands: vec![fullscreen_draw(
                    self.upsample_pipeline,
                    self.upsample_bind_groups[target_level],
                )?],
            });
        }

        Ok(passes)
    }

    /// Releases every pyramid resource (resize path).
    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        for level in &self.levels {
            backend.destroy_framebuffer(level.framebuffer);
            backend.destroy_texture(level.texture);
        }
        self.levels.clear();
        backend.destroy_bind_group(self.extract_bind_group);
        for group in self
            .downsample_bind_groups
            .drain(..)
            .chain(self.upsample_bind_groups.drain(..))
        {
            backend.destroy_bind_group(group);
        }
        backend.destroy_buffer(self.extract_params);
        for buffer in self
            .downsample_params
            .drain(..)
            .chain(self.upsample_params.drain(..))
        {
            backend.destroy_buffer(buffer);
        }
        backend.destroy_bind_group_layout(self.layout);
        backend.destroy_pipeline(self.extract_pipeline);
        backend.destroy_pipeline(self.downsample_pipeline);
        backend.destroy_pipeline(self.upsample_pipeline);
    }
}
