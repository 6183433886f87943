//! Device-Loss Recovery
//!
//! Every recoverable resource registers its creation parameters (and
//! optionally the original payload blob) in a [`ResourceRegistry`]. When
//! the device is lost, the [`RecoveryManager`] abandons it, re-initializes
//! the backend (bounded retries with a delay), and recreates everything in
//! dependency order: shaders and bind-group layouts first, then buffers,
//! textures and samplers, then framebuffers, pipelines and bind groups —
//! rewriting the handles dependent descriptors refer to as it goes.
//! Observers are notified at each phase.

use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::errors::{CathodeError, Result};
use crate::gpu::backend::{
    BackendConfig, BindGroupLayoutDesc, BindingResource, BufferDesc, FramebufferDesc, GpuBackend,
    PipelineDesc, SamplerDesc, TextureDesc,
};
use crate::gpu::handle::{
    BindGroupHandle, BindGroupLayoutHandle, BufferHandle, FramebufferHandle, PipelineHandle,
    SamplerHandle, ShaderHandle, TextureHandle,
};

/// Recovery progress reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    Detecting,
    Recreating,
    Complete,
    Failed,
}

/// Retry behaviour.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(250),
        }
    }
}

/// Creation parameters captured per resource.
#[derive(Debug, Clone)]
enum Init {
    Shader { label: String, source: String },
    Layout(BindGroupLayoutDesc),
    Buffer { desc: BufferDesc, payload: Option<Vec<u8>> },
    Texture { desc: TextureDesc, payload: Option<Vec<u8>> },
    Sampler(SamplerDesc),
    Framebuffer(FramebufferDesc),
    RenderPipeline(PipelineDesc),
    BindGroup {
        layout: BindGroupLayoutHandle,
        entries: Vec<(u32, BindingResource)>,
    },
}

/// Registry of everything that must survive a device loss.
#[derive(Default)]
pub struct ResourceRegistry {
    shaders: Vec<(ShaderHandle, Init)>,
    layouts: Vec<(BindGroupLayoutHandle, Init)>,
    buffers: Vec<(BufferHandle, Init)>,
    textures: Vec<(TextureHandle, Init)>,
    samplers: Vec<(SamplerHandle, Init)>,
    framebuffers: Vec<(FramebufferHandle, Init)>,
    pipelines: Vec<(PipelineHandle, Init)>,
    bind_groups: Vec<(BindGroupHandle, Init)>,
}

impl ResourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_shader(&mut self, handle: ShaderHandle, label: &str, source: &str) {
        self.shaders.push((
            handle,
            Init::Shader {
                label: label.to_string(),
                source: source.to_string(),
            },
        ));
    }

    pub fn register_layout(&mut self, handle: BindGroupLayoutHandle, desc: &BindGroupLayoutDesc) {
        self.layouts.push((handle, Init::Layout(desc.clone())));
    }

    pub fn register_buffer(&mut self, handle: BufferHandle, desc: &BufferDesc, payload: Option<Vec<u8>>) {
        self.buffers.push((handle, Init::Buffer { desc: desc.clone(), payload }));
    }

    pub fn register_texture(&mut self, handle: TextureHandle, desc: &TextureDesc, payload: Option<Vec<u8>>) {
        self.textures.push((handle, Init::Texture { desc: desc.clone(), payload }));
    }

    pub fn register_sampler(&mut self, handle: SamplerHandle, desc: &SamplerDesc) {
        self.samplers.push((handle, Init::Sampler(desc.clone())));
    }

    pub fn register_framebuffer(&mut self, handle: FramebufferHandle, desc: &FramebufferDesc) {
        self.framebuffers.push((handle, Init::Framebuffer(desc.clone())));
    }

    pub fn register_render_pipeline(&mut self, handle: PipelineHandle, desc: &PipelineDesc) {
        self.pipelines.push((handle, Init::RenderPipeline(desc.clone())));
    }

    pub fn register_bind_group(
        &mut self,
        handle: BindGroupHandle,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindingResource)],
    ) {
        self.bind_groups.push((
            handle,
            Init::BindGroup {
                layout,
                entries: entries.to_vec(),
            },
        ));
    }

    pub fn unregister_buffer(&mut self, handle: BufferHandle) {
        self.buffers.retain(|(h, _)| *h != handle);
    }

    pub fn unregister_texture(&mut self, handle: TextureHandle) {
        self.textures.retain(|(h, _)| *h != handle);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shaders.len()
            + self.layouts.len()
            + self.buffers.len()
            + self.textures.len()
            + self.samplers.len()
            + self.framebuffers.len()
            + self.pipelines.len()
            + self.bind_groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle remapping produced by one recovery pass: old handle → new handle
/// per class. Callers holding handles re-resolve through these.
#[derive(Debug, Default, Clone)]
pub struct RemapTable {
    pub shaders: FxHashMap<ShaderHandle, ShaderHandle>,
    pub layouts: FxHashMap<BindGroupLayoutHandle, BindGroupLayoutHandle>,
    pub buffers: FxHashMap<BufferHandle, BufferHandle>,
    pub textures: FxHashMap<TextureHandle, TextureHandle>,
    pub samplers: FxHashMap<SamplerHandle, SamplerHandle>,
    pub framebuffers: FxHashMap<FramebufferHandle, FramebufferHandle>,
    pub pipelines: FxHashMap<PipelineHandle, PipelineHandle>,
    pub bind_groups: FxHashMap<BindGroupHandle, BindGroupHandle>,
}

type PhaseObserver = Box<dyn FnMut(RecoveryPhase)>;

/// The device-loss state machine.
pub struct RecoveryManager {
    registry: ResourceRegistry,
    config: RecoveryConfig,
    observers: Vec<PhaseObserver>,
}

impl RecoveryManager {
    #[must_use]
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            registry: ResourceRegistry::new(),
            config,
            observers: Vec::new(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ResourceRegistry {
        &mut self.registry
    }

    /// Subscribes to phase callbacks.
    pub fn on_recovery(&mut self, observer: impl FnMut(RecoveryPhase) + 'static) {
        self.observers.push(Box::new(observer));
    }

    fn notify(&mut self, phase: RecoveryPhase) {
        for observer in &mut self.observers {
            observer(phase);
        }
    }

    /// Runs the full recovery sequence against a freshly lost device.
    ///
    /// Returns the handle remap table on success; notifies `Failed` and
    /// surfaces [`CathodeError::DeviceLost`] after the retry budget.
    pub fn recover(
        &mut self,
        backend: &mut dyn GpuBackend,
        config: &BackendConfig,
    ) -> Result<RemapTable> {
        self.notify(RecoveryPhase::Detecting);

        let mut last_error: Option<CathodeError> = None;
        for attempt in 1..=self.config.max_retries {
            match backend.initialize(config) {
                Ok(true) => {
                    self.notify(RecoveryPhase::Recreating);
                    match self.recreate_all(backend) {
                        Ok(remap) => {
                            self.notify(RecoveryPhase::Complete);
                            return Ok(remap);
                        }
                        Err(e) => {
                            log::error!("recreation failed on attempt {attempt}: {e}");
                            last_error = Some(e);
                        }
                    }
                }
                Ok(false) => {
                    log::error!("no usable adapter on recovery attempt {attempt}");
                }
                Err(e) => {
                    log::error!("device request failed on recovery attempt {attempt}: {e}");
                    last_error = Some(e);
                }
            }
            std::thread::sleep(self.config.retry_delay);
        }

        self.notify(RecoveryPhase::Failed);
        Err(last_error.unwrap_or_else(|| {
            CathodeError::DeviceLost(format!(
                "recovery failed after {} attempts",
                self.config.max_retries
            ))
        }))
    }

    /// Recreates registered resources in dependency order, rewriting the
    /// handles inside dependent descriptors.
    fn recreate_all(&mut self, backend: &mut dyn GpuBackend) -> Result<RemapTable> {
        let mut remap = RemapTable::default();

        // ── Phase 1: shaders and layouts ─────────────────────────────────
        for (handle, init) in &mut self.registry.shaders {
            let Init::Shader { label, source } = init else { continue };
            let new = backend.create_shader(label, source)?;
            remap.shaders.insert(*handle, new);
            *handle = new;
        }
        for (handle, init) in &mut self.registry.layouts {
            let Init::Layout(desc) = init else { continue };
            let new = backend.create_bind_group_layout(desc)?;
            remap.layouts.insert(*handle, new);
            *handle = new;
        }

        // ── Phase 2: buffers, textures, samplers ─────────────────────────
        for (handle, init) in &mut self.registry.buffers {
            let Init::Buffer { desc, payload } = init else { continue };
            let new = backend.create_buffer(desc)?;
            if let Some(bytes) = payload {
                backend.write_buffer(new, 0, bytes)?;
            }
            remap.buffers.insert(*handle, new);
            *handle = new;
        }
        for (handle, init) in &mut self.registry.textures {
            let Init::Texture { desc, payload } = init else { continue };
            let new = backend.create_texture(desc)?;
            if let Some(bytes) = payload {
                backend.upload_texture(new, bytes)?;
            }
            remap.textures.insert(*handle, new);
            *handle = new;
        }
        for (handle, init) in &mut self.registry.samplers {
            let Init::Sampler(desc) = init else { continue };
            let new = backend.create_sampler(desc)?;
            remap.samplers.insert(*handle, new);
            *handle = new;
        }

        // ── Phase 3: framebuffers, pipelines, bind groups ────────────────
        for (handle, init) in &mut self.registry.framebuffers {
            let Init::Framebuffer(desc) = init else { continue };
            for color in &mut desc.color {
                if let Some(new) = remap.textures.get(color) {
                    *color = *new;
                }
            }
            if let Some(depth) = &mut desc.depth {
                if let Some(new) = remap.textures.get(depth) {
                    *depth = *new;
                }
            }
            let new = backend.create_framebuffer(desc)?;
            remap.framebuffers.insert(*handle, new);
            *handle = new;
        }
        for (handle, init) in &mut self.registry.pipelines {
            let Init::RenderPipeline(desc) = init else { continue };
            if let Some(new) = remap.shaders.get(&desc.shader) {
                desc.shader = *new;
            }
            for layout in &mut desc.bind_group_layouts {
                if let Some(new) = remap.layouts.get(layout) {
                    *layout = *new;
                }
            }
            let new = backend.create_render_pipeline(desc)?;
            remap.pipelines.insert(*handle, new);
            *handle = new;
        }
        for (handle, init) in &mut self.registry.bind_groups {
            let Init::BindGroup { layout, entries } = init else { continue };
            if let Some(new) = remap.layouts.get(layout) {
                *layout = *new;
            }
            for (_, resource) in entries.iter_mut() {
                match resource {
                    BindingResource::Buffer(b) => {
                        if let Some(new) = remap.buffers.get(b) {
                            *b = *new;
                        }
                    }
                    BindingResource::Sampler(s) => {
                        if let Some(new) = remap.samplers.get(s) {
                            *s = *new;
                        }
                    }
                    BindingResource::Texture { texture, sampler } => {
                        if let Some(new) = remap.textures.get(texture) {
                            *texture = *new;
                        }
                        if let Some(s) = sampler {
                            if let Some(new) = remap.samplers.get(s) {
                                *s = *new;
                            }
                        }
                    }
                }
            }
            let new = backend.create_bind_group(*layout, entries)?;
            remap.bind_groups.insert(*handle, new);
            *handle = new;
        }

        log::info!("recreated {} resources after device loss", self.registry.len());
        Ok(remap)
    }
}
