//! Engine Façade
//!
//! Owns the world, the scheduler, the transform system, the resource
//! manager, the renderer, and the backend, and drives the per-frame data
//! flow: systems update the ECS, the transform system flushes dirty world
//! matrices, then the renderer records and submits the frame.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use glam::Vec3;

use crate::ecs::component::ComponentData;
use crate::ecs::schedule::Scheduler;
use crate::ecs::world::World;
use crate::ecs::Entity;
use crate::errors::{CathodeError, Result};
use crate::gpu::backend::{BackendConfig, GpuBackend};
use crate::gpu::recovery::{RecoveryConfig, RecoveryManager, RemapTable};
use crate::gpu::wgpu_backend::WgpuBackend;
use crate::render::frame::{FrameReport, Renderer};
use crate::resources::cache::CacheConfig;
use crate::resources::manager::ResourceManager;
use crate::scene::light::{self, Light};
use crate::scene::motion::register_motion_systems;
use crate::scene::transform::Transform;
use crate::scene::transform_system::TransformSystem;
use crate::utils::time::Timer;

/// The engine: one world, one renderer, one backend.
pub struct Engine {
    pub world: World,
    pub scheduler: Scheduler,
    transform: Rc<RefCell<TransformSystem>>,
    pub resources: Arc<ResourceManager>,
    pub renderer: Renderer,
    backend: Box<dyn GpuBackend>,
    backend_config: BackendConfig,
    recovery: RecoveryManager,
    timer: Timer,
    running: bool,
}

impl Engine {
    /// Builds the engine over an already-constructed backend.
    ///
    /// Fails with remediation text when the backend reports no usable
    /// adapter; the embedder shows the message and skips the frame loop.
    pub fn with_backend(mut backend: Box<dyn GpuBackend>, config: BackendConfig) -> Result<Self> {
        if !backend.initialize(&config)? {
            return Err(CathodeError::AdapterRequestFailed(
                "no compatible GPU adapter was found; update your graphics drivers or \
                 enable hardware acceleration in your host"
                    .into(),
            ));
        }

        let mut world = World::new();
        let mut scheduler = Scheduler::new();

        TransformSystem::register(&mut world);
        world.register_component(light::descriptor());
        register_motion_systems(&mut world, &mut scheduler)?;

        let transform = Rc::new(RefCell::new(TransformSystem::new()));
        scheduler.register(TransformSystem::system(&transform))?;

        let renderer = Renderer::new(backend.as_mut(), config.width, config.height)?;

        Ok(Self {
            world,
            scheduler,
            transform,
            resources: ResourceManager::new(CacheConfig::default()),
            renderer,
            backend,
            backend_config: config,
            recovery: RecoveryManager::new(RecoveryConfig::default()),
            timer: Timer::new(),
            running: true,
        })
    }

    /// Builds the engine on the wgpu backend.
    pub fn new(config: BackendConfig) -> Result<Self> {
        let backend = Box::new(WgpuBackend::new(&config));
        Self::with_backend(backend, config)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Shared handle to the transform system, for direct matrix queries.
    #[must_use]
    pub fn transform(&self) -> Rc<RefCell<TransformSystem>> {
        Rc::clone(&self.transform)
    }

    pub fn backend_mut(&mut self) -> &mut dyn GpuBackend {
        self.backend.as_mut()
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// Spawns an entity with a transform plus any extra components.
    pub fn spawn(&mut self, transform: Transform, extra: &[ComponentData]) -> Result<Entity> {
        let mut components = vec![transform.into_data()];
        components.extend_from_slice(extra);
        self.world.spawn(&components)
    }

    /// Spawns a light entity at a position.
    pub fn spawn_light(&mut self, position: Vec3, light: Light) -> Result<Entity> {
        self.spawn(Transform::from_position(position), &[light.into_data()])
    }

    /// Destroys an entity: the transform system runs its teardown first so
    /// matrix slots are reclaimed and children are detached.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        self.transform.borrow_mut().on_destroy(&mut self.world, entity);
        self.world.despawn(entity)
    }

    /// Reparents an entity in the transform hierarchy.
    pub fn set_parent(&mut self, entity: Entity, parent: Option<Entity>) -> Result<()> {
        self.transform.borrow_mut().set_parent(&mut self.world, entity, parent)
    }

    // ========================================================================
    // The frame
    // ========================================================================

    /// Advances one frame on the host's animation callback.
    pub fn frame(&mut self) -> Result<FrameReport> {
        if !self.running {
            return Ok(FrameReport::default());
        }
        self.timer.tick();
        let dt = self.timer.dt_seconds();

        // ECS update; the transform flush runs at the head of POST_UPDATE so
        // world matrices are coherent for everything after it.
        self.scheduler.update(&mut self.world, dt);

        // TTL sweeps ride the frame cadence.
        self.resources.evict_expired();

        self.renderer.frame(self.backend.as_mut(), dt)
    }

    /// Runs the device-loss recovery state machine. On success, handles held
    /// by callers must be re-resolved through the returned remap table.
    pub fn handle_device_loss(&mut self) -> Result<RemapTable> {
        log::warn!("device loss reported; starting recovery");
        self.recovery.recover(self.backend.as_mut(), &self.backend_config)
    }

    /// Recovery registry access, for registering recoverable resources.
    pub fn recovery_mut(&mut self) -> &mut RecoveryManager {
        &mut self.recovery
    }

    /// Stops the frame loop and runs system cleanup exactly once.
    pub fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.scheduler.shutdown(&mut self.world);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
