//! System Scheduler
//!
//! Systems are named values with a priority and optional `init` / `update` /
//! `cleanup` hooks. `update` runs every frame in ascending priority order;
//! systems sharing a priority run in registration order. `init` fires at most
//! once, lazily, before the system's first update; `cleanup` fires exactly
//! once per registered system when the scheduler shuts down.

use crate::ecs::world::World;
use crate::errors::{CathodeError, Result};

/// Named priority bands, ascending.
pub mod priority {
    pub const FIRST: i32 = 0;
    pub const PRE_UPDATE: i32 = 100;
    pub const UPDATE: i32 = 200;
    pub const POST_UPDATE: i32 = 300;
    pub const RENDER: i32 = 400;
    pub const LAST: i32 = 500;
}

type InitFn = Box<dyn FnMut(&mut World)>;
type UpdateFn = Box<dyn FnMut(&mut World, f32)>;
type CleanupFn = Box<dyn FnMut(&mut World)>;

/// One registered system.
pub struct SystemDesc {
    pub name: String,
    pub priority: i32,
    init: Option<InitFn>,
    update: Option<UpdateFn>,
    cleanup: Option<CleanupFn>,
    initialized: bool,
}

impl SystemDesc {
    #[must_use]
    pub fn new(name: &str, priority: i32) -> Self {
        Self {
            name: name.to_string(),
            priority,
            init: None,
            update: None,
            cleanup: None,
            initialized: false,
        }
    }

    #[must_use]
    pub fn on_init(mut self, f: impl FnMut(&mut World) + 'static) -> Self {
        self.init = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_update(mut self, f: impl FnMut(&mut World, f32) + 'static) -> Self {
        self.update = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_cleanup(mut self, f: impl FnMut(&mut World) + 'static) -> Self {
        self.cleanup = Some(Box::new(f));
        self
    }
}

/// Priority-ordered update loop.
#[derive(Default)]
pub struct Scheduler {
    systems: Vec<SystemDesc>,
    /// Monotonic registration counter; ties within a priority keep it.
    next_seq: u64,
    seqs: Vec<u64>,
    shut_down: bool,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a system. Duplicate names are rejected.
    pub fn register(&mut self, system: SystemDesc) -> Result<()> {
        if self.systems.iter().any(|s| s.name == system.name) {
            return Err(CathodeError::DuplicateSystem(system.name));
        }
        let seq = self.next_seq;
        self.next_seq += 1;

        // Insert sorted by (priority, seq) so update order is just a scan.
        let pos = self
            .systems
            .iter()
            .zip(&self.seqs)
            .position(|(s, &sseq)| (s.priority, sseq) > (system.priority, seq))
            .unwrap_or(self.systems.len());
        self.systems.insert(pos, system);
        self.seqs.insert(pos, seq);
        Ok(())
    }

    /// Removes a system by name, running nothing.
    pub fn unregister(&mut self, name: &str) -> bool {
        if let Some(pos) = self.systems.iter().position(|s| s.name == name) {
            self.systems.remove(pos);
            self.seqs.remove(pos);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Runs one frame: lazy `init`, then `update(dt)`, ascending priority.
    pub fn update(&mut self, world: &mut World, dt: f32) {
        for system in &mut self.systems {
            if !system.initialized {
                if let Some(init) = system.init.as_mut() {
                    init(world);
                }
                system.initialized = true;
            }
            if let Some(update) = system.update.as_mut() {
                update(world, dt);
            }
        }
    }

    /// Runs every system's `cleanup` exactly once. Idempotent.
    pub fn shutdown(&mut self, world: &mut World) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for system in &mut self.systems {
            if let Some(cleanup) = system.cleanup.as_mut() {
                cleanup(world);
            }
        }
    }

    /// Registered system names in update order, for diagnostics.
    #[must_use]
    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.name.as_str()).collect()
    }
}
