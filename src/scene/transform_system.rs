//! Transform System
//!
//! Converts per-entity TRS into local and world matrices stored in the
//! contiguous pools of [`MatrixStorage`]. Hierarchy links live in the
//! Transform component's i32 fields as a singly-linked sibling list, so the
//! system owns no per-entity allocations of its own besides the matrix rows
//! and a normal-matrix cache.
//!
//! # Dirty Propagation
//!
//! Mutation helpers mark only the touched entity dirty. Children are *not*
//! eagerly marked: during `update`, whenever an entity's world matrix is
//! recomputed, each child in its sibling list is marked dirty and appended
//! to the worklist, so exactly the affected subtree is visited, once, in a
//! single pass.
//!
//! # Ancestor Chains
//!
//! Before an entity updates, its dirty ancestors are collected into a stack
//! (capped at [`MAX_ANCESTOR_DEPTH`]) and replayed root-first, guaranteeing
//! `parent.world` is current before `child.world = parent.world × local`
//! without recursion.

use std::cell::RefCell;
use std::rc::Rc;

use glam::Vec3;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::ecs::schedule::{priority, SystemDesc};
use crate::ecs::world::{EntityLocation, World};
use crate::ecs::Entity;
use crate::errors::{CathodeError, Result};
use crate::math::kernel::{compose_trs_to, mul_to, normal_matrix_to};
use crate::math::storage::MatrixStorage;
use crate::scene::transform::{descriptor, field, TRANSFORM};

/// Ancestor chains deeper than this abort with a logged error.
pub const MAX_ANCESTOR_DEPTH: usize = 100;

const NONE: i32 = -1;

/// The hierarchy/matrix system for the Transform component.
pub struct TransformSystem {
    local: MatrixStorage,
    world_pool: MatrixStorage,
    /// Cached inverse-transpose 3×3 (vec4-padded), keyed by entity id.
    /// Absent = not computed since the last dirty set.
    normal_cache: FxHashMap<u32, [f32; 12]>,
}

impl TransformSystem {
    #[must_use]
    pub fn new() -> Self {
        Self {
            local: MatrixStorage::new(256),
            world_pool: MatrixStorage::new(256),
            normal_cache: FxHashMap::default(),
        }
    }

    /// Registers the Transform schema with the world.
    pub fn register(world: &mut World) {
        world.register_component(descriptor());
    }

    /// Wraps a shared system handle for the scheduler, placed at the head of
    /// the POST_UPDATE band so world matrices are coherent before any later
    /// system runs.
    #[must_use]
    pub fn system(this: &Rc<RefCell<TransformSystem>>) -> SystemDesc {
        let shared = Rc::clone(this);
        SystemDesc::new("transform_flush", priority::POST_UPDATE)
            .on_update(move |world, _dt| shared.borrow_mut().update(world))
    }

    // ========================================================================
    // Mutation helpers
    // ========================================================================

    /// Sets local position and marks the entity dirty.
    pub fn set_position(&mut self, world: &mut World, entity: Entity, position: Vec3) {
        self.set_trs(world, entity, field::PX, position);
    }

    /// Sets local Euler rotation (XYZ order) and marks the entity dirty.
    pub fn set_rotation(&mut self, world: &mut World, entity: Entity, euler: Vec3) {
        self.set_trs(world, entity, field::RX, euler);
    }

    /// Sets local scale and marks the entity dirty.
    pub fn set_scale(&mut self, world: &mut World, entity: Entity, scale: Vec3) {
        self.set_trs(world, entity, field::SX, scale);
    }

    fn set_trs(&mut self, world: &mut World, entity: Entity, base: usize, v: Vec3) {
        let Some(loc) = transform_location(world, entity) else {
            log::warn!("transform mutation on entity {} without Transform", entity.id);
            return;
        };
        write(world, loc, base, f64::from(v.x));
        write(world, loc, base + 1, f64::from(v.y));
        write(world, loc, base + 2, f64::from(v.z));
        self.mark_dirty_at(world, entity.id, loc);
    }

    /// Reparents `entity` under `parent` (or detaches with `None`).
    ///
    /// Refuses with [`CathodeError::HierarchyCycle`] when the new parent is
    /// the entity itself or one of its descendants.
    pub fn set_parent(&mut self, world: &mut World, entity: Entity, parent: Option<Entity>) -> Result<()> {
        let Some(loc) = transform_location(world, entity) else {
            log::warn!("set_parent on entity {} without Transform", entity.id);
            return Ok(());
        };
        if let Some(p) = parent {
            if transform_location(world, p).is_none() {
                log::warn!("set_parent: parent {} missing Transform; detaching instead", p.id);
                return self.set_parent(world, entity, None);
            }
            if self.would_cycle(world, entity.id, p.id) {
                log::error!("set_parent refused: {} under {} would cycle", entity.id, p.id);
                return Err(CathodeError::HierarchyCycle {
                    entity: entity.id,
                    parent: p.id,
                });
            }
        }

        self.unlink_from_parent(world, entity.id, loc);

        if let Some(p) = parent {
            let ploc = transform_location(world, p).expect("checked above");
            // Prepend to the new parent's child list.
            let head = read_i(world, ploc, field::FIRST_CHILD);
            write(world, loc, field::NEXT_SIBLING, f64::from(head));
            write(world, ploc, field::FIRST_CHILD, f64::from(entity.id as i32));
            write(world, loc, field::PARENT, f64::from(p.id as i32));
        } else {
            write(world, loc, field::PARENT, f64::from(NONE));
        }
        self.mark_dirty_at(world, entity.id, loc);
        Ok(())
    }

    /// Walks up from `candidate` looking for `entity`; a visited set guards
    /// against pre-existing corrupt links.
    fn would_cycle(&self, world: &World, entity: u32, candidate: u32) -> bool {
        if entity == candidate {
            return true;
        }
        let mut visited = FxHashSet::default();
        let mut cur = candidate as i32;
        while cur != NONE {
            let id = cur as u32;
            if id == entity {
                return true;
            }
            if !visited.insert(id) {
                log::error!("existing cycle detected in hierarchy at {id}");
                return true;
            }
            let Some(loc) = location_of(world, id) else {
                break;
            };
            cur = read_i(world, loc, field::PARENT);
        }
        false
    }

    fn unlink_from_parent(&mut self, world: &mut World, id: u32, loc: EntityLocation) {
        let parent = read_i(world, loc, field::PARENT);
        let next = read_i(world, loc, field::NEXT_SIBLING);
        if parent == NONE {
            write(world, loc, field::NEXT_SIBLING, f64::from(NONE));
            return;
        }
        if let Some(ploc) = location_of(world, parent as u32) {
            let mut cur = read_i(world, ploc, field::FIRST_CHILD);
            if cur == id as i32 {
                write(world, ploc, field::FIRST_CHILD, f64::from(next));
            } else {
                while cur != NONE {
                    let Some(cloc) = location_of(world, cur as u32) else {
                        break;
                    };
                    let sibling = read_i(world, cloc, field::NEXT_SIBLING);
                    if sibling == id as i32 {
                        write(world, cloc, field::NEXT_SIBLING, f64::from(next));
                        break;
                    }
                    cur = sibling;
                }
            }
        }
        write(world, loc, field::NEXT_SIBLING, f64::from(NONE));
    }

    fn mark_dirty_at(&mut self, world: &mut World, id: u32, loc: EntityLocation) {
        write(world, loc, field::DIRTY, 1.0);
        self.normal_cache.remove(&id);
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Flushes every dirty transform: local from TRS, world from the parent
    /// chain, children marked and visited in the same pass.
    pub fn update(&mut self, world: &mut World) {
        let mut queue: Vec<u32> = Vec::new();
        for (_, arch) in world.archetypes().iter() {
            if !arch.has_component(TRANSFORM) {
                continue;
            }
            let Ok(columns) = arch.component(TRANSFORM) else {
                continue;
            };
            let Ok(dirty) = columns.u8_slice(field::DIRTY) else {
                continue;
            };
            for (index, flag) in dirty.iter().enumerate() {
                if *flag != 0 {
                    queue.push(arch.entities()[index].id);
                }
            }
        }

        let mut head = 0;
        while head < queue.len() {
            let id = queue[head];
            head += 1;
            let Some(loc) = location_of(world, id) else {
                continue;
            };
            // Already refreshed through an ancestor chain this pass.
            if read_i(world, loc, field::DIRTY) == 0 {
                continue;
            }
            self.update_entity(world, id, &mut queue);
        }
    }

    fn update_entity(&mut self, world: &mut World, id: u32, queue: &mut Vec<u32>) {
        // Collect dirty ancestors, nearest first.
        let mut stack: Vec<u32> = Vec::new();
        let Some(loc) = location_of(world, id) else {
            return;
        };
        let mut cur = read_i(world, loc, field::PARENT);
        let mut depth = 0;
        while cur != NONE {
            depth += 1;
            if depth > MAX_ANCESTOR_DEPTH {
                log::error!(
                    "transform ancestor chain deeper than {MAX_ANCESTOR_DEPTH} at entity {id}; best-effort update"
                );
                break;
            }
            let Some(aloc) = location_of(world, cur as u32) else {
                log::warn!("entity {id}: parent {cur} is gone; treating as root");
                break;
            };
            if read_i(world, aloc, field::DIRTY) != 0 {
                stack.push(cur as u32);
            }
            cur = read_i(world, aloc, field::PARENT);
        }

        // Root-first replay, then the entity itself.
        for &ancestor in stack.iter().rev() {
            self.recompute(world, ancestor, queue);
        }
        self.recompute(world, id, queue);
    }

    /// Recomputes local and world for one entity, clears its dirty flag, and
    /// marks + enqueues its children.
    fn recompute(&mut self, world: &mut World, id: u32, queue: &mut Vec<u32>) {
        let Some(loc) = location_of(world, id) else {
            return;
        };

        let local_idx = match self.ensure_slot(world, loc, field::LOCAL_MATRIX, true) {
            Ok(i) => i,
            Err(e) => {
                log::error!("entity {id}: local matrix allocation failed: {e}");
                return;
            }
        };
        let world_idx = match self.ensure_slot(world, loc, field::WORLD_MATRIX, false) {
            Ok(i) => i,
            Err(e) => {
                log::error!("entity {id}: world matrix allocation failed: {e}");
                return;
            }
        };

        let position = read_vec3(world, loc, field::PX);
        let euler = read_vec3(world, loc, field::RX);
        let scale = read_vec3(world, loc, field::SX);
        compose_trs_to(self.local.matrix_mut(local_idx), position, euler, scale);

        let parent = read_i(world, loc, field::PARENT);
        let parent_world = if parent == NONE {
            None
        } else {
            match location_of(world, parent as u32) {
                Some(ploc) => {
                    let idx = read_i(world, ploc, field::WORLD_MATRIX);
                    if idx >= 0 {
                        Some(idx as usize)
                    } else {
                        log::warn!("entity {id}: parent {parent} has no world matrix yet");
                        None
                    }
                }
                None => {
                    log::warn!("entity {id}: parent {parent} missing; treating as root");
                    None
                }
            }
        };

        match parent_world {
            Some(pidx) => {
                let local = self.local.matrix(local_idx);
                let (pw, out) = self.world_pool.pair_mut(pidx, world_idx);
                mul_to(out, pw, local);
            }
            None => {
                self.world_pool
                    .matrix_mut(world_idx)
                    .copy_from_slice(self.local.matrix(local_idx));
            }
        }

        write(world, loc, field::DIRTY, 0.0);
        self.normal_cache.remove(&id);

        // Lazy propagation: children learn about the move here, not at
        // mutation time.
        let mut child = read_i(world, loc, field::FIRST_CHILD);
        let mut hops = 0;
        while child != NONE {
            hops += 1;
            if hops > MAX_ANCESTOR_DEPTH * 64 {
                log::error!("entity {id}: sibling list did not terminate");
                break;
            }
            let Some(cloc) = location_of(world, child as u32) else {
                break;
            };
            write(world, cloc, field::DIRTY, 1.0);
            self.normal_cache.remove(&(child as u32));
            queue.push(child as u32);
            child = read_i(world, cloc, field::NEXT_SIBLING);
        }
    }

    fn ensure_slot(
        &mut self,
        world: &mut World,
        loc: EntityLocation,
        f: usize,
        local: bool,
    ) -> Result<usize> {
        let idx = read_i(world, loc, f);
        if idx >= 0 {
            return Ok(idx as usize);
        }
        let pool = if local { &mut self.local } else { &mut self.world_pool };
        let slot = pool.allocate()?;
        write(world, loc, f, slot as f64);
        Ok(slot)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// World matrix of an updated entity.
    #[must_use]
    pub fn world_matrix(&self, world: &World, entity: Entity) -> Option<&[f32; 16]> {
        let loc = transform_location(world, entity)?;
        let idx = read_i(world, loc, field::WORLD_MATRIX);
        (idx >= 0).then(|| self.world_pool.matrix(idx as usize))
    }

    /// World-space translation, extracted from the world matrix.
    #[must_use]
    pub fn world_position(&self, world: &World, entity: Entity) -> Option<Vec3> {
        self.world_matrix(world, entity)
            .map(|m| Vec3::new(m[12], m[13], m[14]))
    }

    /// Normal matrix (inverse-transpose 3×3, vec4-padded). Cached per
    /// entity; `None` while dirty-invalidated or when the world matrix is
    /// singular.
    pub fn normal_matrix(&mut self, world: &World, entity: Entity) -> Option<[f32; 12]> {
        if let Some(cached) = self.normal_cache.get(&entity.id) {
            return Some(*cached);
        }
        let loc = transform_location(world, entity)?;
        let idx = read_i(world, loc, field::WORLD_MATRIX);
        if idx < 0 {
            return None;
        }
        let mut out = [0.0; 12];
        if !normal_matrix_to(&mut out, self.world_pool.matrix(idx as usize)) {
            return None;
        }
        self.normal_cache.insert(entity.id, out);
        Some(out)
    }

    /// Number of live rows across both pools, for leak assertions.
    #[must_use]
    pub fn live_matrices(&self) -> usize {
        self.local.live() + self.world_pool.live()
    }

    // ========================================================================
    // Destruction hook
    // ========================================================================

    /// Must run before the world despawns `entity`: frees both matrix rows,
    /// unlinks the entity from its parent's child list, and detaches its
    /// children (marking them dirty).
    pub fn on_destroy(&mut self, world: &mut World, entity: Entity) {
        let Some(loc) = transform_location(world, entity) else {
            return;
        };

        for f in [field::LOCAL_MATRIX, field::WORLD_MATRIX] {
            let idx = read_i(world, loc, f);
            if idx >= 0 {
                let pool = if f == field::LOCAL_MATRIX { &mut self.local } else { &mut self.world_pool };
                pool.free(idx as usize);
                write(world, loc, f, f64::from(NONE));
            }
        }

        self.unlink_from_parent(world, entity.id, loc);

        let mut child = read_i(world, loc, field::FIRST_CHILD);
        while child != NONE {
            let Some(cloc) = location_of(world, child as u32) else {
                break;
            };
            let next = read_i(world, cloc, field::NEXT_SIBLING);
            write(world, cloc, field::PARENT, f64::from(NONE));
            write(world, cloc, field::NEXT_SIBLING, f64::from(NONE));
            write(world, cloc, field::DIRTY, 1.0);
            self.normal_cache.remove(&(child as u32));
            child = next;
        }

        self.normal_cache.remove(&entity.id);
    }
}

impl Default for TransformSystem {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Field access helpers
// ============================================================================

fn transform_location(world: &World, entity: Entity) -> Option<EntityLocation> {
    let loc = world.location(entity)?;
    world
        .archetypes()
        .get(loc.archetype)
        .has_component(TRANSFORM)
        .then_some(loc)
}

fn location_of(world: &World, id: u32) -> Option<EntityLocation> {
    let loc = world.location_of_id(id)?;
    world
        .archetypes()
        .get(loc.archetype)
        .has_component(TRANSFORM)
        .then_some(loc)
}

fn read(world: &World, loc: EntityLocation, f: usize) -> f64 {
    world
        .archetypes()
        .get(loc.archetype)
        .component(TRANSFORM)
        .and_then(|c| c.get(loc.index, f))
        .unwrap_or(0.0)
}

fn read_i(world: &World, loc: EntityLocation, f: usize) -> i32 {
    read(world, loc, f) as i32
}

fn read_vec3(world: &World, loc: EntityLocation, base: usize) -> Vec3 {
    Vec3::new(
        read(world, loc, base) as f32,
        read(world, loc, base + 1) as f32,
        read(world, loc, base + 2) as f32,
    )
}

fn write(world: &mut World, loc: EntityLocation, f: usize, v: f64) {
    if let Ok(columns) = world.archetypes_mut().get_mut(loc.archetype).component_mut(TRANSFORM) {
        if let Err(e) = columns.set(loc.index, f, v) {
            log::error!("transform field write failed: {e}");
        }
    }
}
