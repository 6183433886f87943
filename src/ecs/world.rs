//! The World
//!
//! Owner of the component registry, the entity allocator, the archetype
//! arena, and per-entity location metadata. Every public operation that
//! accepts an externally held [`Entity`] runs it through the generation
//! guard first and fails softly (warn + no-op) on a stale reference — user
//! code holding a dead id must never corrupt another entity's data.

use rustc_hash::FxHashMap;

use crate::ecs::archetype::{ArchetypeId, ArchetypeManager};
use crate::ecs::component::{ComponentData, ComponentDesc, ComponentRegistry};
use crate::ecs::entity::{Entity, EntityAllocator};
use crate::errors::Result;

/// Where an entity's component rows live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: ArchetypeId,
    pub index: usize,
}

/// The ECS world.
pub struct World {
    registry: ComponentRegistry,
    allocator: EntityAllocator,
    archetypes: ArchetypeManager,
    /// Slot id → location; `None` for despawned or component-less entities.
    locations: FxHashMap<u32, EntityLocation>,
    /// Bumped whenever the set of archetypes changes; queries watch this.
    archetype_version: u64,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: ComponentRegistry::new(),
            allocator: EntityAllocator::new(),
            archetypes: ArchetypeManager::new(),
            locations: FxHashMap::default(),
            archetype_version: 0,
        }
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Registers a component schema (write-once; replacement warns).
    pub fn register_component(&mut self, desc: ComponentDesc) {
        self.registry.register(desc);
    }

    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// Spawns an entity with the given component set.
    pub fn spawn(&mut self, components: &[ComponentData]) -> Result<Entity> {
        let entity = self.allocator.spawn();
        if components.is_empty() {
            return Ok(entity);
        }
        let types: Vec<&str> = components.iter().map(|c| c.name.as_str()).collect();
        let (archetype_id, created) = self.archetypes.get_or_create(&self.registry, &types)?;
        if created {
            self.archetype_version += 1;
        }
        let arch = self.archetypes.get_mut(archetype_id);
        let index = arch.add_entity(entity);
        for data in components {
            let columns = arch.component_mut(&data.name)?;
            for (field, value) in &data.values {
                columns.set_named(index, field, *value)?;
            }
        }
        self.locations.insert(entity.id, EntityLocation { archetype: archetype_id, index });
        Ok(entity)
    }

    /// Despawns an entity. Stale references warn and no-op.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.allocator.is_valid(entity) {
            log::warn!("despawn of stale entity {}@{}", entity.id, entity.generation);
            return false;
        }
        if let Some(location) = self.locations.remove(&entity.id) {
            self.remove_row(location);
        }
        self.allocator.despawn(entity)
    }

    /// The use-after-free guard.
    #[inline]
    #[must_use]
    pub fn is_valid(&self, entity: Entity) -> bool {
        self.allocator.is_valid(entity)
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.allocator.live_count()
    }

    /// Location metadata for a live entity with components.
    #[must_use]
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        if !self.allocator.is_valid(entity) {
            return None;
        }
        self.locations.get(&entity.id).copied()
    }

    /// Location lookup by raw slot id, used by hierarchy fields that store
    /// entity ids in i32 columns. Skips the generation check: the transform
    /// system repairs stale links itself.
    #[must_use]
    pub fn location_of_id(&self, id: u32) -> Option<EntityLocation> {
        self.locations.get(&id).copied()
    }

    // ========================================================================
    // Components
    // ========================================================================

    /// `true` when the entity currently carries `component`.
    #[must_use]
    pub fn has_component(&self, entity: Entity, component: &str) -> bool {
        self.location(entity)
            .is_some_and(|l| self.archetypes.get(l.archetype).has_component(component))
    }

    /// Adds a component, migrating the entity to the widened archetype.
    /// Stale references warn and no-op.
    pub fn add_component(&mut self, entity: Entity, data: ComponentData) -> Result<()> {
        if !self.allocator.is_valid(entity) {
            log::warn!("add_component on stale entity {}@{}", entity.id, entity.generation);
            return Ok(());
        }
        let mut types: Vec<String> = self
            .location(entity)
            .map(|l| {
                self.archetypes
                    .get(l.archetype)
                    .type_names()
                    .iter()
                    .map(|n| n.to_string())
                    .collect()
            })
            .unwrap_or_default();
        if types.iter().any(|t| t == &data.name) {
            // Already present: overwrite fields in place.
            let location = self.location(entity).expect("checked above");
            let arch = self.archetypes.get_mut(location.archetype);
            let columns = arch.component_mut(&data.name)?;
            for (field, value) in &data.values {
                columns.set_named(location.index, field, *value)?;
            }
            return Ok(());
        }
        types.push(data.name.clone());
        self.migrate(entity, &types, Some(&data))
    }

    /// Removes a component, migrating the entity to the narrowed archetype.
    /// Stale references warn and no-op; removing an absent component no-ops.
    pub fn remove_component(&mut self, entity: Entity, component: &str) -> Result<()> {
        if !self.allocator.is_valid(entity) {
            log::warn!(
                "remove_component on stale entity {}@{}",
                entity.id,
                entity.generation
            );
            return Ok(());
        }
        let Some(location) = self.location(entity) else {
            return Ok(());
        };
        let arch = self.archetypes.get(location.archetype);
        if !arch.has_component(component) {
            return Ok(());
        }
        let types: Vec<String> = arch
            .type_names()
            .iter()
            .filter(|n| n.as_ref() != component)
            .map(|n| n.to_string())
            .collect();
        if types.is_empty() {
            self.locations.remove(&entity.id);
            self.remove_row(location);
            return Ok(());
        }
        self.migrate(entity, &types, None)
    }

    /// Scalar field read. Fails on unknown component/field; stale entities
    /// yield `None` via `location`.
    pub fn get_field(&self, entity: Entity, component: &str, field: &str) -> Option<f64> {
        let location = self.location(entity)?;
        let arch = self.archetypes.get(location.archetype);
        let columns = arch.component(component).ok()?;
        columns.get_named(location.index, field).ok()
    }

    /// Scalar field write. Stale references warn and no-op.
    pub fn set_field(&mut self, entity: Entity, component: &str, field: &str, value: f64) -> Result<()> {
        let Some(location) = self.location(entity) else {
            log::warn!("set_field on stale entity {}@{}", entity.id, entity.generation);
            return Ok(());
        };
        let arch = self.archetypes.get_mut(location.archetype);
        let columns = arch.component_mut(component)?;
        columns.set_named(location.index, field, value)
    }

    // ========================================================================
    // Archetype access (systems fast path)
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn archetypes(&self) -> &ArchetypeManager {
        &self.archetypes
    }

    #[inline]
    pub fn archetypes_mut(&mut self) -> &mut ArchetypeManager {
        &mut self.archetypes
    }

    /// Version counter queries use to invalidate cached archetype lists.
    #[inline]
    #[must_use]
    pub fn archetype_version(&self) -> u64 {
        self.archetype_version
    }

    /// Descriptor lookup shortcut.
    #[must_use]
    pub fn component_desc(&self, name: &str) -> Option<std::sync::Arc<ComponentDesc>> {
        self.registry.get(name)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Removes a row and patches the location of the entity that the
    /// swap-and-pop moved into its place.
    fn remove_row(&mut self, location: EntityLocation) {
        let arch = self.archetypes.get_mut(location.archetype);
        match arch.swap_remove_entity(location.index) {
            Ok(Some(moved)) => {
                self.locations.insert(moved.id, location);
            }
            Ok(None) => {}
            Err(e) => log::error!("archetype row removal failed: {e}"),
        }
    }

    /// Moves `entity` into the archetype described by `types`, copying the
    /// values of every shared component and applying `incoming` overrides.
    fn migrate(&mut self, entity: Entity, types: &[String], incoming: Option<&ComponentData>) -> Result<()> {
        let type_refs: Vec<&str> = types.iter().map(String::as_str).collect();
        let (target_id, created) = self.archetypes.get_or_create(&self.registry, &type_refs)?;
        if created {
            self.archetype_version += 1;
        }

        let old_location = self.locations.get(&entity.id).copied();

        // Snapshot shared component rows before touching either table.
        let mut snapshot: Vec<(String, Vec<(std::sync::Arc<str>, f64)>)> = Vec::new();
        if let Some(old) = old_location {
            let old_arch = self.archetypes.get(old.archetype);
            for name in types {
                if old_arch.has_component(name) {
                    snapshot.push((name.clone(), old_arch.component_row(name, old.index)?));
                }
            }
        }

        // Insert into the target first, then drop the old row.
        let target = self.archetypes.get_mut(target_id);
        let new_index = target.add_entity(entity);
        for (name, row) in &snapshot {
            let columns = target.component_mut(name)?;
            for (field, value) in row {
                columns.set_named(new_index, field, *value)?;
            }
        }
        if let Some(data) = incoming {
            let columns = target.component_mut(&data.name)?;
            for (field, value) in &data.values {
                columns.set_named(new_index, field, *value)?;
            }
        }
        self.locations.insert(entity.id, EntityLocation { archetype: target_id, index: new_index });

        if let Some(old) = old_location {
            self.remove_row(old);
            // The swap in the old archetype may have moved this entity's own
            // row only if it lived there, which it no longer does.
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{ComponentDesc, ScalarType};

    fn world_with_basics() -> World {
        let mut world = World::new();
        world.register_component(
            ComponentDesc::builder("Pos")
                .field("x", ScalarType::F32, 0.0)
                .field("y", ScalarType::F32, 0.0)
                .build()
                .unwrap(),
        );
        world.register_component(
            ComponentDesc::builder("Vel")
                .field("vx", ScalarType::F32, 0.0)
                .build()
                .unwrap(),
        );
        world
    }

    #[test]
    fn metadata_tracks_swaps() {
        let mut world = world_with_basics();
        let a = world.spawn(&[ComponentData::new("Pos").with("x", 1.0)]).unwrap();
        let b = world.spawn(&[ComponentData::new("Pos").with("x", 2.0)]).unwrap();
        let c = world.spawn(&[ComponentData::new("Pos").with("x", 3.0)]).unwrap();

        world.despawn(a);
        // c was swapped into a's slot; its metadata must still resolve to x=3
        assert_eq!(world.get_field(c, "Pos", "x"), Some(3.0));
        assert_eq!(world.get_field(b, "Pos", "x"), Some(2.0));

        let loc = world.location(c).unwrap();
        let arch = world.archetypes().get(loc.archetype);
        assert_eq!(arch.entities()[loc.index], c);
    }

    #[test]
    fn stale_entity_fails_softly() {
        let mut world = world_with_basics();
        let a = world.spawn(&[ComponentData::new("Pos")]).unwrap();
        world.despawn(a);
        assert!(world.set_field(a, "Pos", "x", 5.0).is_ok());
        assert_eq!(world.get_field(a, "Pos", "x"), None);
        assert!(!world.despawn(a));
    }

    #[test]
    fn add_then_remove_component_migrates() {
        let mut world = world_with_basics();
        let e = world.spawn(&[ComponentData::new("Pos").with("x", 7.0)]).unwrap();

        world.add_component(e, ComponentData::new("Vel").with("vx", 1.5)).unwrap();
        assert!(world.has_component(e, "Vel"));
        assert_eq!(world.get_field(e, "Pos", "x"), Some(7.0), "Pos survives migration");

        world.remove_component(e, "Vel").unwrap();
        assert!(!world.has_component(e, "Vel"));
        assert_eq!(world.get_field(e, "Pos", "x"), Some(7.0));
    }
}
