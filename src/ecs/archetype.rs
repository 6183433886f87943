//! Archetype Tables
//!
//! An archetype is the canonical set of component types an entity carries,
//! identified by the deterministic signature formed from its sorted type
//! names. Each archetype keeps a parallel `entities` list and one SoA
//! column block per component; removal is swap-and-pop, with the moved
//! entity reported back so the caller can patch its location metadata.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::ecs::component::ComponentRegistry;
use crate::ecs::entity::Entity;
use crate::ecs::storage::ComponentColumns;
use crate::errors::{CathodeError, Result};

/// Index of an archetype in the manager's arena.
pub type ArchetypeId = usize;

/// Builds the canonical signature for a set of component type names.
#[must_use]
pub fn signature_of(types: &[&str]) -> String {
    let mut names: Vec<&str> = types.to_vec();
    names.sort_unstable();
    names.join("|")
}

/// One storage bucket: entities sharing an exact component-type set.
pub struct Archetype {
    signature: String,
    /// Sorted component type names.
    type_names: Vec<Arc<str>>,
    entities: Vec<Entity>,
    columns: FxHashMap<Arc<str>, ComponentColumns>,
}

impl Archetype {
    fn new(registry: &ComponentRegistry, types: &[&str]) -> Result<Self> {
        let mut type_names: Vec<Arc<str>> = Vec::with_capacity(types.len());
        let mut columns = FxHashMap::default();
        for name in types {
            let desc = registry.require(name)?;
            type_names.push(Arc::clone(&desc.name));
            columns.insert(Arc::clone(&desc.name), ComponentColumns::new(desc));
        }
        type_names.sort_unstable();
        Ok(Self {
            signature: signature_of(types),
            type_names,
            entities: Vec::new(),
            columns,
        })
    }

    #[inline]
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Sorted component type names of this archetype.
    #[inline]
    #[must_use]
    pub fn type_names(&self) -> &[Arc<str>] {
        &self.type_names
    }

    #[inline]
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    #[must_use]
    pub fn has_component(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// `true` when every name in `types` is present.
    #[must_use]
    pub fn has_all(&self, types: &[&str]) -> bool {
        types.iter().all(|t| self.has_component(t))
    }

    /// `true` when at least one name in `types` is present.
    #[must_use]
    pub fn has_any(&self, types: &[&str]) -> bool {
        types.iter().any(|t| self.has_component(t))
    }

    /// `true` when no name in `types` is present.
    #[must_use]
    pub fn has_none(&self, types: &[&str]) -> bool {
        !self.has_any(types)
    }

    /// Column block of one component type.
    pub fn component(&self, name: &str) -> Result<&ComponentColumns> {
        self.columns.get(name).ok_or_else(|| CathodeError::UnknownField {
            component: name.to_string(),
            field: "<component not in archetype>".into(),
        })
    }

    /// Mutable column block of one component type.
    pub fn component_mut(&mut self, name: &str) -> Result<&mut ComponentColumns> {
        self.columns.get_mut(name).ok_or_else(|| CathodeError::UnknownField {
            component: name.to_string(),
            field: "<component not in archetype>".into(),
        })
    }

    /// Disjoint mutable access to two different component blocks, for
    /// systems that stream one component into another.
    pub fn component_pair_mut(
        &mut self,
        a: &str,
        b: &str,
    ) -> Result<(&mut ComponentColumns, &mut ComponentColumns)> {
        let err = |name: &str| CathodeError::UnknownField {
            component: name.to_string(),
            field: "<component not in archetype>".into(),
        };
        assert_ne!(a, b, "component_pair_mut requires distinct components");
        match self.columns.get_disjoint_mut([a, b]) {
            [Some(ca), Some(cb)] => Ok((ca, cb)),
            [None, _] => Err(err(a)),
            [_, None] => Err(err(b)),
        }
    }

    /// Pushes `entity` with default rows in every column; returns its index.
    pub fn add_entity(&mut self, entity: Entity) -> usize {
        let index = self.entities.len();
        self.entities.push(entity);
        for columns in self.columns.values_mut() {
            let row = columns.push_default();
            debug_assert_eq!(row, index);
        }
        index
    }

    /// Swap-and-pop removal.
    ///
    /// Returns the entity that was moved into `index`, or `None` when the
    /// removed row was already last.
    pub fn swap_remove_entity(&mut self, index: usize) -> Result<Option<Entity>> {
        if index >= self.entities.len() {
            return Err(CathodeError::OutOfRange {
                context: "archetype entity",
                index,
                len: self.entities.len(),
            });
        }
        let last = self.entities.len() - 1;
        self.entities.swap_remove(index);
        for columns in self.columns.values_mut() {
            columns.swap_remove(index)?;
        }
        Ok(if index < last {
            Some(self.entities[index])
        } else {
            None
        })
    }

    /// One component row as `(field, value)` pairs.
    pub fn component_row(&self, name: &str, index: usize) -> Result<Vec<(Arc<str>, f64)>> {
        self.component(name)?.row(index)
    }

    /// Debug invariant: every column length matches the entity count.
    #[must_use]
    pub fn is_coherent(&self) -> bool {
        self.columns.values().all(|c| c.len() == self.entities.len())
    }
}

/// Arena of archetypes keyed by signature.
#[derive(Default)]
pub struct ArchetypeManager {
    archetypes: Vec<Archetype>,
    by_signature: FxHashMap<String, ArchetypeId>,
}

impl ArchetypeManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds the archetype whose type set equals `types` (order-insensitive)
    /// or creates it. Returns `(id, created)`.
    pub fn get_or_create(
        &mut self,
        registry: &ComponentRegistry,
        types: &[&str],
    ) -> Result<(ArchetypeId, bool)> {
        let signature = signature_of(types);
        if let Some(&id) = self.by_signature.get(&signature) {
            return Ok((id, false));
        }
        let archetype = Archetype::new(registry, types)?;
        let id = self.archetypes.len();
        self.by_signature.insert(signature, id);
        self.archetypes.push(archetype);
        Ok((id, true))
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id]
    }

    #[inline]
    pub fn get_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id]
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArchetypeId, &Archetype)> {
        self.archetypes.iter().enumerate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{ComponentDesc, ScalarType};

    fn registry() -> ComponentRegistry {
        let mut reg = ComponentRegistry::new();
        reg.register(
            ComponentDesc::builder("A")
                .field("x", ScalarType::F32, 0.0)
                .build()
                .unwrap(),
        );
        reg.register(
            ComponentDesc::builder("B")
                .field("y", ScalarType::I32, -1.0)
                .build()
                .unwrap(),
        );
        reg
    }

    #[test]
    fn signature_is_order_insensitive() {
        let reg = registry();
        let mut mgr = ArchetypeManager::new();
        let (ab, created_ab) = mgr.get_or_create(&reg, &["A", "B"]).unwrap();
        let (ba, created_ba) = mgr.get_or_create(&reg, &["B", "A"]).unwrap();
        assert!(created_ab);
        assert!(!created_ba);
        assert_eq!(ab, ba);
    }

    #[test]
    fn swap_remove_reports_moved_entity() {
        let reg = registry();
        let mut mgr = ArchetypeManager::new();
        let (id, _) = mgr.get_or_create(&reg, &["A"]).unwrap();
        let arch = mgr.get_mut(id);
        let e1 = Entity { id: 1, generation: 0 };
        let e2 = Entity { id: 2, generation: 0 };
        let e3 = Entity { id: 3, generation: 0 };
        arch.add_entity(e1);
        arch.add_entity(e2);
        arch.add_entity(e3);

        // Removing the middle row moves the last entity into it
        assert_eq!(arch.swap_remove_entity(1).unwrap(), Some(e3));
        // Removing the (new) last row moves nothing
        assert_eq!(arch.swap_remove_entity(1).unwrap(), None);
        assert!(arch.is_coherent());
    }
}
