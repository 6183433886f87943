//! Query Engine
//!
//! A query filters archetypes by three disjoint component sets — `with`
//! (must have), `without` (must not have), `optional` (include if present) —
//! and caches the matching archetype list. The cache is recomputed lazily
//! whenever the world's archetype version moves, so creating a new archetype
//! invalidates every query at zero cost until the query next runs.

use std::sync::Arc;

use crate::ecs::archetype::ArchetypeId;
use crate::ecs::entity::Entity;
use crate::ecs::world::World;

/// Component-set filter for a [`Query`].
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub with: Vec<String>,
    pub without: Vec<String>,
    pub optional: Vec<String>,
}

impl QueryFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, component: &str) -> Self {
        self.with.push(component.to_string());
        self
    }

    #[must_use]
    pub fn without(mut self, component: &str) -> Self {
        self.without.push(component.to_string());
        self
    }

    #[must_use]
    pub fn optional(mut self, component: &str) -> Self {
        self.optional.push(component.to_string());
        self
    }
}

/// One matched row: the entity plus the component values the filter named.
///
/// Only components actually present on the row are included (`optional`
/// components may be absent).
#[derive(Debug)]
pub struct QueryRow {
    pub entity: Entity,
    pub components: Vec<(Arc<str>, Vec<(Arc<str>, f64)>)>,
}

impl QueryRow {
    /// Field lookup across the included components.
    #[must_use]
    pub fn get(&self, component: &str, field: &str) -> Option<f64> {
        self.components
            .iter()
            .find(|(name, _)| name.as_ref() == component)
            .and_then(|(_, fields)| {
                fields
                    .iter()
                    .find(|(f, _)| f.as_ref() == field)
                    .map(|(_, v)| *v)
            })
    }

    #[must_use]
    pub fn has(&self, component: &str) -> bool {
        self.components.iter().any(|(name, _)| name.as_ref() == component)
    }
}

/// A cached archetype query.
pub struct Query {
    filter: QueryFilter,
    cached: Vec<ArchetypeId>,
    seen_version: Option<u64>,
}

impl Query {
    #[must_use]
    pub fn new(filter: QueryFilter) -> Self {
        Self {
            filter,
            cached: Vec::new(),
            seen_version: None,
        }
    }

    #[must_use]
    pub fn filter(&self) -> &QueryFilter {
        &self.filter
    }

    /// Recomputes the archetype list if the world changed shape.
    fn refresh(&mut self, world: &World) {
        let version = world.archetype_version();
        if self.seen_version == Some(version) {
            return;
        }
        let with: Vec<&str> = self.filter.with.iter().map(String::as_str).collect();
        let without: Vec<&str> = self.filter.without.iter().map(String::as_str).collect();
        self.cached.clear();
        for (id, arch) in world.archetypes().iter() {
            if arch.has_all(&with) && arch.has_none(&without) {
                self.cached.push(id);
            }
        }
        self.seen_version = Some(version);
    }

    /// Entity count across matching archetypes, without building rows.
    pub fn count(&mut self, world: &World) -> usize {
        self.refresh(world);
        self.cached
            .iter()
            .map(|&id| world.archetypes().get(id).count())
            .sum()
    }

    /// Short-circuiting emptiness check.
    pub fn is_empty(&mut self, world: &World) -> bool {
        self.refresh(world);
        self.cached
            .iter()
            .all(|&id| world.archetypes().get(id).count() == 0)
    }

    /// Runs `f` for every matching row.
    ///
    /// The row map is keyed by `with ∪ optional` and only includes
    /// components present on the row's archetype.
    pub fn for_each(&mut self, world: &World, mut f: impl FnMut(&QueryRow)) {
        self.refresh(world);
        let wanted: Vec<&str> = self
            .filter
            .with
            .iter()
            .chain(self.filter.optional.iter())
            .map(String::as_str)
            .collect();
        for &id in &self.cached {
            let arch = world.archetypes().get(id);
            let present: Vec<&str> = wanted
                .iter()
                .copied()
                .filter(|c| arch.has_component(c))
                .collect();
            for (index, &entity) in arch.entities().iter().enumerate() {
                let mut components = Vec::with_capacity(present.len());
                for comp in &present {
                    if let Ok(row) = arch.component_row(comp, index) {
                        let desc_name = arch
                            .type_names()
                            .iter()
                            .find(|n| n.as_ref() == *comp)
                            .expect("present component has a name");
                        components.push((Arc::clone(desc_name), row));
                    }
                }
                f(&QueryRow { entity, components });
            }
        }
    }

    /// Matching archetype ids (refreshed), for systems that want the typed
    /// span fast path instead of row maps.
    pub fn archetype_ids(&mut self, world: &World) -> &[ArchetypeId] {
        self.refresh(world);
        &self.cached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{ComponentData, ComponentDesc, ScalarType};

    fn world() -> World {
        let mut w = World::new();
        for (name, field) in [("A", "a"), ("B", "b"), ("C", "c")] {
            w.register_component(
                ComponentDesc::builder(name)
                    .field(field, ScalarType::F32, 0.0)
                    .build()
                    .unwrap(),
            );
        }
        w
    }

    #[test]
    fn filter_with_without_optional() {
        let mut w = world();
        let ab = w
            .spawn(&[ComponentData::new("A").with("a", 1.0), ComponentData::new("B")])
            .unwrap();
        let ac = w
            .spawn(&[ComponentData::new("A").with("a", 2.0), ComponentData::new("C")])
            .unwrap();
        let _b = w.spawn(&[ComponentData::new("B")]).unwrap();

        let mut q = Query::new(QueryFilter::new().with("A").without("B").optional("C"));
        let mut seen = Vec::new();
        q.for_each(&w, |row| seen.push((row.entity, row.has("C"))));
        assert_eq!(seen, vec![(ac, true)]);
        assert_eq!(q.count(&w), 1);

        let mut q_all_a = Query::new(QueryFilter::new().with("A"));
        assert_eq!(q_all_a.count(&w), 2);
        let _ = ab;
    }

    #[test]
    fn cache_invalidates_on_new_archetype() {
        let mut w = world();
        let mut q = Query::new(QueryFilter::new().with("A"));
        assert_eq!(q.count(&w), 0);

        w.spawn(&[ComponentData::new("A")]).unwrap();
        // New archetype bumped the version; cache must refresh
        assert_eq!(q.count(&w), 1);
    }
}
