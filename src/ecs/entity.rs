//! Entity Ids
//!
//! An [`Entity`] is a non-zero slot id plus a generation counter. Despawned
//! slots are recycled LIFO; each reuse bumps the generation so a stale
//! `Entity` held by user code can be rejected instead of silently aliasing
//! the new occupant.

/// A generational entity reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entity {
    /// Non-zero slot id. Fits in an `i32` so hierarchy fields can store it
    /// with a −1 "none" sentinel.
    pub id: u32,
    /// Generation the slot had when this reference was issued.
    pub generation: u32,
}

impl Entity {
    /// Sentinel stored in i32 component fields for "no entity".
    pub const NONE_ID: i32 = -1;
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    alive: bool,
}

/// Allocates and validates entity ids.
#[derive(Default)]
pub struct EntityAllocator {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl EntityAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh entity, reusing the most recently despawned slot.
    pub fn spawn(&mut self) -> Entity {
        if let Some(id) = self.free.pop() {
            let slot = &mut self.slots[(id - 1) as usize];
            slot.alive = true;
            Entity {
                id,
                generation: slot.generation,
            }
        } else {
            self.slots.push(Slot {
                generation: 0,
                alive: true,
            });
            Entity {
                id: self.slots.len() as u32,
                generation: 0,
            }
        }
    }

    /// Retires an entity. Returns `false` for stale or unknown references.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.is_valid(entity) {
            return false;
        }
        let slot = &mut self.slots[(entity.id - 1) as usize];
        slot.alive = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(entity.id);
        true
    }

    /// The use-after-free guard: live slot and matching generation.
    #[must_use]
    pub fn is_valid(&self, entity: Entity) -> bool {
        if entity.id == 0 {
            return false;
        }
        self.slots
            .get((entity.id - 1) as usize)
            .is_some_and(|s| s.alive && s.generation == entity.generation)
    }

    /// Number of live entities.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuse_is_lifo_with_new_generation() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.spawn();
        let b = alloc.spawn();
        assert!(alloc.despawn(b));
        assert!(alloc.despawn(a));
        // LIFO: a's slot comes back first
        let c = alloc.spawn();
        assert_eq!(c.id, a.id);
        assert_ne!(c.generation, a.generation);
        assert!(!alloc.is_valid(a), "stale reference must be rejected");
        assert!(alloc.is_valid(c));
    }

    #[test]
    fn despawn_stale_is_noop() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.spawn();
        assert!(alloc.despawn(a));
        assert!(!alloc.despawn(a));
        assert_eq!(alloc.live_count(), 0);
    }
}
