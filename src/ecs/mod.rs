//! Archetype Entity–Component System
//!
//! Entities are generational ids; components are runtime-described numeric
//! schemas stored as one typed array per field (structure of arrays); the
//! unique combination of component types an entity carries determines its
//! archetype, and moving a component on or off an entity migrates it between
//! archetype tables.
//!
//! # Module Map
//!
//! - [`component`] — field/scalar descriptors and the world-owned registry
//! - [`storage`] — per-field typed columns with swap-and-pop removal
//! - [`archetype`] — archetype tables and the signature-keyed manager
//! - [`entity`] — id allocation, generations, use-after-free guard
//! - [`query`] — with/without/optional filters over cached archetype lists
//! - [`schedule`] — priority-banded system scheduler
//! - [`world`] — the owner that ties the above together

pub mod archetype;
pub mod component;
pub mod entity;
pub mod query;
pub mod schedule;
pub mod storage;
pub mod world;

pub use archetype::{Archetype, ArchetypeId, ArchetypeManager};
pub use component::{ComponentData, ComponentDesc, ComponentRegistry, FieldDesc, ScalarType};
pub use entity::{Entity, EntityAllocator};
pub use query::{Query, QueryFilter};
pub use schedule::{priority, Scheduler, SystemDesc};
pub use world::{EntityLocation, World};
