//! ECS tests
//!
//! Tests for:
//! - SoA column coherence under adds and removes
//! - Entity metadata tracking across swap-and-pop
//! - Generation counters and use-after-free rejection
//! - Component add/remove migration between archetypes
//! - Query filtering and archetype-list caching
//! - Scheduler ordering and lifecycle

use std::cell::RefCell;
use std::rc::Rc;

use cathode::ecs::component::{ComponentData, ComponentDesc, ScalarType};
use cathode::ecs::query::{Query, QueryFilter};
use cathode::ecs::schedule::{priority, Scheduler, SystemDesc};
use cathode::ecs::world::World;

// ============================================================================
// Helpers
// ============================================================================

fn test_world() -> World {
    let mut world = World::new();
    world.register_component(
        ComponentDesc::builder("Position")
            .field("x", ScalarType::F32, 0.0)
            .field("y", ScalarType::F32, 0.0)
            .field("z", ScalarType::F32, 0.0)
            .build()
            .unwrap(),
    );
    world.register_component(
        ComponentDesc::builder("Velocity")
            .field("vx", ScalarType::F32, 0.0)
            .field("vy", ScalarType::F32, 0.0)
            .field("vz", ScalarType::F32, 0.0)
            .build()
            .unwrap(),
    );
    world.register_component(
        ComponentDesc::builder("Tag")
            .field("value", ScalarType::U32, 0.0)
            .build()
            .unwrap(),
    );
    world
}

fn position(x: f64) -> ComponentData {
    ComponentData::new("Position").with("x", x)
}

// ============================================================================
// Storage coherence
// ============================================================================

#[test]
fn columns_stay_coherent_under_churn() {
    let mut world = test_world();
    let mut entities = Vec::new();
    for i in 0..32 {
        entities.push(world.spawn(&[position(f64::from(i))]).unwrap());
    }
    // Remove every third entity
    for entity in entities.iter().step_by(3) {
        world.despawn(*entity);
    }
    for (_, arch) in world.archetypes().iter() {
        assert!(arch.is_coherent(), "column length == entity count");
    }
    // Survivors still read their own values
    for (i, entity) in entities.iter().enumerate() {
        if i % 3 == 0 {
            continue;
        }
        assert_eq!(world.get_field(*entity, "Position", "x"), Some(i as f64));
    }
}

#[test]
fn metadata_follows_swap_and_pop() {
    let mut world = test_world();
    let a = world.spawn(&[position(1.0)]).unwrap();
    let b = world.spawn(&[position(2.0)]).unwrap();
    let c = world.spawn(&[position(3.0)]).unwrap();

    world.despawn(a);

    // For every live entity: archetype.entities[location.index] == entity
    for entity in [b, c] {
        let location = world.location(entity).unwrap();
        let arch = world.archetypes().get(location.archetype);
        assert_eq!(arch.entities()[location.index], entity);
    }
}

// ============================================================================
// Generations
// ============================================================================

#[test]
fn stale_generation_is_rejected_everywhere() {
    let mut world = test_world();
    let a = world.spawn(&[position(5.0)]).unwrap();
    assert!(world.is_valid(a));

    world.despawn(a);
    assert!(!world.is_valid(a));

    // The recycled slot carries a new generation
    let b = world.spawn(&[position(7.0)]).unwrap();
    assert_eq!(b.id, a.id, "LIFO recycling reuses the slot");
    assert_ne!(b.generation, a.generation);

    // Operations through the stale reference never touch b's data
    world.set_field(a, "Position", "x", 999.0).unwrap();
    assert_eq!(world.get_field(b, "Position", "x"), Some(7.0));
    assert_eq!(world.get_field(a, "Position", "x"), None);
}

// ============================================================================
// Migration (archetype moves)
// ============================================================================

#[test]
fn removing_a_component_migrates_the_entity() {
    let mut world = test_world();

    // Two archetypes: {Position, Velocity} and {Position}
    let moving = world
        .spawn(&[position(1.0), ComponentData::new("Velocity").with("vx", 4.0)])
        .unwrap();
    let bystander = world
        .spawn(&[position(2.0), ComponentData::new("Velocity").with("vx", 8.0)])
        .unwrap();
    let plain = world.spawn(&[position(3.0)]).unwrap();

    let plain_arch = world.location(plain).unwrap().archetype;
    let prior_plain_count = world.archetypes().get(plain_arch).count();

    world.remove_component(moving, "Velocity").unwrap();

    // Migrated into the {Position} archetype at a fresh index
    let location = world.location(moving).unwrap();
    assert_eq!(location.archetype, plain_arch);
    assert_eq!(world.archetypes().get(plain_arch).count(), prior_plain_count + 1);
    assert!(!world.has_component(moving, "Velocity"));
    assert_eq!(world.get_field(moving, "Position", "x"), Some(1.0));

    // The bystander's Velocity column is unaffected
    assert_eq!(world.get_field(bystander, "Velocity", "vx"), Some(8.0));
}

#[test]
fn add_then_remove_restores_archetype_count() {
    let mut world = test_world();
    let entity = world.spawn(&[position(0.0)]).unwrap();
    let arch = world.location(entity).unwrap().archetype;
    let before = world.archetypes().get(arch).count();

    world.add_component(entity, ComponentData::new("Tag").with("value", 1.0)).unwrap();
    assert_ne!(world.location(entity).unwrap().archetype, arch);

    world.remove_component(entity, "Tag").unwrap();
    assert_eq!(world.location(entity).unwrap().archetype, arch);
    assert_eq!(world.archetypes().get(arch).count(), before);
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn query_with_without_optional() {
    let mut world = test_world();
    let moving = world
        .spawn(&[position(1.0), ComponentData::new("Velocity").with("vx", 2.0)])
        .unwrap();
    let tagged = world
        .spawn(&[position(2.0), ComponentData::new("Tag").with("value", 9.0)])
        .unwrap();
    let _still = world.spawn(&[position(3.0)]).unwrap();

    let mut query = Query::new(QueryFilter::new().with("Position").without("Velocity").optional("Tag"));

    let mut rows = Vec::new();
    query.for_each(&world, |row| {
        rows.push((row.entity, row.get("Tag", "value")));
    });
    assert_eq!(rows.len(), 2, "moving entity filtered out");
    assert!(rows.iter().any(|(e, tag)| *e == tagged && *tag == Some(9.0)));
    assert!(!rows.iter().any(|(e, _)| *e == moving));

    assert_eq!(query.count(&world), 2);
    assert!(!query.is_empty(&world));
}

#[test]
fn query_cache_refreshes_on_new_archetypes() {
    let mut world = test_world();
    let mut query = Query::new(QueryFilter::new().with("Velocity"));
    assert!(query.is_empty(&world));

    world
        .spawn(&[ComponentData::new("Velocity").with("vy", 1.0)])
        .unwrap();
    assert_eq!(query.count(&world), 1, "new archetype invalidates the cache");
}

// ============================================================================
// Scheduler
// ============================================================================

#[test]
fn systems_run_in_band_then_insertion_order() {
    let trace: Rc<RefCell<Vec<String>>> = Rc::default();
    let mut scheduler = Scheduler::new();
    let mut world = test_world();

    for (name, band) in [
        ("render", priority::RENDER),
        ("late_update", priority::UPDATE),
        ("physics", priority::PRE_UPDATE),
        ("early_update", priority::UPDATE),
    ] {
        let t = Rc::clone(&trace);
        scheduler
            .register(SystemDesc::new(name, band).on_update(move |_, _| {
                t.borrow_mut().push(name.to_string());
            }))
            .unwrap();
    }

    scheduler.update(&mut world, 1.0 / 60.0);
    assert_eq!(
        *trace.borrow(),
        vec!["physics", "late_update", "early_update", "render"],
        "ascending priority, insertion order inside a band"
    );
}

#[test]
fn scheduler_lifecycle_counts() {
    let inits: Rc<RefCell<u32>> = Rc::default();
    let cleanups: Rc<RefCell<u32>> = Rc::default();
    let mut scheduler = Scheduler::new();
    let mut world = test_world();

    let (i, c) = (Rc::clone(&inits), Rc::clone(&cleanups));
    scheduler
        .register(
            SystemDesc::new("sim", priority::UPDATE)
                .on_init(move |_| *i.borrow_mut() += 1)
                .on_cleanup(move |_| *c.borrow_mut() += 1),
        )
        .unwrap();

    for _ in 0..3 {
        scheduler.update(&mut world, 0.016);
    }
    scheduler.shutdown(&mut world);
    scheduler.shutdown(&mut world);

    assert_eq!(*inits.borrow(), 1, "init fires at most once");
    assert_eq!(*cleanups.borrow(), 1, "cleanup fires exactly once");
}

#[test]
fn duplicate_system_names_rejected() {
    let mut scheduler = Scheduler::new();
    scheduler.register(SystemDesc::new("sim", priority::UPDATE)).unwrap();
    assert!(scheduler.register(SystemDesc::new("sim", priority::LAST)).is_err());
    assert_eq!(scheduler.len(), 1);
}
