use archetype_query::component::component_id;
use archetype_query::prelude::*;
use archetype_query::Signature;

#[derive(Debug, Clone, Copy, PartialEq)]
struct A {
    value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct B {
    value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct C {
    value: u32,
}

#[test]
fn test_component_addition_migrates() {
    let mut world = World::new();
    let e1 = world.spawn((A { value: 1 },)).unwrap();
    let version_before = world.version();

    world.add_component(e1, B { value: 7 }).unwrap();

    // archetype({A}) is empty, archetype({A, B}) holds e1 at row 0
    let a_only = Signature::from_ids(&[component_id::<A>()]);
    let a_and_b = Signature::from_ids(&[component_id::<A>(), component_id::<B>()]);

    let mut source_len = None;
    let mut target = None;
    for (_, archetype) in world.archetypes_matching(&a_only) {
        if *archetype.signature() == a_only {
            source_len = Some(archetype.len());
        }
        if *archetype.signature() == a_and_b {
            target = Some((archetype.len(), archetype.entities().to_vec()));
        }
    }
    assert_eq!(source_len, Some(0));
    let (target_len, target_entities) = target.expect("target archetype exists");
    assert_eq!(target_len, 1);
    assert_eq!(target_entities, vec![e1]);
    assert_eq!(world.location(e1).unwrap().row, 0);

    assert_eq!(world.get_component::<B>(e1), Some(&B { value: 7 }));
    assert_eq!(world.get_component::<A>(e1), Some(&A { value: 1 }));
    assert_eq!(world.version(), version_before + 1);
}

#[test]
fn test_duplicate_add_is_update_without_version_bump() {
    let mut world = World::new();
    let e = world.spawn((A { value: 1 },)).unwrap();
    let version = world.version();

    world.add_component(e, A { value: 99 }).unwrap();
    assert_eq!(world.get_component::<A>(e), Some(&A { value: 99 }));
    assert_eq!(world.version(), version);
}

#[test]
fn test_remove_missing_component_is_an_error() {
    let mut world = World::new();
    let e = world.spawn((A { value: 1 },)).unwrap();

    assert_eq!(
        world.remove_component::<B>(e),
        Err(QueryError::ComponentNotFound)
    );
    // Error left the entity untouched
    assert_eq!(world.get_component::<A>(e), Some(&A { value: 1 }));
}

#[test]
fn test_operations_on_dead_entity() {
    let mut world = World::new();
    let e = world.spawn((A { value: 1 },)).unwrap();
    world.despawn(e);

    assert_eq!(
        world.add_component(e, B { value: 2 }),
        Err(QueryError::EntityNotFound)
    );
    assert_eq!(
        world.remove_component::<A>(e),
        Err(QueryError::EntityNotFound)
    );
    assert!(world.get_component::<A>(e).is_none());
}

#[test]
fn test_chain_of_migrations_preserves_values() {
    let mut world = World::new();
    let e = world.spawn((A { value: 10 },)).unwrap();

    world.add_component(e, B { value: 20 }).unwrap();
    world.add_component(e, C { value: 30 }).unwrap();
    world.remove_component::<B>(e).unwrap();
    world.add_component(e, B { value: 21 }).unwrap();

    assert_eq!(world.get_component::<A>(e), Some(&A { value: 10 }));
    assert_eq!(world.get_component::<B>(e), Some(&B { value: 21 }));
    assert_eq!(world.get_component::<C>(e), Some(&C { value: 30 }));
}

#[test]
fn test_queries_follow_migrations() {
    let mut world = World::new();
    let engine = QueryEngine::default();

    let mut entities = Vec::new();
    for i in 0..20 {
        entities.push(world.spawn((A { value: i },)).unwrap());
    }

    // Move half of them to {A, B}
    for entity in entities.iter().step_by(2) {
        world.add_component(*entity, B { value: 0 }).unwrap();
    }

    let with_b = engine.query::<(&A, &B)>().execute(&world).unwrap();
    assert_eq!(with_b.len(), 10);

    let all_a = engine.query::<(&A,)>().execute(&world).unwrap();
    assert_eq!(all_a.len(), 20);
}

#[test]
fn test_emptied_archetype_is_reused() {
    let mut world = World::new();
    let e = world.spawn((A { value: 1 },)).unwrap();
    let count_after_spawn = world.archetype_count();

    // Empty the {A} archetype, then repopulate it
    world.add_component(e, B { value: 2 }).unwrap();
    let f = world.spawn((A { value: 3 },)).unwrap();

    // No new archetype was created for the second {A} entity
    assert_eq!(world.archetype_count(), count_after_spawn + 1);
    assert_eq!(world.get_component::<A>(f), Some(&A { value: 3 }));
}
