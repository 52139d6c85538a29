use archetype_query::prelude::*;
use archetype_query::ExecutionStrategy;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pos {
    x: f32,
    y: f32,
    z: f32,
}

impl SpatialComponent for Pos {
    fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Vel {
    x: f32,
    y: f32,
    z: f32,
}

impl Vel {
    fn speed(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

fn pos(x: f32, y: f32, z: f32) -> Pos {
    Pos { x, y, z }
}

fn vel(x: f32, y: f32, z: f32) -> Vel {
    Vel { x, y, z }
}

#[test]
fn test_simple_multi_component_query() {
    let mut world = World::new();
    let e1 = world.spawn((pos(0.0, 0.0, 0.0), vel(1.0, 0.0, 0.0))).unwrap();
    let _e2 = world.spawn((pos(1.0, 0.0, 0.0),)).unwrap();
    let e3 = world.spawn((pos(2.0, 0.0, 0.0), vel(0.0, 1.0, 0.0))).unwrap();

    let engine = QueryEngine::default();
    let rows = engine.query::<(&Pos, &Vel)>().execute(&world).unwrap();

    assert_eq!(rows.len(), 2);
    let (entity, (p, v)) = rows.get(0).unwrap();
    assert_eq!(*entity, e1);
    assert_eq!(**p, pos(0.0, 0.0, 0.0));
    assert_eq!(**v, vel(1.0, 0.0, 0.0));

    let (entity, (p, v)) = rows.get(1).unwrap();
    assert_eq!(*entity, e3);
    assert_eq!(**p, pos(2.0, 0.0, 0.0));
    assert_eq!(**v, vel(0.0, 1.0, 0.0));
}

#[test]
fn test_predicate_sort_limit() {
    let mut world = World::new();
    world.spawn((pos(0.0, 0.0, 0.0), vel(1.0, 0.0, 0.0))).unwrap();
    world.spawn((pos(1.0, 0.0, 0.0),)).unwrap();
    world.spawn((pos(2.0, 0.0, 0.0), vel(0.0, 1.0, 0.0))).unwrap();
    let e4 = world.spawn((pos(3.0, 0.0, 0.0), vel(5.0, 0.0, 0.0))).unwrap();

    let engine = QueryEngine::default();
    let rows = engine
        .query::<(&Vel,)>()
        .filter_component::<Vel>("speed > 2", |v| v.speed() > 2.0)
        .sort_by::<Vel>("speed desc", |v| v.speed() as f64, true)
        .limit(1)
        .execute(&world)
        .unwrap();

    assert_eq!(rows.len(), 1);
    let (entity, (v,)) = rows.get(0).unwrap();
    assert_eq!(*entity, e4);
    assert_eq!(**v, vel(5.0, 0.0, 0.0));
}

#[test]
fn test_offset_composes_with_sort() {
    let mut world = World::new();
    for i in 0..10 {
        world.spawn((vel(i as f32, 0.0, 0.0),)).unwrap();
    }

    let engine = QueryEngine::default();
    let rows = engine
        .query::<(&Vel,)>()
        .sort_by::<Vel>("speed asc", |v| v.speed() as f64, false)
        .offset(7)
        .execute(&world)
        .unwrap();

    let speeds: Vec<f32> = rows.iter().map(|(_, (v,))| v.x).collect();
    assert_eq!(speeds, vec![7.0, 8.0, 9.0]);
}

#[test]
fn test_result_metadata() {
    let mut world = World::new();
    world.spawn((pos(0.0, 0.0, 0.0), vel(1.0, 0.0, 0.0))).unwrap();

    let engine = QueryEngine::default();
    let query = engine.query::<(&Pos, &Vel)>().build();
    let rows = engine.execute(&world, &query).unwrap();

    assert_eq!(rows.version(), world.version());
    assert_eq!(rows.fingerprint(), query.fingerprint());
    assert_eq!(rows.stats().entities_matched, 1);
    assert!(!rows.is_cached());
}

#[test]
fn test_streaming_matches_materialized() {
    let mut world = World::new();
    for i in 0..500 {
        if i % 3 == 0 {
            world.spawn((pos(i as f32, 0.0, 0.0), vel(1.0, 0.0, 0.0))).unwrap();
        } else {
            world.spawn((pos(i as f32, 0.0, 0.0),)).unwrap();
        }
    }

    let engine = QueryEngine::default();

    let materialized = engine
        .query::<(&Pos, &Vel)>()
        .cached(false)
        .execute(&world)
        .unwrap();
    let expected: Vec<EntityId> = materialized.entities().collect();

    let mut streamed = Vec::new();
    let emitted = engine
        .query::<(&Pos, &Vel)>()
        .stream(&world, |entity, _| streamed.push(entity))
        .unwrap();

    assert_eq!(emitted, expected.len());
    assert_eq!(streamed, expected);
}

#[test]
fn test_chunked_streaming_sees_everything() {
    let mut world = World::new();
    world
        .spawn_batch((0..12_345).map(|i| (vel(i as f32, 0.0, 0.0),)))
        .unwrap();

    let engine = QueryEngine::default();
    let query = engine.query::<(&Vel,)>().build();

    let mut chunks = Vec::new();
    let mut total = 0usize;
    engine
        .for_each_chunk(&world, &query, |chunk| {
            chunks.push(chunk.len());
            total += chunk.len();
        })
        .unwrap();

    assert_eq!(total, 12_345);
    // Default chunking: full chunks of 5000 then the remainder
    assert_eq!(chunks, vec![5000, 5000, 2345]);
}

#[test]
fn test_predicate_panic_surfaces_as_error() {
    let mut world = World::new();
    for i in 0..10 {
        world.spawn((vel(i as f32, 0.0, 0.0),)).unwrap();
    }

    let engine = QueryEngine::default();
    let result = engine
        .query::<(&Vel,)>()
        .filter_component::<Vel>("explodes", |v| {
            if v.x > 5.0 {
                panic!("predicate blew up");
            }
            true
        })
        .execute(&world);

    match result {
        Err(QueryError::PredicatePanic(message)) => {
            assert!(message.contains("predicate blew up"));
        }
        other => panic!("expected PredicatePanic, got {other:?}"),
    }
}

#[test]
fn test_empty_component_set_against_world() {
    let world = World::new();
    let engine = QueryEngine::default();
    let rows = engine.query::<(&Vel,)>().execute(&world).unwrap();
    assert!(rows.is_empty());
}

#[test]
fn test_query_entities_subset() {
    let mut world = World::new();
    let mut spawned = Vec::new();
    for i in 0..10 {
        spawned.push(
            world
                .spawn((pos(i as f32, 0.0, 0.0), vel(i as f32, 0.0, 0.0)))
                .unwrap(),
        );
    }
    let bare = world.spawn((pos(99.0, 0.0, 0.0),)).unwrap();
    let dead = world.spawn((pos(0.0, 0.0, 0.0), vel(0.0, 0.0, 0.0))).unwrap();
    world.despawn(dead);

    let engine = QueryEngine::default();
    let query = engine
        .query::<(&Pos, &Vel)>()
        .filter_component::<Vel>("vx >= 5", |v| v.x >= 5.0)
        .build();

    // Input order is preserved; dead handles and entities without the
    // required set are skipped
    let picked = vec![spawned[7], dead, bare, spawned[5], spawned[2]];
    let rows = engine.query_entities(&world, &picked, &query).unwrap();

    let got: Vec<EntityId> = rows.entities().collect();
    assert_eq!(got, vec![spawned[7], spawned[5]]);
}

#[test]
fn test_explain_reports_strategy() {
    let mut world = World::new();
    world
        .spawn_batch((0..5000).map(|i| (vel(i as f32, 0.0, 0.0),)))
        .unwrap();

    let engine = QueryEngine::default();
    let query = engine.query::<(&Vel,)>().build();
    let plan = engine.explain(&world, &query);

    assert_eq!(plan.estimated_count, 5000);
    assert_eq!(plan.strategy, ExecutionStrategy::Parallel);
    assert!(plan.describe().contains("Parallel"));
}

#[test]
fn test_execute_async_round_trip() {
    use std::sync::Arc;

    let mut world = World::new();
    for i in 0..100 {
        world.spawn((vel(i as f32, 0.0, 0.0),)).unwrap();
    }
    let shared: SharedWorld = Arc::new(parking_lot::RwLock::new(world));

    let engine = Arc::new(QueryEngine::default());
    let query = engine.query::<(&'static Vel,)>().build();
    let pending = engine.execute_async(Arc::clone(&shared), query);
    let owned = pending.wait().unwrap();

    assert_eq!(owned.entities.len(), 100);
    // Refetch against the live world: every id still resolves
    let guard = shared.read();
    for entity in &owned.entities {
        assert!(guard.get_component::<Vel>(*entity).is_some());
    }
}
