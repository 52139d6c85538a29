use archetype_query::prelude::*;

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
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Marker(u8);

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn coord(&mut self) -> f32 {
        (self.next() % 1_000_000) as f32 / 1000.0
    }
}

/// 10k entities spread over several archetype shapes.
fn populated_world() -> World {
    let mut rng = XorShift(0x0dd_ba11);
    let mut world = World::new();
    for i in 0..10_000u32 {
        let pos = Pos {
            x: rng.coord(),
            y: rng.coord(),
            z: rng.coord(),
        };
        let vel = Vel {
            x: rng.coord(),
            y: rng.coord(),
        };
        match i % 4 {
            0 => world.spawn((pos, vel)).unwrap(),
            1 => world.spawn((pos, vel, Marker(1))).unwrap(),
            2 => world.spawn((pos, vel, Marker(2), 7u64)).unwrap(),
            _ => world.spawn((pos, vel)).unwrap(),
        };
    }
    world
}

#[test]
fn test_parallel_equals_sequential() {
    let world = populated_world();

    // Force sequential: threshold higher than any world
    let sequential_engine = QueryEngine::new(QueryConfig {
        parallel_threshold: 10_000_000,
        enable_caching: false,
        ..QueryConfig::default()
    });
    // Force parallel: threshold below everything
    let parallel_engine = QueryEngine::new(QueryConfig {
        parallel_threshold: 1,
        enable_caching: false,
        ..QueryConfig::default()
    });

    let sequential = sequential_engine
        .query::<(&Pos, &Vel)>()
        .execute(&world)
        .unwrap();
    let parallel = parallel_engine
        .query::<(&Pos, &Vel)>()
        .execute(&world)
        .unwrap();

    assert_eq!(sequential.len(), 10_000);
    let seq_rows: Vec<(EntityId, Pos, Vel)> = sequential
        .iter()
        .map(|(e, (p, v))| (*e, **p, **v))
        .collect();
    let par_rows: Vec<(EntityId, Pos, Vel)> = parallel
        .iter()
        .map(|(e, (p, v))| (*e, **p, **v))
        .collect();
    assert_eq!(seq_rows, par_rows);
}

#[test]
fn test_parallel_equals_sequential_with_predicate() {
    let world = populated_world();

    let sequential_engine = QueryEngine::new(QueryConfig {
        parallel_threshold: 10_000_000,
        enable_caching: false,
        ..QueryConfig::default()
    });
    let parallel_engine = QueryEngine::new(QueryConfig {
        parallel_threshold: 1,
        enable_caching: false,
        ..QueryConfig::default()
    });

    let build = |engine: &QueryEngine| {
        engine
            .query::<(&Vel,)>()
            .filter_component::<Vel>("vx < 300", |v| v.x < 300.0)
            .build()
    };

    let sequential = sequential_engine
        .execute(&world, &build(&sequential_engine))
        .unwrap();
    let parallel = parallel_engine
        .execute(&world, &build(&parallel_engine))
        .unwrap();

    let seq_ids: Vec<EntityId> = sequential.entities().collect();
    let par_ids: Vec<EntityId> = parallel.entities().collect();
    assert!(!seq_ids.is_empty());
    assert_eq!(seq_ids, par_ids);
}

#[test]
fn test_parallel_panic_containment() {
    let world = populated_world();
    let engine = QueryEngine::new(QueryConfig {
        parallel_threshold: 1,
        enable_caching: false,
        ..QueryConfig::default()
    });

    let result = engine
        .query::<(&Vel,)>()
        .filter_component::<Vel>("panics sometimes", |v| {
            if v.x > 500.0 {
                panic!("worker predicate panicked");
            }
            true
        })
        .execute(&world);

    match result {
        Err(QueryError::PredicatePanic(message)) => {
            assert!(message.contains("worker predicate panicked"));
        }
        other => panic!("expected contained panic, got {other:?}"),
    }

    // The engine remains usable afterwards
    let ok = engine.query::<(&Vel,)>().execute(&world).unwrap();
    assert_eq!(ok.len(), 10_000);
}

#[test]
fn test_hot_path_results_stay_equal_to_oracle() {
    let world = populated_world();

    let oracle_engine = QueryEngine::new(QueryConfig::memory_conservative());
    let hot_engine = QueryEngine::new(QueryConfig {
        hot_threshold: 5,
        enable_caching: false,
        ..QueryConfig::default()
    });

    let oracle: Vec<EntityId> = oracle_engine
        .query::<(&Pos, &Vel)>()
        .execute(&world)
        .unwrap()
        .entities()
        .collect();

    // Cross the hot threshold, then keep executing on the fast branch
    for _ in 0..20 {
        let rows = hot_engine.query::<(&Pos, &Vel)>().execute(&world).unwrap();
        let got: Vec<EntityId> = rows.entities().collect();
        assert_eq!(got, oracle);
    }
    assert_eq!(hot_engine.hot_fingerprints().len(), 1);
}

#[test]
fn test_hot_list_follows_new_archetypes() {
    let mut world = World::new();
    for i in 0..100 {
        world
            .spawn((Pos {
                x: i as f32,
                y: 0.0,
                z: 0.0,
            },))
            .unwrap();
    }

    let engine = QueryEngine::new(QueryConfig {
        hot_threshold: 2,
        enable_caching: false,
        ..QueryConfig::default()
    });

    for _ in 0..5 {
        engine.query::<(&Pos,)>().execute(&world).unwrap();
    }

    // A new archetype matching the hot fingerprint appears afterwards
    world
        .spawn((
            Pos {
                x: -1.0,
                y: 0.0,
                z: 0.0,
            },
            Marker(9),
        ))
        .unwrap();

    let rows = engine.query::<(&Pos,)>().execute(&world).unwrap();
    assert_eq!(rows.len(), 101);
}

#[test]
fn test_spatial_results_stable_across_thresholds() {
    let mut rng = XorShift(0xc0ffee);
    let mut world = World::new();
    world.track_spatial::<Pos>();
    for _ in 0..5_000 {
        world
            .spawn((
                Pos {
                    x: rng.coord(),
                    y: rng.coord(),
                    z: rng.coord(),
                },
                Vel { x: 0.0, y: 0.0 },
            ))
            .unwrap();
    }

    let region = Region::sphere(Vec3::new(500.0, 500.0, 500.0), 400.0);

    // The chosen strategy differs with the threshold; the sequence must not
    let low_threshold_engine = QueryEngine::new(QueryConfig {
        parallel_threshold: 1,
        enable_caching: false,
        ..QueryConfig::default()
    });
    let spatial_engine = QueryEngine::new(QueryConfig {
        parallel_threshold: 10_000_000,
        enable_caching: false,
        ..QueryConfig::default()
    });

    let hybrid: Vec<EntityId> = low_threshold_engine
        .query::<(&Pos,)>()
        .within_region(region.clone())
        .execute(&world)
        .unwrap()
        .entities()
        .collect();
    let spatial: Vec<EntityId> = spatial_engine
        .query::<(&Pos,)>()
        .within_region(region)
        .execute(&world)
        .unwrap()
        .entities()
        .collect();

    assert!(!hybrid.is_empty());
    assert_eq!(hybrid, spatial);
}
