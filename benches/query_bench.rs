use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use archetype_query::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

impl SpatialComponent for Position {
    fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    x: f32,
}

fn build_world(entities: usize) -> World {
    let mut world = World::new();
    world.track_spatial::<Position>();
    world
        .spawn_batch((0..entities).map(|i| {
            (
                Position {
                    x: (i % 1000) as f32,
                    y: ((i / 1000) % 1000) as f32,
                    z: 0.0,
                },
                Velocity {
                    x: (i % 17) as f32,
                },
            )
        }))
        .expect("spawn batch");
    world
}

fn bench_spawn(c: &mut Criterion) {
    c.bench_function("spawn_batch_10k", |b| {
        b.iter(|| {
            let mut world = World::new();
            world
                .spawn_batch((0..10_000).map(|i| {
                    (
                        Position {
                            x: i as f32,
                            y: 0.0,
                            z: 0.0,
                        },
                        Velocity { x: 1.0 },
                    )
                }))
                .expect("spawn batch");
            black_box(world.entity_count());
        });
    });
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncached_scan");
    for size in [1_000usize, 10_000, 100_000] {
        let world = build_world(size);
        let engine = QueryEngine::new(QueryConfig::memory_conservative());
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let rows = engine
                    .query::<(&Position, &Velocity)>()
                    .execute(&world)
                    .expect("query");
                black_box(rows.len());
            });
        });
    }
    group.finish();
}

fn bench_cache_hit(c: &mut Criterion) {
    let world = build_world(100_000);
    let engine = QueryEngine::new(QueryConfig::performance_optimized());
    // Prime the entry
    engine
        .query::<(&Position, &Velocity)>()
        .execute(&world)
        .expect("prime");

    c.bench_function("cache_hit_100k", |b| {
        b.iter(|| {
            let rows = engine
                .query::<(&Position, &Velocity)>()
                .execute(&world)
                .expect("query");
            black_box(rows.is_cached());
        });
    });
}

fn bench_filtered(c: &mut Criterion) {
    let world = build_world(100_000);
    let engine = QueryEngine::new(QueryConfig::memory_conservative());

    c.bench_function("range_filter_100k", |b| {
        b.iter(|| {
            let rows = engine
                .query::<(&Velocity,)>()
                .filter_range::<Velocity>("vx < 4", |v| v.x as f64, 0.0, 4.0)
                .execute(&world)
                .expect("query");
            black_box(rows.len());
        });
    });
}

fn bench_spatial(c: &mut Criterion) {
    let world = build_world(100_000);
    let engine = QueryEngine::new(QueryConfig::performance_optimized());

    c.bench_function("radius_query_100k", |b| {
        b.iter(|| {
            let rows = engine
                .query::<(&Position,)>()
                .within_radius(Vec3::new(500.0, 50.0, 0.0), 25.0)
                .cached(false)
                .execute(&world)
                .expect("query");
            black_box(rows.len());
        });
    });

    c.bench_function("nearest_16_100k", |b| {
        b.iter(|| {
            let rows = engine
                .query::<(&Position,)>()
                .nearest_to(Vec3::new(500.0, 50.0, 0.0), 16)
                .cached(false)
                .execute(&world)
                .expect("query");
            black_box(rows.len());
        });
    });
}

criterion_group!(
    benches,
    bench_spawn,
    bench_scan,
    bench_cache_hit,
    bench_filtered,
    bench_spatial
);
criterion_main!(benches);
