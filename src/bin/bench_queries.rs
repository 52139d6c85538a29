// Copyright 2025 the archetype_query authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Benchmark runner.
//!
//! Usage: bench_queries [--entities N] [--opt-level LEVEL]
//! where LEVEL is one of off, conservative, balanced, aggressive, adaptive.
//! Exits 0 on success, 1 on benchmark or regression failure.

use std::process::ExitCode;
use std::time::Instant;

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
    y: f32,
    z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Health {
    current: f32,
}

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

    fn next_f32(&mut self, scale: f32) -> f32 {
        (self.next() % 10_000) as f32 / 10_000.0 * scale
    }
}

fn config_for_level(level: &str) -> Option<QueryConfig> {
    let config = match level {
        "off" => QueryConfig {
            enable_caching: false,
            enable_parallel_execution: false,
            enable_spatial_optimization: false,
            enable_hot_path_optimization: false,
            enable_query_profiling: false,
            ..QueryConfig::default()
        },
        "conservative" => QueryConfig::memory_conservative(),
        "balanced" => QueryConfig::default(),
        "aggressive" => QueryConfig::performance_optimized(),
        "adaptive" => QueryConfig {
            hot_threshold: 10,
            ..QueryConfig::performance_optimized()
        },
        _ => return None,
    };
    Some(config)
}

fn parse_args() -> std::result::Result<(usize, String), String> {
    let mut entities = 100_000usize;
    let mut level = "balanced".to_string();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--entities" => {
                let value = args.get(i + 1).ok_or("--entities needs a value")?;
                entities = value
                    .parse()
                    .map_err(|_| format!("bad entity count: {value}"))?;
                i += 2;
            }
            "--opt-level" => {
                level = args
                    .get(i + 1)
                    .ok_or("--opt-level needs a value")?
                    .to_string();
                i += 2;
            }
            other => return Err(format!("unknown flag: {other}")),
        }
    }
    Ok((entities, level))
}

fn build_world(entities: usize) -> World {
    let mut rng = XorShift(0xbe9c_5eed | 1);
    let mut world = World::new();
    world.track_spatial::<Position>();

    // Three archetype shapes so matching is non-trivial
    let third = entities / 3;
    world
        .spawn_batch((0..third).map(|_| {
            (
                Position {
                    x: rng.next_f32(1000.0),
                    y: rng.next_f32(1000.0),
                    z: rng.next_f32(1000.0),
                },
                Velocity {
                    x: rng.next_f32(10.0),
                    y: 0.0,
                    z: 0.0,
                },
            )
        }))
        .expect("spawn batch");
    world
        .spawn_batch((0..third).map(|_| {
            (
                Position {
                    x: rng.next_f32(1000.0),
                    y: rng.next_f32(1000.0),
                    z: rng.next_f32(1000.0),
                },
                Velocity {
                    x: rng.next_f32(10.0),
                    y: 0.0,
                    z: 0.0,
                },
                Health {
                    current: rng.next_f32(100.0),
                },
            )
        }))
        .expect("spawn batch");
    world
        .spawn_batch((0..entities - 2 * third).map(|_| {
            (Position {
                x: rng.next_f32(1000.0),
                y: rng.next_f32(1000.0),
                z: rng.next_f32(1000.0),
            },)
        }))
        .expect("spawn batch");
    world
}

fn time_us(f: impl FnOnce()) -> f64 {
    let start = Instant::now();
    f();
    start.elapsed().as_secs_f64() * 1e6
}

fn main() -> ExitCode {
    #[cfg(feature = "profiling")]
    tracing_subscriber::fmt::init();

    let (entities, level) = match parse_args() {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };
    let Some(config) = config_for_level(&level) else {
        eprintln!("unknown opt-level: {level} (expected off|conservative|balanced|aggressive|adaptive)");
        return ExitCode::FAILURE;
    };

    println!("bench_queries: {entities} entities, opt-level {level}");
    let world = build_world(entities);
    let engine = QueryEngine::new(config);

    // Warm up archetype matching and the cache
    let warm = engine
        .query::<(&Position, &Velocity)>()
        .execute(&world)
        .expect("warmup query");
    println!("warmup matched {} entities", warm.len());

    let mut failures = 0;

    let cold = time_us(|| {
        let rows = engine
            .query::<(&Position, &Velocity)>()
            .cached(false)
            .execute(&world)
            .expect("uncached query");
        std::hint::black_box(rows.len());
    });
    println!("uncached (Pos, Vel) scan: {cold:.1} us");

    let cached = time_us(|| {
        let rows = engine
            .query::<(&Position, &Velocity)>()
            .execute(&world)
            .expect("cached query");
        std::hint::black_box(rows.len());
    });
    println!("cached (Pos, Vel) scan: {cached:.1} us");

    let filtered = time_us(|| {
        let rows = engine
            .query::<(&Velocity,)>()
            .filter_range::<Velocity>("vx in [2, 5]", |v| v.x as f64, 2.0, 5.0)
            .cached(false)
            .execute(&world)
            .expect("filtered query");
        std::hint::black_box(rows.len());
    });
    println!("range-filtered velocity scan: {filtered:.1} us");

    let spatial = time_us(|| {
        let rows = engine
            .query::<(&Position,)>()
            .within_radius(Vec3::splat(500.0), 100.0)
            .cached(false)
            .execute(&world)
            .expect("spatial query");
        std::hint::black_box(rows.len());
    });
    println!("radius-100 spatial query: {spatial:.1} us");

    // Regression gate: forced-parallel and forced-sequential executions must
    // return element-equal sequences
    let sequential = engine
        .query::<(&Position, &Velocity)>()
        .parallel(false)
        .cached(false)
        .execute(&world)
        .expect("sequential run");
    let parallel = engine
        .query::<(&Position, &Velocity)>()
        .cached(false)
        .execute(&world)
        .expect("parallel run");
    let seq_entities: Vec<EntityId> = sequential.entities().collect();
    let par_entities: Vec<EntityId> = parallel.entities().collect();
    if seq_entities != par_entities {
        eprintln!("REGRESSION: parallel and sequential orders diverge");
        failures += 1;
    } else {
        println!("parallel == sequential: ok ({} rows)", seq_entities.len());
    }

    // Regression gate: cache hits must match fresh execution
    let fresh = engine
        .query::<(&Position, &Velocity)>()
        .cached(false)
        .execute(&world)
        .expect("fresh run");
    let hit = engine
        .query::<(&Position, &Velocity)>()
        .execute(&world)
        .expect("cache probe");
    if hit.is_cached() {
        let fresh_entities: Vec<EntityId> = fresh.entities().collect();
        let hit_entities: Vec<EntityId> = hit.entities().collect();
        if fresh_entities != hit_entities {
            eprintln!("REGRESSION: cached result diverges from fresh execution");
            failures += 1;
        } else {
            println!("cache soundness: ok");
        }
    } else if engine.config().enable_caching {
        eprintln!("REGRESSION: expected a cache hit");
        failures += 1;
    }

    let metrics = engine.metrics();
    println!(
        "totals: {} queries, {:.0}% cache hits, {} parallel runs, {:.1} us mean",
        metrics.total_queries,
        metrics.cache_hit_ratio * 100.0,
        metrics.parallel_executions,
        metrics.average_execution_us
    );

    if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
