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

//! The query engine façade.
//!
//! Owns the result cache, the planner, the hot-path tracker, the profiler
//! and the worker pool. The engine holds no world: every call takes the
//! world handle explicitly, so hosts decide whether it lives behind a
//! process-wide once-initializer, a [`SharedWorld`] lock, or a plain value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::cache::{CacheStats, QueryCache};
use crate::entity::EntityId;
use crate::error::{QueryError, Result};
use crate::hotpath::{BoundArchetypes, FingerprintStats, HotPathTracker, QueryProfiler};
use crate::query::builder::QueryBuilder;
use crate::query::executor::{self, STREAM_CHUNK};
use crate::query::plan::{ExecutionStrategy, QueryPlan, QueryPlanner};
use crate::query::{ComponentSet, Query, QueryData, QueryFingerprint, QueryRows, QueryStats};
use crate::world::World;

/// World handle for callers that share one world across threads: read-held
/// by queries, write-held by mutations.
pub type SharedWorld = Arc<RwLock<World>>;

/// Engine configuration record.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Gate on the result cache entirely
    pub enable_caching: bool,
    pub enable_parallel_execution: bool,
    pub enable_spatial_optimization: bool,
    pub enable_hot_path_optimization: bool,
    pub enable_query_profiling: bool,
    /// Minimum matching-entity count before the parallel path is chosen
    pub parallel_threshold: usize,
    /// Execution count past which a fingerprint is marked hot
    pub hot_threshold: usize,
    pub cache_max_entries: usize,
    pub cache_ttl: Duration,
    pub max_worker_threads: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            enable_parallel_execution: true,
            enable_spatial_optimization: true,
            enable_hot_path_optimization: true,
            enable_query_profiling: true,
            parallel_threshold: 1000,
            hot_threshold: 50,
            cache_max_entries: 10_000,
            cache_ttl: Duration::from_secs(5),
            max_worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl QueryConfig {
    /// Everything on, profiling off, generous cache. For shipping builds.
    pub fn performance_optimized() -> Self {
        Self {
            enable_query_profiling: false,
            parallel_threshold: 500,
            cache_max_entries: 50_000,
            cache_ttl: Duration::from_secs(10),
            ..Self::default()
        }
    }

    /// Everything off, tiny cache, two workers.
    pub fn memory_conservative() -> Self {
        Self {
            enable_caching: false,
            enable_parallel_execution: false,
            enable_spatial_optimization: false,
            enable_hot_path_optimization: false,
            enable_query_profiling: false,
            parallel_threshold: 10_000,
            cache_max_entries: 1_000,
            max_worker_threads: 2,
            ..Self::default()
        }
    }

    /// Profiling on, short TTL so stale results surface quickly.
    pub fn development_mode() -> Self {
        Self {
            enable_query_profiling: true,
            parallel_threshold: 2_000,
            cache_ttl: Duration::from_secs(1),
            ..Self::default()
        }
    }
}

/// Engine-wide counters and per-fingerprint timing snapshot.
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub total_queries: u64,
    pub cache_hits: u64,
    pub parallel_executions: u64,
    pub cache_hit_ratio: f64,
    pub average_execution_us: f64,
    pub hot_fingerprints: Vec<QueryFingerprint>,
    pub per_fingerprint: Vec<FingerprintStats>,
}

/// Result of an asynchronous execution: owned entity ids plus the version
/// they were computed at. Borrows cannot cross threads; callers refetch
/// values against their own world handle.
#[derive(Debug, Clone)]
pub struct OwnedRows {
    pub entities: Vec<EntityId>,
    pub version: u64,
    pub stats: QueryStats,
}

/// Handle to an in-flight asynchronous query.
pub struct PendingRows {
    receiver: crossbeam::channel::Receiver<Result<OwnedRows>>,
}

impl PendingRows {
    /// Block until the query completes.
    pub fn wait(self) -> Result<OwnedRows> {
        self.receiver
            .recv()
            .unwrap_or(Err(QueryError::Cancelled))
    }

    /// Non-blocking poll.
    pub fn try_take(&self) -> Option<Result<OwnedRows>> {
        self.receiver.try_recv().ok()
    }
}

/// Query engine: cache, planner, executor dispatch, hot-path tracking.
pub struct QueryEngine {
    config: QueryConfig,
    cache: QueryCache,
    planner: QueryPlanner,
    tracker: HotPathTracker,
    profiler: QueryProfiler,
    /// Pre-bound matched-archetype lists for hot fingerprints
    bound: Mutex<AHashMap<QueryFingerprint, BoundArchetypes>>,
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
    total_queries: AtomicU64,
    cache_hit_count: AtomicU64,
    parallel_executions: AtomicU64,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new(QueryConfig::default())
    }
}

impl QueryEngine {
    pub fn new(config: QueryConfig) -> Self {
        #[cfg(feature = "parallel")]
        let pool = if config.enable_parallel_execution {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(config.max_worker_threads.max(1))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(err) => {
                    tracing::warn!(%err, "worker pool construction failed; running sequential");
                    None
                }
            }
        } else {
            None
        };

        info!(
            workers = config.max_worker_threads,
            caching = config.enable_caching,
            "query engine initialized"
        );

        Self {
            cache: QueryCache::new(config.cache_max_entries, config.cache_ttl),
            planner: QueryPlanner::new(),
            tracker: HotPathTracker::new(config.enable_hot_path_optimization, config.hot_threshold),
            profiler: QueryProfiler::new(config.enable_query_profiling),
            bound: Mutex::new(AHashMap::new()),
            #[cfg(feature = "parallel")]
            pool,
            total_queries: AtomicU64::new(0),
            cache_hit_count: AtomicU64::new(0),
            parallel_executions: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Replace the configuration. The cache is rebuilt (entries dropped)
    /// when its shape changed; the worker pool is rebuilt when parallelism
    /// settings changed.
    pub fn update_config(&mut self, config: QueryConfig) {
        if config.cache_max_entries != self.config.cache_max_entries
            || config.cache_ttl != self.config.cache_ttl
        {
            self.cache = QueryCache::new(config.cache_max_entries, config.cache_ttl);
        }
        if config.enable_hot_path_optimization != self.config.enable_hot_path_optimization
            || config.hot_threshold != self.config.hot_threshold
        {
            self.tracker =
                HotPathTracker::new(config.enable_hot_path_optimization, config.hot_threshold);
            self.bound.lock().clear();
        }
        if config.enable_query_profiling != self.config.enable_query_profiling {
            self.profiler = QueryProfiler::new(config.enable_query_profiling);
        }
        #[cfg(feature = "parallel")]
        {
            let pool_changed = config.enable_parallel_execution
                != self.config.enable_parallel_execution
                || config.max_worker_threads != self.config.max_worker_threads;
            if pool_changed {
                self.pool = if config.enable_parallel_execution {
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(config.max_worker_threads.max(1))
                        .build()
                        .ok()
                } else {
                    None
                };
            }
        }
        self.config = config;
        debug!("query engine configuration updated");
    }

    /// Start building a query over component tuple `Q`.
    pub fn query<Q: ComponentSet>(&self) -> QueryBuilder<'_, Q> {
        QueryBuilder::new(self)
    }

    /// Execute a compiled query, returning typed rows.
    pub fn execute<'w, Q>(&self, world: &'w World, query: &Query<Q>) -> Result<QueryRows<'w, Q>>
    where
        Q: QueryData<'w>,
        Q::Item: Send,
    {
        let started = Instant::now();
        let fingerprint = query.fingerprint();
        let hot = self.tracker.record(fingerprint);
        self.total_queries.fetch_add(1, Ordering::Relaxed);

        let caching = self.config.enable_caching && query.use_cache;
        if caching {
            if let Some(entities) = self.cache.get(&fingerprint, world.version()) {
                match executor::refetch::<Q>(world, &entities, query) {
                    Some(rows) => {
                        self.cache_hit_count.fetch_add(1, Ordering::Relaxed);
                        let stats = QueryStats {
                            execution_time: started.elapsed(),
                            entities_processed: rows.len(),
                            entities_matched: rows.len(),
                            strategy: ExecutionStrategy::Sequential,
                            cache_hit: true,
                        };
                        self.profiler.record(fingerprint, stats.execution_time);
                        return Ok(QueryRows {
                            rows,
                            stats,
                            fingerprint,
                            version: world.version(),
                        });
                    }
                    None => {
                        // Entry membership no longer reflects the store
                        self.cache.evict(&fingerprint);
                    }
                }
            }
        }

        let matched = self.matched_archetypes(world, fingerprint, query, hot);
        let plan = self.planner.plan(&self.config, world, query);

        let output = self.dispatch::<Q>(world, query, &plan, &matched)?;
        let processed = output.processed;
        let mut rows = output.rows;
        let matched_count = rows.len();

        for (idx, count) in output.filter_counts.iter().enumerate() {
            self.planner
                .record(query.filters[idx].identity_hash(), count.processed, count.matched);
        }

        executor::post_process(world, query, plan.strategy, &mut rows);

        if caching {
            let entities: Vec<EntityId> = rows.iter().map(|(entity, _)| *entity).collect();
            self.cache
                .store(fingerprint, entities, world.version(), query.ttl);
        }

        let stats = QueryStats {
            execution_time: started.elapsed(),
            entities_processed: processed,
            entities_matched: matched_count,
            strategy: plan.strategy,
            cache_hit: false,
        };
        self.profiler.record(fingerprint, stats.execution_time);

        Ok(QueryRows {
            rows,
            stats,
            fingerprint,
            version: world.version(),
        })
    }

    fn dispatch<'w, Q>(
        &self,
        world: &'w World,
        query: &Query<Q>,
        plan: &QueryPlan,
        matched: &[usize],
    ) -> Result<executor::ExecOutput<'w, Q>>
    where
        Q: QueryData<'w>,
        Q::Item: Send,
    {
        match plan.strategy {
            ExecutionStrategy::Sequential | ExecutionStrategy::Indexed => {
                executor::execute_scan(world, query, plan, matched)
            }
            ExecutionStrategy::Parallel => {
                #[cfg(feature = "parallel")]
                if let Some(pool) = &self.pool {
                    self.parallel_executions.fetch_add(1, Ordering::Relaxed);
                    return executor::execute_parallel(world, query, plan, matched, pool);
                }
                executor::execute_scan(world, query, plan, matched)
            }
            ExecutionStrategy::Spatial => executor::execute_spatial(world, query, plan),
            ExecutionStrategy::Hybrid => {
                #[cfg(feature = "parallel")]
                if let Some(pool) = &self.pool {
                    self.parallel_executions.fetch_add(1, Ordering::Relaxed);
                    return executor::execute_hybrid(
                        world,
                        query,
                        plan,
                        pool,
                        self.config.parallel_threshold,
                    );
                }
                executor::execute_spatial(world, query, plan)
            }
        }
    }

    /// Run a query against a caller-supplied entity list instead of the
    /// archetype scan. Dead handles and entities missing the required
    /// components are skipped; surviving rows keep the input order, then
    /// sort, offset and limit apply as usual. Never cached: the entity list
    /// is part of the query's identity but not its fingerprint.
    pub fn query_entities<'w, Q>(
        &self,
        world: &'w World,
        entities: &[EntityId],
        query: &Query<Q>,
    ) -> Result<QueryRows<'w, Q>>
    where
        Q: QueryData<'w>,
    {
        let started = Instant::now();
        let fingerprint = query.fingerprint();
        self.total_queries.fetch_add(1, Ordering::Relaxed);

        let plan = self.planner.plan(&self.config, world, query);
        let output = executor::execute_for_entities(world, entities, query, &plan)?;
        let mut rows = output.rows;
        let matched_count = rows.len();
        executor::post_process(world, query, ExecutionStrategy::Sequential, &mut rows);

        let stats = QueryStats {
            execution_time: started.elapsed(),
            entities_processed: output.processed,
            entities_matched: matched_count,
            strategy: ExecutionStrategy::Sequential,
            cache_hit: false,
        };
        self.profiler.record(fingerprint, stats.execution_time);

        Ok(QueryRows {
            rows,
            stats,
            fingerprint,
            version: world.version(),
        })
    }

    /// Produce the plan this query would execute with, without running it.
    pub fn explain<Q>(&self, world: &World, query: &Query<Q>) -> QueryPlan {
        self.planner.plan(&self.config, world, query)
    }

    /// Execute and return entity ids only, skipping typed fetch. Backs
    /// aggregations and the async path; shares fingerprints and cache
    /// entries with the typed path.
    pub fn execute_entities<Q>(
        &self,
        world: &World,
        query: &Query<Q>,
    ) -> Result<(Vec<EntityId>, QueryStats)> {
        let started = Instant::now();
        let fingerprint = query.fingerprint();
        let hot = self.tracker.record(fingerprint);
        self.total_queries.fetch_add(1, Ordering::Relaxed);

        let caching = self.config.enable_caching && query.use_cache;
        if caching {
            if let Some(entities) = self.cache.get(&fingerprint, world.version()) {
                self.cache_hit_count.fetch_add(1, Ordering::Relaxed);
                let stats = QueryStats {
                    execution_time: started.elapsed(),
                    entities_processed: entities.len(),
                    entities_matched: entities.len(),
                    strategy: ExecutionStrategy::Sequential,
                    cache_hit: true,
                };
                self.profiler.record(fingerprint, stats.execution_time);
                return Ok((entities, stats));
            }
        }

        let matched = self.matched_archetypes(world, fingerprint, query, hot);
        let plan = self.planner.plan(&self.config, world, query);

        let output = match plan.strategy {
            ExecutionStrategy::Spatial | ExecutionStrategy::Hybrid => {
                executor::spatial_entities(world, query, &plan)
            }
            _ => executor::scan_entities(world, query, &plan, &matched),
        }?;

        for (idx, count) in output.filter_counts.iter().enumerate() {
            self.planner
                .record(query.filters[idx].identity_hash(), count.processed, count.matched);
        }

        let mut entities = output.entities;
        let matched_count = entities.len();
        executor::post_process_entities(world, query, plan.strategy, &mut entities);

        if caching {
            self.cache
                .store(fingerprint, entities.clone(), world.version(), query.ttl);
        }

        let stats = QueryStats {
            execution_time: started.elapsed(),
            entities_processed: output.processed,
            entities_matched: matched_count,
            strategy: plan.strategy,
            cache_hit: false,
        };
        self.profiler.record(fingerprint, stats.execution_time);
        Ok((entities, stats))
    }

    /// Submit the whole query to one worker; returns immediately.
    ///
    /// The result owns its entity ids. Values are refetched by the caller
    /// against the shared world on receipt.
    pub fn execute_async<Q>(
        self: &Arc<Self>,
        world: SharedWorld,
        query: Query<Q>,
    ) -> PendingRows
    where
        Q: 'static,
    {
        let (sender, receiver) = crossbeam::channel::bounded(1);
        let engine = Arc::clone(self);

        let job = move || {
            let guard = world.read();
            let outcome = engine
                .execute_entities(&guard, &query)
                .map(|(entities, stats)| OwnedRows {
                    entities,
                    version: guard.version(),
                    stats,
                });
            drop(guard);
            let _ = sender.send(outcome);
        };

        #[cfg(feature = "parallel")]
        if let Some(pool) = &self.pool {
            pool.spawn(job);
        } else {
            std::thread::spawn(job);
        }
        #[cfg(not(feature = "parallel"))]
        std::thread::spawn(job);

        PendingRows { receiver }
    }

    /// Streaming execution: invoke `consumer` per surviving tuple without
    /// materializing a result vector. Returns tuples emitted.
    pub fn for_each<'w, Q, F>(&self, world: &'w World, query: &Query<Q>, consumer: F) -> Result<usize>
    where
        Q: QueryData<'w>,
        F: FnMut(EntityId, Q::Item),
    {
        let fingerprint = query.fingerprint();
        let hot = self.tracker.record(fingerprint);
        self.total_queries.fetch_add(1, Ordering::Relaxed);

        let matched = self.matched_archetypes(world, fingerprint, query, hot);
        let plan = self.planner.plan(&self.config, world, query);
        executor::stream(world, query, &plan, &matched, consumer)
    }

    /// Streaming in chunks: the consumer receives batches of up to
    /// [`STREAM_CHUNK`] tuples, the natural shape for handing work to a
    /// downstream stage.
    pub fn for_each_chunk<'w, Q, F>(
        &self,
        world: &'w World,
        query: &Query<Q>,
        mut consumer: F,
    ) -> Result<usize>
    where
        Q: QueryData<'w>,
        F: FnMut(&mut Vec<(EntityId, Q::Item)>),
    {
        let mut buffer: Vec<(EntityId, Q::Item)> = Vec::with_capacity(STREAM_CHUNK);
        let emitted = self.for_each(world, query, |entity, item| {
            buffer.push((entity, item));
            if buffer.len() >= STREAM_CHUNK {
                consumer(&mut buffer);
                buffer.clear();
            }
        })?;
        if !buffer.is_empty() {
            consumer(&mut buffer);
        }
        Ok(emitted)
    }

    /// Matched-archetype list, pre-bound and incrementally updated for hot
    /// fingerprints.
    fn matched_archetypes<Q>(
        &self,
        world: &World,
        fingerprint: QueryFingerprint,
        query: &Query<Q>,
        hot: bool,
    ) -> Vec<usize> {
        if !hot {
            return world.matching_indices(&query.required);
        }

        let mut bound = self.bound.lock();
        let entry = bound.entry(fingerprint).or_default();
        if entry.seen_archetypes > world.archetype_count() {
            // The world was cleared since we last looked
            entry.indices.clear();
            entry.seen_archetypes = 0;
        }
        for (idx, archetype) in world
            .archetypes()
            .iter()
            .enumerate()
            .skip(entry.seen_archetypes)
        {
            if query.required.is_subset_of(archetype.signature()) {
                entry.indices.push(idx);
            }
        }
        entry.seen_archetypes = world.archetype_count();
        entry.indices.clone()
    }

    /// Clear cache, planner history, hot set and profiler accumulations.
    pub fn clear_caches(&self) {
        self.cache.clear();
        self.planner.clear_history();
        self.tracker.clear();
        self.profiler.clear();
        self.bound.lock().clear();
        self.total_queries.store(0, Ordering::Relaxed);
        self.cache_hit_count.store(0, Ordering::Relaxed);
        self.parallel_executions.store(0, Ordering::Relaxed);
        info!("query engine caches and statistics cleared");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn hot_fingerprints(&self) -> Vec<QueryFingerprint> {
        self.tracker.hot_set()
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        let total_queries = self.total_queries.load(Ordering::Relaxed);
        let cache_hits = self.cache_hit_count.load(Ordering::Relaxed);
        let per_fingerprint = self.profiler.snapshot(&self.tracker);

        let average_execution_us = if per_fingerprint.is_empty() {
            0.0
        } else {
            per_fingerprint
                .iter()
                .map(|s| s.mean_execution.as_secs_f64() * 1e6)
                .sum::<f64>()
                / per_fingerprint.len() as f64
        };

        PerformanceMetrics {
            total_queries,
            cache_hits,
            parallel_executions: self.parallel_executions.load(Ordering::Relaxed),
            cache_hit_ratio: if total_queries == 0 {
                0.0
            } else {
                cache_hits as f64 / total_queries as f64
            },
            average_execution_us,
            hot_fingerprints: self.tracker.hot_set(),
            per_fingerprint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Pos {
        x: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Vel {
        x: f32,
    }

    #[test]
    fn test_execute_basic() {
        let mut world = World::new();
        for i in 0..10 {
            world.spawn((Pos { x: i as f32 }, Vel { x: 1.0 })).unwrap();
        }
        world.spawn((Pos { x: 99.0 },)).unwrap();

        let engine = QueryEngine::default();
        let query: Query<(&Pos, &Vel)> = Query::new();
        let rows = engine.execute(&world, &query).unwrap();
        assert_eq!(rows.len(), 10);
        assert!(!rows.is_cached());
    }

    #[test]
    fn test_cache_hit_and_invalidation() {
        let mut world = World::new();
        for i in 0..10 {
            world.spawn((Pos { x: i as f32 },)).unwrap();
        }

        let engine = QueryEngine::default();
        let query: Query<(&Pos,)> = Query::new();

        let first = engine.execute(&world, &query).unwrap();
        assert!(!first.is_cached());
        let second = engine.execute(&world, &query).unwrap();
        assert!(second.is_cached());
        assert_eq!(first.len(), second.len());

        world.spawn((Pos { x: 100.0 },)).unwrap();
        let third = engine.execute(&world, &query).unwrap();
        assert!(!third.is_cached());
        assert_eq!(third.len(), 11);
    }

    #[test]
    fn test_caching_disabled() {
        let mut world = World::new();
        world.spawn((Pos { x: 0.0 },)).unwrap();

        let engine = QueryEngine::new(QueryConfig::memory_conservative());
        let query: Query<(&Pos,)> = Query::new();
        engine.execute(&world, &query).unwrap();
        let again = engine.execute(&world, &query).unwrap();
        assert!(!again.is_cached());
    }

    #[test]
    fn test_hot_tracking_marks_fingerprint() {
        let mut world = World::new();
        world.spawn((Pos { x: 0.0 },)).unwrap();

        let config = QueryConfig {
            hot_threshold: 3,
            enable_caching: false,
            ..QueryConfig::default()
        };
        let engine = QueryEngine::new(config);
        let query: Query<(&Pos,)> = Query::new();
        for _ in 0..5 {
            engine.execute(&world, &query).unwrap();
        }
        assert_eq!(engine.hot_fingerprints(), vec![query.fingerprint()]);

        // Hot executions still agree with the plain path
        let rows = engine.execute(&world, &query).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_execute_entities_shares_cache_with_typed() {
        let mut world = World::new();
        for i in 0..4 {
            world.spawn((Pos { x: i as f32 },)).unwrap();
        }

        let engine = QueryEngine::default();
        let query: Query<(&Pos,)> = Query::new();

        let (entities, stats) = engine.execute_entities(&world, &query).unwrap();
        assert_eq!(entities.len(), 4);
        assert!(!stats.cache_hit);

        let typed = engine.execute(&world, &query).unwrap();
        assert!(typed.is_cached());
    }

    #[test]
    fn test_metrics_accumulate() {
        let mut world = World::new();
        world.spawn((Pos { x: 0.0 },)).unwrap();

        let engine = QueryEngine::default();
        let query: Query<(&Pos,)> = Query::new();
        engine.execute(&world, &query).unwrap();
        engine.execute(&world, &query).unwrap();

        let metrics = engine.metrics();
        assert_eq!(metrics.total_queries, 2);
        assert_eq!(metrics.cache_hits, 1);
        assert!(metrics.cache_hit_ratio > 0.4);
    }

    #[test]
    fn test_execute_async_returns_owned_rows() {
        let mut world = World::new();
        for i in 0..10 {
            world.spawn((Pos { x: i as f32 },)).unwrap();
        }
        let shared: SharedWorld = Arc::new(RwLock::new(world));

        let engine = Arc::new(QueryEngine::default());
        let query: Query<(&'static Pos,)> = Query::new();
        let pending = engine.execute_async(Arc::clone(&shared), query);

        let owned = pending.wait().unwrap();
        assert_eq!(owned.entities.len(), 10);
        assert_eq!(owned.version, shared.read().version());
    }
}
