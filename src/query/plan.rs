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

//! Query planning: strategy selection and filter ordering.
//!
//! The matching-entity estimate is exact (archetype lengths are free to
//! sum); predicate selectivity comes from per-predicate execution history,
//! falling back to kind defaults. Decision rules are evaluated in order,
//! first match wins.

use parking_lot::Mutex;

use ahash::AHashMap;

use crate::engine::QueryConfig;
use crate::query::Query;
use crate::world::World;

const SPATIAL_THRESHOLD: usize = 500;
const HYBRID_THRESHOLD: usize = 100;
const HIGH_SELECTIVITY: f32 = 0.1;
const HISTORY_WINDOW: u32 = 100;

/// Execution strategy chosen for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStrategy {
    /// Scan matching archetypes on the calling thread
    Sequential,
    /// Partition matching archetypes across the worker pool
    Parallel,
    /// Sequential scan with filters ordered most-selective-first
    Indexed,
    /// Resolve candidates through the spatial index first
    Spatial,
    /// Spatial candidate gathering, parallel residual filtering
    Hybrid,
}

/// The chosen strategy plus the estimates that led to it.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub strategy: ExecutionStrategy,
    pub estimated_count: usize,
    pub estimated_selectivity: f32,
    /// Indices into the query's filter list, cheapest-per-surviving-row first
    pub filter_order: Vec<usize>,
}

impl QueryPlan {
    /// Human-readable plan summary for diagnostics.
    pub fn describe(&self) -> String {
        format!(
            "strategy={:?} est_entities={} est_selectivity={:.1}% filters={:?}",
            self.strategy,
            self.estimated_count,
            self.estimated_selectivity * 100.0,
            self.filter_order
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct SelectivityHistory {
    samples: u32,
    mean_ratio: f32,
}

/// Cost-based planner with per-predicate selectivity learning.
pub struct QueryPlanner {
    history: Mutex<AHashMap<u64, SelectivityHistory>>,
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryPlanner {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(AHashMap::new()),
        }
    }

    /// Produce a plan for `query` against the current world.
    pub fn plan<Q>(&self, config: &QueryConfig, world: &World, query: &Query<Q>) -> QueryPlan {
        let estimated_count = world.matching_entity_count(&query.required);

        let history = self.history.lock();
        let mut selectivities: Vec<f32> = Vec::with_capacity(query.filters.len());
        for filter in &query.filters {
            let learned = history
                .get(&filter.identity_hash())
                .map(|h| h.mean_ratio)
                .unwrap_or_else(|| filter.kind().default_selectivity());
            selectivities.push(learned.clamp(0.0, 1.0));
        }
        drop(history);

        // Conjuncts multiply; the spatial stage behaves like one more filter
        let mut estimated_selectivity: f32 = selectivities.iter().product();
        let spatial = query.is_spatial();
        if spatial {
            estimated_selectivity *=
                crate::query::SelectivityKind::Spatial.default_selectivity();
        }

        // Cheapest-per-surviving-row first: expected cost of running a
        // filter is its per-row cost, expected payoff is the rows it kills
        let mut filter_order: Vec<usize> = (0..query.filters.len()).collect();
        filter_order.sort_by(|&a, &b| {
            let score_a = selectivities[a] * query.filters[a].cost();
            let score_b = selectivities[b] * query.filters[b].cost();
            score_a.total_cmp(&score_b)
        });

        let spatial_allowed = spatial && config.enable_spatial_optimization;
        let parallel_allowed = config.enable_parallel_execution && query.allow_parallel;

        let strategy = if spatial_allowed && estimated_count > SPATIAL_THRESHOLD {
            ExecutionStrategy::Spatial
        } else if parallel_allowed && estimated_count > config.parallel_threshold {
            ExecutionStrategy::Parallel
        } else if estimated_selectivity < HIGH_SELECTIVITY {
            ExecutionStrategy::Indexed
        } else if spatial_allowed && estimated_count > HYBRID_THRESHOLD {
            ExecutionStrategy::Hybrid
        } else {
            // A region below every threshold is applied as an ordinary
            // per-row predicate by the scan paths
            ExecutionStrategy::Sequential
        };

        QueryPlan {
            strategy,
            estimated_count,
            estimated_selectivity,
            filter_order,
        }
    }

    /// Feed an observed match ratio back into the history.
    pub fn record(&self, filter_identity: u64, processed: usize, matched: usize) {
        if processed == 0 {
            return;
        }
        let ratio = matched as f32 / processed as f32;
        let mut history = self.history.lock();
        let entry = history.entry(filter_identity).or_insert(SelectivityHistory {
            samples: 0,
            mean_ratio: ratio,
        });
        // Windowed running mean: recent behavior dominates once the window
        // fills
        let n = entry.samples.min(HISTORY_WINDOW) as f32;
        entry.mean_ratio = (entry.mean_ratio * n + ratio) / (n + 1.0);
        entry.samples = entry.samples.saturating_add(1);
    }

    /// Learned selectivity for a predicate identity, if any.
    pub fn learned_selectivity(&self, filter_identity: u64) -> Option<f32> {
        self.history.lock().get(&filter_identity).map(|h| h.mean_ratio)
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{ComponentFilter, SelectivityKind};

    #[derive(Debug, Clone, Copy)]
    struct Pos {
        #[allow(dead_code)]
        x: f32,
    }

    #[derive(Debug, Clone, Copy)]
    struct Vel {
        x: f32,
    }

    fn world_with(n: usize) -> World {
        let mut world = World::new();
        world
            .spawn_batch((0..n).map(|i| (Pos { x: i as f32 }, Vel { x: 1.0 })))
            .unwrap();
        world
    }

    #[test]
    fn test_large_world_goes_parallel() {
        let world = world_with(5000);
        let planner = QueryPlanner::new();
        let config = QueryConfig::default();
        let query: Query<(&Pos, &Vel)> = Query::new();

        let plan = planner.plan(&config, &world, &query);
        assert_eq!(plan.strategy, ExecutionStrategy::Parallel);
        assert_eq!(plan.estimated_count, 5000);
    }

    #[test]
    fn test_small_world_stays_sequential() {
        let world = world_with(10);
        let planner = QueryPlanner::new();
        let config = QueryConfig::default();
        let query: Query<(&Pos,)> = Query::new();

        let plan = planner.plan(&config, &world, &query);
        assert_eq!(plan.strategy, ExecutionStrategy::Sequential);
    }

    #[test]
    fn test_selective_filters_pick_indexed() {
        let world = world_with(10);
        let planner = QueryPlanner::new();
        let config = QueryConfig::default();

        // Two equality conjuncts estimate 0.1 * 0.1, well under the
        // high-selectivity threshold
        let mut query: Query<(&Vel,)> = Query::new();
        query.filters.push(ComponentFilter::new::<Vel>(
            |v| v.x == 3.0,
            "vel == 3",
            SelectivityKind::Equality,
        ));
        query.filters.push(ComponentFilter::new::<Pos>(
            |p| p.x == 3.0,
            "pos == 3",
            SelectivityKind::Equality,
        ));

        let plan = planner.plan(&config, &world, &query);
        assert_eq!(plan.strategy, ExecutionStrategy::Indexed);
    }

    #[test]
    fn test_parallel_disabled_by_config() {
        let world = world_with(5000);
        let planner = QueryPlanner::new();
        let config = QueryConfig {
            enable_parallel_execution: false,
            ..QueryConfig::default()
        };
        let query: Query<(&Pos,)> = Query::new();

        let plan = planner.plan(&config, &world, &query);
        assert_ne!(plan.strategy, ExecutionStrategy::Parallel);
    }

    #[test]
    fn test_history_overrides_default() {
        let planner = QueryPlanner::new();
        let filter =
            ComponentFilter::new::<Vel>(|_| true, "everything", SelectivityKind::Equality);
        let identity = filter.identity_hash();

        // Observed behavior says the filter matches everything, despite its
        // equality kind defaulting to 0.1
        for _ in 0..10 {
            planner.record(identity, 100, 100);
        }
        let learned = planner.learned_selectivity(identity).unwrap();
        assert!(learned > 0.9);
    }

    #[test]
    fn test_filter_order_most_selective_first() {
        let world = world_with(10);
        let planner = QueryPlanner::new();
        let config = QueryConfig::default();

        let mut query: Query<(&Vel,)> = Query::new();
        query.filters.push(ComponentFilter::new::<Vel>(
            |_| true,
            "broad",
            SelectivityKind::MatchAll,
        ));
        query.filters.push(ComponentFilter::new::<Vel>(
            |v| v.x == 1.0,
            "narrow",
            SelectivityKind::Equality,
        ));

        let plan = planner.plan(&config, &world, &query);
        assert_eq!(plan.filter_order, vec![1, 0]);
    }
}
