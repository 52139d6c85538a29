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

//! Plan realization: sequential, parallel, spatial and hybrid paths.
//!
//! All paths produce the same element order for the same world version:
//! archetype discovery order, then row order, then any user sort. The
//! parallel path keeps that guarantee by partitioning whole archetypes and
//! concatenating per-archetype outputs in list order. Predicate panics are
//! contained and surfaced as errors; partial work is discarded.
//!
//! Two row representations exist: the typed path fetches component
//! references through [`QueryData`]; the entity path produces ids only and
//! backs `execute_async`, aggregations and cache storage.

use std::panic::{catch_unwind, AssertUnwindSafe};

use ahash::AHashMap;
use bumpalo::Bump;
use smallvec::SmallVec;
use tracing::warn;

use crate::entity::EntityId;
use crate::error::{QueryError, Result};
use crate::query::plan::{ExecutionStrategy, QueryPlan};
use crate::query::{Query, QueryData};
use crate::world::World;

/// Streaming hands tuples downstream in chunks of this many.
pub const STREAM_CHUNK: usize = 5000;

/// Per-filter observation counters fed back into the planner.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FilterCount {
    pub processed: usize,
    pub matched: usize,
}

pub(crate) type FilterCounts = SmallVec<[FilterCount; 8]>;

#[derive(Debug)]
pub(crate) struct ExecOutput<'w, Q: QueryData<'w>> {
    pub rows: Vec<(EntityId, Q::Item)>,
    pub processed: usize,
    pub filter_counts: FilterCounts,
}

pub(crate) struct EntityOutput {
    pub entities: Vec<EntityId>,
    pub processed: usize,
    pub filter_counts: FilterCounts,
}

/// Each ordered filter's resolved column in one archetype. `None` from the
/// binder means a filter's component is absent there, so no row can match.
struct FilterBindings {
    filters: SmallVec<[(usize, usize); 8]>,
}

fn bind_filters<Q>(
    world: &World,
    arch_id: usize,
    query: &Query<Q>,
    order: &[usize],
) -> Option<FilterBindings> {
    let archetype = world.archetype(arch_id)?;
    let mut filters = SmallVec::new();
    for &filter_idx in order {
        let col = archetype.column_index(query.filters[filter_idx].component())?;
        filters.push((filter_idx, col));
    }
    Some(FilterBindings { filters })
}

/// Evaluate one row through the bound filters and the optional region
/// predicate. Updates counters; returns whether the row survives.
#[inline]
fn row_survives<Q>(
    world: &World,
    arch_id: usize,
    row: usize,
    entity: EntityId,
    query: &Query<Q>,
    bindings: &FilterBindings,
    counts: &mut [FilterCount],
) -> bool {
    let archetype = world.archetype(arch_id).expect("bound archetype");
    for &(filter_idx, col_idx) in &bindings.filters {
        let column = archetype.column_by_index(col_idx).expect("bound column");
        let ptr = column.get_raw(row).expect("live row");
        counts[filter_idx].processed += 1;
        // SAFETY: the pointer targets a live value of the filter's component
        if !unsafe { query.filters[filter_idx].matches_raw(ptr) } {
            return false;
        }
        counts[filter_idx].matched += 1;
    }

    if let Some(region) = &query.region {
        match world.tracked_position(entity) {
            Some(position) => {
                if !region.contains(position) {
                    return false;
                }
            }
            // Untracked entities cannot satisfy a region predicate
            None => return false,
        }
    }

    true
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

fn warn_if_region_untracked<Q>(world: &World, query: &Query<Q>) {
    if query.region.is_some() && world.spatial_tracked().is_none() {
        warn!("region predicate evaluated with no spatial tracking; nothing will match");
    }
}

// ---------------------------------------------------------------------------
// Typed execution
// ---------------------------------------------------------------------------

/// Scan one archetype in row order, fetching typed items. Returns rows
/// processed.
fn scan_archetype<'w, Q: QueryData<'w>>(
    world: &'w World,
    arch_id: usize,
    query: &Query<Q>,
    order: &[usize],
    out: &mut Vec<(EntityId, Q::Item)>,
    counts: &mut [FilterCount],
) -> usize {
    let Some(bindings) = bind_filters(world, arch_id, query, order) else {
        return 0;
    };
    let archetype = world.archetype(arch_id).expect("bound archetype");
    let Some(state) = Q::prepare(archetype) else {
        return 0;
    };
    let entities = archetype.entities();

    for (row, &entity) in entities.iter().enumerate() {
        if row_survives(world, arch_id, row, entity, query, &bindings, counts) {
            // SAFETY: row indexes a live row of the prepared archetype
            if let Some(item) = unsafe { Q::fetch(&state, row) } {
                out.push((entity, item));
            }
        }
    }
    entities.len()
}

/// Sequential and Indexed paths: the Indexed variant differs only in that
/// the plan's filter order front-loads the most selective predicate.
pub(crate) fn execute_scan<'w, Q: QueryData<'w>>(
    world: &'w World,
    query: &Query<Q>,
    plan: &QueryPlan,
    matched: &[usize],
) -> Result<ExecOutput<'w, Q>> {
    warn_if_region_untracked(world, query);
    let mut counts: FilterCounts =
        SmallVec::from_elem(FilterCount::default(), query.filters.len());
    let mut rows = Vec::new();
    let mut processed = 0;

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        for &arch_id in matched {
            processed += scan_archetype(
                world,
                arch_id,
                query,
                &plan.filter_order,
                &mut rows,
                &mut counts,
            );
        }
    }));
    if let Err(payload) = outcome {
        return Err(QueryError::PredicatePanic(panic_message(payload)));
    }

    Ok(ExecOutput {
        rows,
        processed,
        filter_counts: counts,
    })
}

/// Parallel path: archetype-level partitioning. Each archetype is visited by
/// exactly one worker; per-archetype outputs concatenate in list order so
/// the result order matches the sequential path.
#[cfg(feature = "parallel")]
pub(crate) fn execute_parallel<'w, Q>(
    world: &'w World,
    query: &Query<Q>,
    plan: &QueryPlan,
    matched: &[usize],
    pool: &rayon::ThreadPool,
) -> Result<ExecOutput<'w, Q>>
where
    Q: QueryData<'w>,
    Q::Item: Send,
{
    use rayon::prelude::*;

    warn_if_region_untracked(world, query);
    let filter_len = query.filters.len();

    let per_archetype: std::result::Result<Vec<_>, String> = pool.install(|| {
        matched
            .par_iter()
            .map(|&arch_id| {
                catch_unwind(AssertUnwindSafe(|| {
                    let mut counts: FilterCounts =
                        SmallVec::from_elem(FilterCount::default(), filter_len);
                    let mut rows = Vec::new();
                    let processed = scan_archetype(
                        world,
                        arch_id,
                        query,
                        &plan.filter_order,
                        &mut rows,
                        &mut counts,
                    );
                    (rows, processed, counts)
                }))
                .map_err(panic_message)
            })
            .collect()
    });

    let per_archetype = match per_archetype {
        Ok(results) => results,
        Err(message) => return Err(QueryError::PredicatePanic(message)),
    };

    let mut out = ExecOutput::<Q> {
        rows: Vec::with_capacity(per_archetype.iter().map(|(r, _, _)| r.len()).sum()),
        processed: 0,
        filter_counts: SmallVec::from_elem(FilterCount::default(), filter_len),
    };
    for (rows, processed, counts) in per_archetype {
        out.rows.extend(rows);
        out.processed += processed;
        for (total, part) in out.filter_counts.iter_mut().zip(counts) {
            total.processed += part.processed;
            total.matched += part.matched;
        }
    }
    Ok(out)
}

/// Spatial path: resolve candidates through the index, re-validate each
/// against the store, run residual predicates, emit.
pub(crate) fn execute_spatial<'w, Q: QueryData<'w>>(
    world: &'w World,
    query: &Query<Q>,
    plan: &QueryPlan,
) -> Result<ExecOutput<'w, Q>> {
    let mut counts: FilterCounts =
        SmallVec::from_elem(FilterCount::default(), query.filters.len());
    let mut rows = Vec::new();
    let mut processed = 0;

    let scratch = Bump::new();
    let candidates = gather_candidates(world, query, &scratch);

    // Per-archetype bindings, resolved lazily since knn candidates arrive in
    // distance order rather than grouped
    let mut states: AHashMap<usize, Option<(Q::State, FilterBindings)>> = AHashMap::new();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        for &(arch_id, row, entity) in candidates.iter() {
            processed += 1;
            let slot = states.entry(arch_id).or_insert_with(|| {
                let bindings = bind_filters(world, arch_id, query, &plan.filter_order)?;
                let archetype = world.archetype(arch_id)?;
                let state = Q::prepare(archetype)?;
                Some((state, bindings))
            });
            let Some((state, bindings)) = slot.as_ref() else {
                continue;
            };

            // Region membership was established by the index; only residual
            // value filters remain here
            if filters_pass(world, arch_id, row, query, bindings, &mut counts) {
                // SAFETY: candidate rows were validated against the store
                if let Some(item) = unsafe { Q::fetch(state, row) } {
                    rows.push((entity, item));
                }
            }
        }
    }));
    if let Err(payload) = outcome {
        return Err(QueryError::PredicatePanic(panic_message(payload)));
    }

    Ok(ExecOutput {
        rows,
        processed,
        filter_counts: counts,
    })
}

/// Residual value filters only, region excluded (candidates already passed
/// the index's exact point test).
#[inline]
fn filters_pass<Q>(
    world: &World,
    arch_id: usize,
    row: usize,
    query: &Query<Q>,
    bindings: &FilterBindings,
    counts: &mut [FilterCount],
) -> bool {
    let archetype = world.archetype(arch_id).expect("bound archetype");
    for &(filter_idx, col_idx) in &bindings.filters {
        let column = archetype.column_by_index(col_idx).expect("bound column");
        let ptr = column.get_raw(row).expect("live row");
        counts[filter_idx].processed += 1;
        // SAFETY: live value of the filter's component type
        if !unsafe { query.filters[filter_idx].matches_raw(ptr) } {
            return false;
        }
        counts[filter_idx].matched += 1;
    }
    true
}

/// Hybrid path: spatial candidate gathering, then parallel residual
/// filtering per archetype when the surviving set is large enough.
#[cfg(feature = "parallel")]
pub(crate) fn execute_hybrid<'w, Q>(
    world: &'w World,
    query: &Query<Q>,
    plan: &QueryPlan,
    pool: &rayon::ThreadPool,
    parallel_threshold: usize,
) -> Result<ExecOutput<'w, Q>>
where
    Q: QueryData<'w>,
    Q::Item: Send,
{
    use rayon::prelude::*;

    // knn ordering is incompatible with per-archetype partitioning; the
    // plain spatial walk preserves distance order
    if query.nearest.is_some() {
        return execute_spatial::<Q>(world, query, plan);
    }

    let scratch = Bump::new();
    let candidates = gather_candidates(world, query, &scratch);
    if candidates.len() <= parallel_threshold {
        drop(candidates);
        return execute_spatial::<Q>(world, query, plan);
    }

    // Group rows per archetype; candidates are already (archetype, row)
    // sorted, so runs are contiguous
    let mut groups: Vec<(usize, Vec<(usize, EntityId)>)> = Vec::new();
    for &(arch_id, row, entity) in candidates.iter() {
        match groups.last_mut() {
            Some((last_arch, rows)) if *last_arch == arch_id => rows.push((row, entity)),
            _ => groups.push((arch_id, vec![(row, entity)])),
        }
    }

    let filter_len = query.filters.len();
    let per_group: std::result::Result<Vec<_>, String> = pool.install(|| {
        groups
            .par_iter()
            .map(|(arch_id, group_rows)| {
                catch_unwind(AssertUnwindSafe(|| {
                    let mut counts: FilterCounts =
                        SmallVec::from_elem(FilterCount::default(), filter_len);
                    let mut rows = Vec::new();
                    let bound = bind_filters(world, *arch_id, query, &plan.filter_order)
                        .and_then(|bindings| {
                            let state = Q::prepare(world.archetype(*arch_id)?)?;
                            Some((state, bindings))
                        });
                    if let Some((state, bindings)) = bound {
                        for &(row, entity) in group_rows {
                            if filters_pass(world, *arch_id, row, query, &bindings, &mut counts)
                            {
                                // SAFETY: validated candidate row
                                if let Some(item) = unsafe { Q::fetch(&state, row) } {
                                    rows.push((entity, item));
                                }
                            }
                        }
                    }
                    (rows, group_rows.len(), counts)
                }))
                .map_err(panic_message)
            })
            .collect()
    });

    let per_group = match per_group {
        Ok(results) => results,
        Err(message) => return Err(QueryError::PredicatePanic(message)),
    };

    let mut out = ExecOutput::<Q> {
        rows: Vec::new(),
        processed: 0,
        filter_counts: SmallVec::from_elem(FilterCount::default(), filter_len),
    };
    for (rows, processed, counts) in per_group {
        out.rows.extend(rows);
        out.processed += processed;
        for (total, part) in out.filter_counts.iter_mut().zip(counts) {
            total.processed += part.processed;
            total.matched += part.matched;
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Entity-only execution (async, aggregation, cache storage)
// ---------------------------------------------------------------------------

/// Scan paths producing entity ids only.
pub(crate) fn scan_entities<Q>(
    world: &World,
    query: &Query<Q>,
    plan: &QueryPlan,
    matched: &[usize],
) -> Result<EntityOutput> {
    warn_if_region_untracked(world, query);
    let mut counts: FilterCounts =
        SmallVec::from_elem(FilterCount::default(), query.filters.len());
    let mut entities = Vec::new();
    let mut processed = 0;

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        for &arch_id in matched {
            let Some(bindings) = bind_filters(world, arch_id, query, &plan.filter_order) else {
                continue;
            };
            let archetype = world.archetype(arch_id).expect("bound archetype");
            processed += archetype.len();
            for (row, &entity) in archetype.entities().iter().enumerate() {
                if row_survives(world, arch_id, row, entity, query, &bindings, &mut counts) {
                    entities.push(entity);
                }
            }
        }
    }));
    if let Err(payload) = outcome {
        return Err(QueryError::PredicatePanic(panic_message(payload)));
    }

    Ok(EntityOutput {
        entities,
        processed,
        filter_counts: counts,
    })
}

/// Spatial path producing entity ids only.
pub(crate) fn spatial_entities<Q>(
    world: &World,
    query: &Query<Q>,
    plan: &QueryPlan,
) -> Result<EntityOutput> {
    let mut counts: FilterCounts =
        SmallVec::from_elem(FilterCount::default(), query.filters.len());
    let mut entities = Vec::new();
    let mut processed = 0;

    let scratch = Bump::new();
    let candidates = gather_candidates(world, query, &scratch);
    let mut bindings: AHashMap<usize, Option<FilterBindings>> = AHashMap::new();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        for &(arch_id, row, entity) in candidates.iter() {
            processed += 1;
            let slot = bindings
                .entry(arch_id)
                .or_insert_with(|| bind_filters(world, arch_id, query, &plan.filter_order));
            let Some(bound) = slot.as_ref() else {
                continue;
            };
            if filters_pass(world, arch_id, row, query, bound, &mut counts) {
                entities.push(entity);
            }
        }
    }));
    if let Err(payload) = outcome {
        return Err(QueryError::PredicatePanic(panic_message(payload)));
    }

    Ok(EntityOutput {
        entities,
        processed,
        filter_counts: counts,
    })
}

// ---------------------------------------------------------------------------
// Candidates, post-processing, streaming, refetch
// ---------------------------------------------------------------------------

/// Resolve spatial candidates to validated (archetype, row, entity) triples.
///
/// Region candidates are sorted by (archetype, row) for deterministic
/// ordering; knn candidates keep their ascending-distance order. Candidates
/// failing store re-validation indicate a missed index update and are
/// dropped with a warning.
fn gather_candidates<'b, Q>(
    world: &World,
    query: &Query<Q>,
    scratch: &'b Bump,
) -> bumpalo::collections::Vec<'b, (usize, usize, EntityId)> {
    let mut ids: Vec<EntityId> = Vec::new();
    let mut keep_order = false;

    if let Some((center, k)) = query.nearest {
        keep_order = true;
        // Residual filters may reject candidates, so over-fetch when any
        // are present; post-processing truncates back to k
        let want = if query.filters.is_empty() {
            k.max(1)
        } else {
            k.max(1).saturating_mul(4)
        };
        ids = world
            .spatial_query_nearest(center, want)
            .into_iter()
            .map(|(entity, _)| entity)
            .collect();
    } else if let Some(region) = &query.region {
        if world.spatial_tracked().is_none() {
            warn!("region query issued with no spatial tracking enabled");
        }
        world.spatial_query_region(region, &mut ids);
    }

    let mut candidates = bumpalo::collections::Vec::new_in(scratch);
    for entity in ids {
        let Some(location) = world.location(entity) else {
            warn!(?entity, "spatial index returned a dead entity; dropping");
            continue;
        };
        let archetype = world
            .archetype(location.archetype_id)
            .expect("location names a live archetype");
        if !query.required.is_subset_of(archetype.signature()) {
            // The entity exists but no longer carries the required set
            continue;
        }
        candidates.push((location.archetype_id, location.row, entity));
    }

    if !keep_order {
        candidates.sort_unstable_by_key(|&(arch, row, _)| (arch, row));
    }
    candidates
}

/// Sort key for an entity under a sort spec; missing components sort last.
fn sort_key<Q>(world: &World, query: &Query<Q>, entity: EntityId) -> f64 {
    let Some(sort) = &query.sort else {
        return 0.0;
    };
    world
        .location(entity)
        .and_then(|loc| {
            let archetype = world.archetype(loc.archetype_id)?;
            let column = archetype.column(sort.component())?;
            let ptr = column.get_raw(loc.row)?;
            // SAFETY: live value of the sort component
            Some(unsafe { sort.key_raw(ptr) })
        })
        .unwrap_or(f64::INFINITY)
}

fn nearest_distance<Q>(world: &World, query: &Query<Q>, entity: EntityId) -> f32 {
    let Some((center, _)) = query.nearest else {
        return 0.0;
    };
    world
        .tracked_position(entity)
        .map(|p| (p - center).length_squared())
        .unwrap_or(f32::INFINITY)
}

/// Post-processing shared by every path: nearest emulation (when the plan
/// did not run through the index), user sort, offset, then limit.
pub(crate) fn post_process<'w, Q: QueryData<'w>>(
    world: &'w World,
    query: &Query<Q>,
    strategy: ExecutionStrategy,
    rows: &mut Vec<(EntityId, Q::Item)>,
) {
    let via_index = matches!(
        strategy,
        ExecutionStrategy::Spatial | ExecutionStrategy::Hybrid
    );

    if let Some((_, k)) = query.nearest {
        if !via_index {
            // The scan paths return archetype order; impose distance order
            rows.sort_by(|a, b| {
                nearest_distance(world, query, a.0).total_cmp(&nearest_distance(
                    world, query, b.0,
                ))
            });
        }
        rows.truncate(k);
    }

    if let Some(sort) = &query.sort {
        let descending = sort.descending();
        let mut keyed: Vec<(f64, usize)> = rows
            .iter()
            .enumerate()
            .map(|(idx, (entity, _))| (sort_key(world, query, *entity), idx))
            .collect();
        if descending {
            keyed.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        } else {
            keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        }

        let mut taken: Vec<Option<(EntityId, Q::Item)>> = rows.drain(..).map(Some).collect();
        *rows = keyed
            .into_iter()
            .map(|(_, idx)| taken[idx].take().expect("each index moved once"))
            .collect();
    }

    if query.offset > 0 {
        let offset = query.offset.min(rows.len());
        rows.drain(..offset);
    }
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }
}

/// Entity-only variant of [`post_process`].
pub(crate) fn post_process_entities<Q>(
    world: &World,
    query: &Query<Q>,
    strategy: ExecutionStrategy,
    entities: &mut Vec<EntityId>,
) {
    let via_index = matches!(
        strategy,
        ExecutionStrategy::Spatial | ExecutionStrategy::Hybrid
    );

    if let Some((_, k)) = query.nearest {
        if !via_index {
            entities.sort_by(|a, b| {
                nearest_distance(world, query, *a)
                    .total_cmp(&nearest_distance(world, query, *b))
            });
        }
        entities.truncate(k);
    }

    if let Some(sort) = &query.sort {
        if sort.descending() {
            entities.sort_by(|a, b| {
                sort_key(world, query, *b).total_cmp(&sort_key(world, query, *a))
            });
        } else {
            entities.sort_by(|a, b| {
                sort_key(world, query, *a).total_cmp(&sort_key(world, query, *b))
            });
        }
    }

    if query.offset > 0 {
        let offset = query.offset.min(entities.len());
        entities.drain(..offset);
    }
    if let Some(limit) = query.limit {
        entities.truncate(limit);
    }
}

/// Streaming execution: apply the predicate pipeline and hand each
/// surviving tuple to the consumer without materializing a result vector.
/// Iterates matching archetypes only. Returns tuples emitted.
pub(crate) fn stream<'w, Q, F>(
    world: &'w World,
    query: &Query<Q>,
    plan: &QueryPlan,
    matched: &[usize],
    mut consumer: F,
) -> Result<usize>
where
    Q: QueryData<'w>,
    F: FnMut(EntityId, Q::Item),
{
    warn_if_region_untracked(world, query);
    let mut counts: FilterCounts =
        SmallVec::from_elem(FilterCount::default(), query.filters.len());
    let mut emitted = 0usize;

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        for &arch_id in matched {
            let Some(bindings) = bind_filters(world, arch_id, query, &plan.filter_order) else {
                continue;
            };
            let archetype = world.archetype(arch_id).expect("bound archetype");
            let Some(state) = Q::prepare(archetype) else {
                continue;
            };
            for (row, &entity) in archetype.entities().iter().enumerate() {
                if row_survives(world, arch_id, row, entity, query, &bindings, &mut counts) {
                    // SAFETY: live row of the prepared archetype
                    if let Some(item) = unsafe { Q::fetch(&state, row) } {
                        consumer(entity, item);
                        emitted += 1;
                    }
                }
            }
        }
    }));
    if let Err(payload) = outcome {
        return Err(QueryError::PredicatePanic(panic_message(payload)));
    }
    Ok(emitted)
}

/// Run a query against a caller-supplied entity list instead of the full
/// archetype scan. Dead handles and entities missing the required set are
/// skipped; surviving rows keep the input order.
pub(crate) fn execute_for_entities<'w, Q: QueryData<'w>>(
    world: &'w World,
    entities: &[EntityId],
    query: &Query<Q>,
    plan: &QueryPlan,
) -> Result<ExecOutput<'w, Q>> {
    let mut counts: FilterCounts =
        SmallVec::from_elem(FilterCount::default(), query.filters.len());
    let mut rows = Vec::with_capacity(entities.len());
    let mut processed = 0;

    let mut states: AHashMap<usize, Option<(Q::State, FilterBindings)>> = AHashMap::new();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        for &entity in entities {
            processed += 1;
            let Some(location) = world.location(entity) else {
                continue;
            };
            let archetype = world
                .archetype(location.archetype_id)
                .expect("location names a live archetype");
            if !query.required.is_subset_of(archetype.signature()) {
                continue;
            }

            let slot = states.entry(location.archetype_id).or_insert_with(|| {
                let bindings =
                    bind_filters(world, location.archetype_id, query, &plan.filter_order)?;
                let state = Q::prepare(archetype)?;
                Some((state, bindings))
            });
            let Some((state, bindings)) = slot.as_ref() else {
                continue;
            };

            if row_survives(
                world,
                location.archetype_id,
                location.row,
                entity,
                query,
                bindings,
                &mut counts,
            ) {
                // SAFETY: the location names a live row
                if let Some(item) = unsafe { Q::fetch(state, location.row) } {
                    rows.push((entity, item));
                }
            }
        }
    }));
    if let Err(payload) = outcome {
        return Err(QueryError::PredicatePanic(panic_message(payload)));
    }

    Ok(ExecOutput {
        rows,
        processed,
        filter_counts: counts,
    })
}

/// Rebuild result rows for a cache hit: owned entity ids are re-validated
/// against the live world and column references fetched fresh. Any failure
/// means the cached membership no longer reflects the store; the caller
/// treats that as a miss.
pub(crate) fn refetch<'w, Q: QueryData<'w>>(
    world: &'w World,
    entities: &[EntityId],
    query: &Query<Q>,
) -> Option<Vec<(EntityId, Q::Item)>> {
    let mut states: AHashMap<usize, Option<Q::State>> = AHashMap::new();
    let mut rows = Vec::with_capacity(entities.len());

    for &entity in entities {
        let location = world.location(entity)?;
        let archetype = world.archetype(location.archetype_id)?;
        if !query.required.is_subset_of(archetype.signature()) {
            return None;
        }
        let state = states
            .entry(location.archetype_id)
            .or_insert_with(|| Q::prepare(archetype));
        let state = state.as_ref()?;
        // SAFETY: the location names a live row
        let item = unsafe { Q::fetch(state, location.row) }?;
        rows.push((entity, item));
    }
    Some(rows)
}
