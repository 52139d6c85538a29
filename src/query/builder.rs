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

//! Fluent query construction.
//!
//! Combinator semantics: `filter*` calls conjunct; `sort_by` replaces any
//! prior sort; `limit` and `offset` replace prior values; spatial filters
//! compose with other predicates by intersection and set the spatial hint.
//! Terminal methods execute against a world through the engine that minted
//! the builder.

use glam::Vec3;

use crate::component::Component;
use crate::engine::QueryEngine;
use crate::entity::EntityId;
use crate::error::Result;
use crate::query::predicate::{ComponentFilter, SelectivityKind, SortSpec};
use crate::query::{ComponentSet, Query, QueryData, QueryRows};
use crate::spatial::{Aabb, Region};
use crate::world::World;

/// Typed, chainable query construction over component tuple `Q`.
pub struct QueryBuilder<'e, Q> {
    engine: &'e QueryEngine,
    query: Query<Q>,
}

impl<'e, Q: ComponentSet> QueryBuilder<'e, Q> {
    pub(crate) fn new(engine: &'e QueryEngine) -> Self {
        Self {
            engine,
            query: Query::new(),
        }
    }

    // ----- predicates --------------------------------------------------

    /// Add a pre-built filter. Multiple filters conjunct.
    pub fn filter(mut self, filter: ComponentFilter) -> Self {
        self.query.filters.push(filter);
        self
    }

    /// Filter on one component's value. The description is the predicate's
    /// identity for caching and selectivity history.
    pub fn filter_component<T: Component>(
        self,
        description: impl Into<std::sync::Arc<str>>,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter(ComponentFilter::new::<T>(
            predicate,
            description,
            SelectivityKind::Custom,
        ))
    }

    /// Keep rows whose extracted key lies in `[min, max]`.
    pub fn filter_range<T: Component>(
        self,
        description: impl Into<std::sync::Arc<str>>,
        key: impl Fn(&T) -> f64 + Send + Sync + 'static,
        min: f64,
        max: f64,
    ) -> Self {
        self.filter(ComponentFilter::new::<T>(
            move |component| {
                let value = key(component);
                value >= min && value <= max
            },
            description,
            SelectivityKind::Range,
        ))
    }

    /// Keep rows whose extracted key equals `target`.
    pub fn filter_eq<T: Component, V>(
        self,
        description: impl Into<std::sync::Arc<str>>,
        key: impl Fn(&T) -> V + Send + Sync + 'static,
        target: V,
    ) -> Self
    where
        V: PartialEq + Send + Sync + 'static,
    {
        self.filter(ComponentFilter::new::<T>(
            move |component| key(component) == target,
            description,
            SelectivityKind::Equality,
        ))
    }

    // ----- spatial -----------------------------------------------------

    /// Restrict to entities whose tracked position lies in `region`.
    /// Composes with other predicates by intersection.
    pub fn within_region(mut self, region: Region) -> Self {
        self.query.region = Some(match self.query.region.take() {
            // Two regions intersect; keep both via a custom conjunction
            Some(existing) => {
                let mut bounds = existing.bounding_box();
                let other = region.bounding_box();
                bounds.min = bounds.min.max(other.min);
                bounds.max = bounds.max.min(other.max);
                Region::custom(bounds, move |p| existing.contains(p) && region.contains(p))
            }
            None => region,
        });
        self
    }

    /// Restrict to entities within `radius` of `center`.
    pub fn within_radius(self, center: Vec3, radius: f32) -> Self {
        self.within_region(Region::sphere(center, radius))
    }

    /// Restrict to entities inside the axis-aligned box.
    pub fn within_box(self, min: Vec3, max: Vec3) -> Self {
        self.within_region(Region::Aabb(Aabb::new(min, max)))
    }

    /// The `k` entities nearest to `center`, ascending by distance.
    pub fn nearest_to(mut self, center: Vec3, k: usize) -> Self {
        self.query.nearest = Some((center, k));
        self
    }

    // ----- shape -------------------------------------------------------

    /// Sort by one component's extracted key. Replaces any prior sort.
    pub fn sort_by<T: Component>(
        mut self,
        description: impl Into<std::sync::Arc<str>>,
        key: impl Fn(&T) -> f64 + Send + Sync + 'static,
        descending: bool,
    ) -> Self {
        self.query.sort = Some(SortSpec::new::<T>(key, description, descending));
        self
    }

    /// Keep at most `count` rows. Replaces any prior limit.
    pub fn limit(mut self, count: usize) -> Self {
        self.query.limit = Some(count);
        self
    }

    /// Skip the first `count` rows. Replaces any prior offset.
    pub fn offset(mut self, count: usize) -> Self {
        self.query.offset = count;
        self
    }

    /// Allow or forbid the parallel path for this query.
    pub fn parallel(mut self, enable: bool) -> Self {
        self.query.allow_parallel = enable;
        self
    }

    /// Opt this query out of (or back into) the result cache.
    pub fn cached(mut self, enable: bool) -> Self {
        self.query.use_cache = enable;
        self
    }

    /// Override the cache TTL for this query's results.
    pub fn ttl(mut self, ttl: std::time::Duration) -> Self {
        self.query.ttl = Some(ttl);
        self
    }

    /// Name for diagnostics output.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.query.name = Some(name.into());
        self
    }

    /// Finish building without executing; the compiled query is reusable.
    pub fn build(self) -> Query<Q> {
        self.query
    }

    // ----- terminals ---------------------------------------------------

    /// Execute, returning typed rows.
    pub fn execute<'w>(self, world: &'w World) -> Result<QueryRows<'w, Q>>
    where
        Q: QueryData<'w>,
        Q::Item: Send,
    {
        self.engine.execute(world, &self.query)
    }

    /// Stream each surviving tuple to `consumer` without materializing.
    pub fn stream<'w, F>(self, world: &'w World, consumer: F) -> Result<usize>
    where
        Q: QueryData<'w>,
        F: FnMut(EntityId, Q::Item),
    {
        self.engine.for_each(world, &self.query, consumer)
    }

    /// Count matches. When the query is bare (no predicate, region, limit
    /// or offset), this is the sum of matching archetype lengths and never
    /// touches rows.
    pub fn count(self, world: &World) -> Result<usize> {
        let bare = self.query.filters.is_empty()
            && self.query.region.is_none()
            && self.query.nearest.is_none()
            && self.query.limit.is_none()
            && self.query.offset == 0;
        if bare {
            return Ok(world.matching_entity_count(&self.query.required));
        }
        let (entities, _) = self.engine.execute_entities(world, &self.query)?;
        Ok(entities.len())
    }

    /// Whether any entity matches.
    pub fn any(mut self, world: &World) -> Result<bool> {
        self.query.limit = Some(1);
        self.query.use_cache = false;
        let (entities, _) = self.engine.execute_entities(world, &self.query)?;
        Ok(!entities.is_empty())
    }

    /// The first matching row, if any.
    pub fn first<'w>(mut self, world: &'w World) -> Result<Option<(EntityId, Q::Item)>>
    where
        Q: QueryData<'w>,
        Q::Item: Send,
    {
        self.query.limit = Some(1);
        let rows = self.engine.execute(world, &self.query)?;
        Ok(rows.into_rows().into_iter().next())
    }

    // ----- aggregation -------------------------------------------------

    /// Fold an extracted value over every matching row.
    pub fn fold<T, A>(
        self,
        world: &World,
        init: A,
        extract: impl Fn(&T) -> f64 + Send + Sync + 'static,
        mut combine: impl FnMut(A, f64) -> A,
    ) -> Result<A>
    where
        T: Component,
    {
        let (entities, _) = self.engine.execute_entities(world, &self.query)?;
        let mut acc = init;
        for entity in entities {
            if let Some(component) = world.get_component::<T>(entity) {
                acc = combine(acc, extract(component));
            }
        }
        Ok(acc)
    }

    /// Sum of the extracted value over matches.
    pub fn sum<T: Component>(
        self,
        world: &World,
        extract: impl Fn(&T) -> f64 + Send + Sync + 'static,
    ) -> Result<f64> {
        self.fold(world, 0.0, extract, |acc, value| acc + value)
    }

    /// Mean of the extracted value, None when nothing matches.
    pub fn avg<T: Component>(
        self,
        world: &World,
        extract: impl Fn(&T) -> f64 + Send + Sync + 'static,
    ) -> Result<Option<f64>> {
        let (total, count) = self.fold(world, (0.0, 0usize), extract, |(sum, n), value| {
            (sum + value, n + 1)
        })?;
        Ok((count > 0).then(|| total / count as f64))
    }

    /// Minimum of the extracted value, None when nothing matches.
    pub fn min_by<T: Component>(
        self,
        world: &World,
        extract: impl Fn(&T) -> f64 + Send + Sync + 'static,
    ) -> Result<Option<f64>> {
        self.fold(world, None, extract, |best: Option<f64>, value| {
            Some(best.map_or(value, |b| b.min(value)))
        })
    }

    /// Maximum of the extracted value, None when nothing matches.
    pub fn max_by<T: Component>(
        self,
        world: &World,
        extract: impl Fn(&T) -> f64 + Send + Sync + 'static,
    ) -> Result<Option<f64>> {
        self.fold(world, None, extract, |best: Option<f64>, value| {
            Some(best.map_or(value, |b| b.max(value)))
        })
    }
}
