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

//! Query values, fingerprints and typed column access.
//!
//! [`ComponentSet`] names the component tuple a query reads; [`QueryData`]
//! binds column pointers per archetype and fetches one row at a time. A
//! [`Query`] is the compiled, reusable description of a query shape; its
//! [`QueryFingerprint`] is the cache key, equal for equal shapes no matter
//! which call site built them.

pub mod builder;
pub mod executor;
pub mod plan;
pub mod predicate;

pub use builder::QueryBuilder;
pub use plan::{ExecutionStrategy, QueryPlan, QueryPlanner};
pub use predicate::{ComponentFilter, SelectivityKind, SortSpec};

use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::time::Duration;

use glam::Vec3;
use rustc_hash::FxHasher;

use crate::archetype::{Archetype, ComponentColumn};
use crate::component::{component_id, Component};
use crate::entity::EntityId;
use crate::signature::Signature;
use crate::spatial::Region;

/// Lifetime-free view of a query's component tuple: which types it needs.
pub trait ComponentSet {
    /// Signature of every component the tuple reads.
    fn required_signature() -> Signature;
}

/// Typed column access for one archetype.
///
/// `prepare` resolves the column pointers once per archetype; `fetch` reads
/// one row through them. Mirrors how the store lays data out: resolving
/// columns is the per-archetype cost, rows are pointer arithmetic.
///
/// # Safety
/// Implementations must only return a `State` whose `fetch` is sound for
/// every row below the archetype's length at `prepare` time.
pub unsafe trait QueryData<'w>: ComponentSet {
    /// The tuple of references yielded per row
    type Item;
    /// Bound column pointers
    type State;

    fn prepare(archetype: &'w Archetype) -> Option<Self::State>;

    /// Fetch one row.
    ///
    /// # Safety
    /// `row` must be a live row of the archetype passed to `prepare`.
    unsafe fn fetch(state: &Self::State, row: usize) -> Option<Self::Item>;
}

impl<'q, T: Component> ComponentSet for &'q T {
    fn required_signature() -> Signature {
        Signature::from_ids(&[component_id::<T>()])
    }
}

unsafe impl<'w, T: Component> QueryData<'w> for &'w T {
    type Item = &'w T;
    type State = &'w ComponentColumn;

    fn prepare(archetype: &'w Archetype) -> Option<Self::State> {
        archetype.column(component_id::<T>())
    }

    unsafe fn fetch(state: &Self::State, row: usize) -> Option<Self::Item> {
        state.get::<T>(row)
    }
}

macro_rules! impl_component_set {
    ($($T:ident),*) => {
        impl<$($T: ComponentSet),*> ComponentSet for ($($T,)*) {
            fn required_signature() -> Signature {
                let mut sig = Signature::new();
                $(sig = sig.union(&$T::required_signature());)*
                sig
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);
impl_component_set!(A, B, C, D, E);
impl_component_set!(A, B, C, D, E, F);
impl_component_set!(A, B, C, D, E, F, G);
impl_component_set!(A, B, C, D, E, F, G, H);

macro_rules! impl_query_data {
    ($(($T:ident, $idx:tt)),*) => {
        unsafe impl<'w, $($T: QueryData<'w>),*> QueryData<'w> for ($($T,)*) {
            type Item = ($($T::Item,)*);
            type State = ($($T::State,)*);

            fn prepare(archetype: &'w Archetype) -> Option<Self::State> {
                Some(($($T::prepare(archetype)?,)*))
            }

            unsafe fn fetch(state: &Self::State, row: usize) -> Option<Self::Item> {
                Some(($($T::fetch(&state.$idx, row)?,)*))
            }
        }
    };
}

impl_query_data!((A, 0));
impl_query_data!((A, 0), (B, 1));
impl_query_data!((A, 0), (B, 1), (C, 2));
impl_query_data!((A, 0), (B, 1), (C, 2), (D, 3));

/// Intent bits recorded in the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct QueryFlags(u8);

impl QueryFlags {
    pub const SPATIAL: QueryFlags = QueryFlags(1);
    pub const PARALLEL: QueryFlags = QueryFlags(1 << 1);
    pub const CACHED: QueryFlags = QueryFlags(1 << 2);

    pub fn contains(self, other: QueryFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: QueryFlags) {
        self.0 |= other.0;
    }
}

/// Identity of a query shape: required components, predicate identity,
/// intent flags. The cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryFingerprint {
    pub required: Signature,
    pub predicate_hash: u64,
    pub flags: QueryFlags,
}

impl QueryFingerprint {
    /// Stable 64-bit digest for bloom probing.
    pub fn hash64(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Compiled, reusable query description over component tuple `Q`.
///
/// Built by [`QueryBuilder`]; executed by the engine. Holds no world
/// borrows, so it can outlive any particular execution.
pub struct Query<Q> {
    pub(crate) required: Signature,
    pub(crate) filters: Vec<ComponentFilter>,
    pub(crate) sort: Option<SortSpec>,
    pub(crate) offset: usize,
    pub(crate) limit: Option<usize>,
    pub(crate) region: Option<Region>,
    pub(crate) nearest: Option<(Vec3, usize)>,
    pub(crate) use_cache: bool,
    pub(crate) allow_parallel: bool,
    pub(crate) ttl: Option<Duration>,
    pub(crate) name: Option<String>,
    pub(crate) _marker: PhantomData<fn() -> Q>,
}

impl<Q: ComponentSet> Default for Query<Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q: ComponentSet> Query<Q> {
    pub fn new() -> Self {
        Self {
            required: Q::required_signature(),
            filters: Vec::new(),
            sort: None,
            offset: 0,
            limit: None,
            region: None,
            nearest: None,
            use_cache: true,
            allow_parallel: true,
            ttl: None,
            name: None,
            _marker: PhantomData,
        }
    }
}

impl<Q> Clone for Query<Q> {
    fn clone(&self) -> Self {
        Self {
            required: self.required,
            filters: self.filters.clone(),
            sort: self.sort.clone(),
            offset: self.offset,
            limit: self.limit,
            region: self.region.clone(),
            nearest: self.nearest,
            use_cache: self.use_cache,
            allow_parallel: self.allow_parallel,
            ttl: self.ttl,
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<Q> Query<Q> {
    pub fn is_spatial(&self) -> bool {
        self.region.is_some() || self.nearest.is_some()
    }

    /// Compute the fingerprint. Two queries with the same component tuple,
    /// equal filter identities and equal shape parameters fingerprint equal,
    /// regardless of where they were built.
    pub fn fingerprint(&self) -> QueryFingerprint {
        let mut hasher = FxHasher::default();
        for filter in &self.filters {
            filter.description().hash(&mut hasher);
        }
        if let Some(sort) = &self.sort {
            sort.description().hash(&mut hasher);
            sort.descending().hash(&mut hasher);
        }
        self.offset.hash(&mut hasher);
        self.limit.hash(&mut hasher);
        match &self.region {
            None => 0u8.hash(&mut hasher),
            Some(Region::Aabb(aabb)) => {
                1u8.hash(&mut hasher);
                hash_vec3(&mut hasher, aabb.min);
                hash_vec3(&mut hasher, aabb.max);
            }
            Some(Region::Sphere(sphere)) => {
                2u8.hash(&mut hasher);
                hash_vec3(&mut hasher, sphere.center);
                sphere.radius.to_bits().hash(&mut hasher);
            }
            Some(Region::Cylinder {
                center,
                radius,
                half_height,
            }) => {
                3u8.hash(&mut hasher);
                hash_vec3(&mut hasher, *center);
                radius.to_bits().hash(&mut hasher);
                half_height.to_bits().hash(&mut hasher);
            }
            Some(Region::Custom { bounds, predicate }) => {
                4u8.hash(&mut hasher);
                hash_vec3(&mut hasher, bounds.min);
                hash_vec3(&mut hasher, bounds.max);
                // Closure identity: the allocation address is the best
                // stable identity an opaque predicate has
                (std::sync::Arc::as_ptr(predicate) as *const () as usize).hash(&mut hasher);
            }
        }
        if let Some((center, k)) = self.nearest {
            hash_vec3(&mut hasher, center);
            k.hash(&mut hasher);
        }

        let mut flags = QueryFlags::default();
        if self.is_spatial() {
            flags.insert(QueryFlags::SPATIAL);
        }
        if self.allow_parallel {
            flags.insert(QueryFlags::PARALLEL);
        }
        if self.use_cache {
            flags.insert(QueryFlags::CACHED);
        }

        QueryFingerprint {
            required: self.required,
            predicate_hash: hasher.finish(),
            flags,
        }
    }
}

fn hash_vec3<H: Hasher>(hasher: &mut H, v: Vec3) {
    v.x.to_bits().hash(hasher);
    v.y.to_bits().hash(hasher);
    v.z.to_bits().hash(hasher);
}

/// Per-execution statistics carried on the result.
#[derive(Debug, Clone, Copy)]
pub struct QueryStats {
    pub execution_time: Duration,
    pub entities_processed: usize,
    pub entities_matched: usize,
    pub strategy: ExecutionStrategy,
    pub cache_hit: bool,
}

impl Default for QueryStats {
    fn default() -> Self {
        Self {
            execution_time: Duration::ZERO,
            entities_processed: 0,
            entities_matched: 0,
            strategy: ExecutionStrategy::Sequential,
            cache_hit: false,
        }
    }
}

impl QueryStats {
    pub fn match_ratio(&self) -> f64 {
        if self.entities_processed == 0 {
            0.0
        } else {
            self.entities_matched as f64 / self.entities_processed as f64
        }
    }
}

/// Ordered query result: `(entity, component refs…)` tuples valid until the
/// next structural mutation of the world the borrow rules already prevent.
#[derive(Debug)]
pub struct QueryRows<'w, Q: QueryData<'w>> {
    pub(crate) rows: Vec<(EntityId, Q::Item)>,
    pub(crate) stats: QueryStats,
    pub(crate) fingerprint: QueryFingerprint,
    pub(crate) version: u64,
}

impl<'w, Q: QueryData<'w>> QueryRows<'w, Q> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&(EntityId, Q::Item)> {
        self.rows.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (EntityId, Q::Item)> {
        self.rows.iter()
    }

    pub fn entities(&self) -> impl Iterator<Item = EntityId> + use<'_, 'w, Q> {
        self.rows.iter().map(|(entity, _)| *entity)
    }

    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }

    /// Test hook: whether this result was served from the cache.
    pub fn is_cached(&self) -> bool {
        self.stats.cache_hit
    }

    pub fn fingerprint(&self) -> QueryFingerprint {
        self.fingerprint
    }

    /// World version this result was produced at.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn into_rows(self) -> Vec<(EntityId, Q::Item)> {
        self.rows
    }
}

impl<'w, Q: QueryData<'w>> IntoIterator for QueryRows<'w, Q> {
    type Item = (EntityId, Q::Item);
    type IntoIter = std::vec::IntoIter<(EntityId, Q::Item)>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a, 'w, Q: QueryData<'w>> IntoIterator for &'a QueryRows<'w, Q> {
    type Item = &'a (EntityId, Q::Item);
    type IntoIter = std::slice::Iter<'a, (EntityId, Q::Item)>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
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
    fn test_required_signature_union() {
        let sig = <(&Pos, &Vel)>::required_signature();
        assert!(sig.contains(component_id::<Pos>()));
        assert!(sig.contains(component_id::<Vel>()));
        assert_eq!(sig.len(), 2);
    }

    #[test]
    fn test_fingerprint_stable_across_call_sites() {
        fn build_a() -> Query<(&'static Pos, &'static Vel)> {
            let mut q = Query::new();
            q.filters.push(ComponentFilter::new::<Vel>(
                |v| v.x > 2.0,
                "vel.x > 2",
                SelectivityKind::Range,
            ));
            q.limit = Some(5);
            q
        }

        fn build_b() -> Query<(&'static Pos, &'static Vel)> {
            let mut q = Query::new();
            q.filters.push(ComponentFilter::new::<Vel>(
                |v| v.x > 2.0,
                "vel.x > 2",
                SelectivityKind::Range,
            ));
            q.limit = Some(5);
            q
        }

        assert_eq!(build_a().fingerprint(), build_b().fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_shapes() {
        let base: Query<(&Pos,)> = Query::new();
        let mut limited = base.clone();
        limited.limit = Some(10);
        assert_ne!(base.fingerprint(), limited.fingerprint());

        let mut spatial = base.clone();
        spatial.region = Some(Region::sphere(Vec3::ZERO, 1.0));
        assert_ne!(base.fingerprint(), spatial.fingerprint());
        assert!(spatial.fingerprint().flags.contains(QueryFlags::SPATIAL));
    }

    #[test]
    fn test_query_data_prepare_fetch() {
        use crate::archetype::Archetype;

        let mut arch = Archetype::new(<(&Pos, &Vel)>::required_signature());
        arch.register_column::<Pos>();
        arch.register_column::<Vel>();

        let mut slots = slotmap::SlotMap::<EntityId, ()>::with_key();
        for i in 0..3 {
            let e = slots.insert(());
            let row = arch.allocate_row(e);
            unsafe {
                let p = arch
                    .column_mut(component_id::<Pos>())
                    .unwrap()
                    .get_raw(row)
                    .unwrap();
                std::ptr::write(p as *mut Pos, Pos { x: i as f32 });
                let v = arch
                    .column_mut(component_id::<Vel>())
                    .unwrap()
                    .get_raw(row)
                    .unwrap();
                std::ptr::write(v as *mut Vel, Vel { x: 10.0 * i as f32 });
            }
        }

        let state = <(&Pos, &Vel)>::prepare(&arch).unwrap();
        let (pos, vel) = unsafe { <(&Pos, &Vel)>::fetch(&state, 2) }.unwrap();
        assert_eq!(pos, &Pos { x: 2.0 });
        assert_eq!(vel, &Vel { x: 20.0 });
        assert!(unsafe { <(&Pos, &Vel)>::fetch(&state, 3) }.is_none());
    }
}
