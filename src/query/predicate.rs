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

//! Value predicates over single components.
//!
//! Filters are type-erased at construction: the closure receives a raw
//! pointer into the component's column slot and casts back to `&T`
//! internally. That keeps the executor monomorphization-free while the
//! builder API stays fully typed. A query's conjunction is a list of these,
//! ordered by the planner.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::component::{component_id, Component, ComponentId};

/// Predicate class used for selectivity defaults when no execution history
/// exists yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectivityKind {
    MatchAll,
    Equality,
    Range,
    Spatial,
    Custom,
}

impl SelectivityKind {
    /// Expected fraction of rows surviving the predicate, absent history.
    pub fn default_selectivity(self) -> f32 {
        match self {
            SelectivityKind::MatchAll => 1.0,
            SelectivityKind::Equality => 0.1,
            SelectivityKind::Range => 0.3,
            SelectivityKind::Spatial => 0.2,
            SelectivityKind::Custom => 0.5,
        }
    }
}

/// A value test against one component type.
pub struct ComponentFilter {
    component: ComponentId,
    test: Arc<dyn Fn(*const u8) -> bool + Send + Sync>,
    description: Arc<str>,
    kind: SelectivityKind,
    cost: f32,
}

impl Clone for ComponentFilter {
    fn clone(&self) -> Self {
        Self {
            component: self.component,
            test: Arc::clone(&self.test),
            description: Arc::clone(&self.description),
            kind: self.kind,
            cost: self.cost,
        }
    }
}

impl std::fmt::Debug for ComponentFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentFilter")
            .field("component", &self.component)
            .field("description", &self.description)
            .field("kind", &self.kind)
            .field("cost", &self.cost)
            .finish()
    }
}

impl ComponentFilter {
    /// Build a filter over component `T`.
    ///
    /// The description is the filter's identity: two filters with equal
    /// descriptions share a fingerprint and selectivity history, so it
    /// should name the condition, not the call site.
    pub fn new<T: Component>(
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
        description: impl Into<Arc<str>>,
        kind: SelectivityKind,
    ) -> Self {
        Self {
            component: component_id::<T>(),
            // SAFETY: matches_raw is only called with pointers into columns
            // of this component id, which store T values
            test: Arc::new(move |ptr: *const u8| predicate(unsafe { &*(ptr as *const T) })),
            description: description.into(),
            kind,
            cost: 1.0,
        }
    }

    /// Record a measured per-row cost (relative units; 1.0 is the default)
    /// so the planner can order this filter against its peers.
    pub fn with_cost(mut self, cost: f32) -> Self {
        self.cost = cost.max(f32::EPSILON);
        self
    }

    pub fn component(&self) -> ComponentId {
        self.component
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> SelectivityKind {
        self.kind
    }

    pub fn cost(&self) -> f32 {
        self.cost
    }

    /// Stable identity used to key selectivity history.
    pub(crate) fn identity_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.description.hash(&mut hasher);
        self.component.hash(&mut hasher);
        hasher.finish()
    }

    /// Evaluate against a raw column slot.
    ///
    /// # Safety
    /// `ptr` must point at a live value of this filter's component type.
    #[inline]
    pub(crate) unsafe fn matches_raw(&self, ptr: *const u8) -> bool {
        (self.test)(ptr)
    }

    /// Logical negation; the identity string is rewritten accordingly.
    pub fn negate(self) -> Self {
        let test = Arc::clone(&self.test);
        Self {
            component: self.component,
            test: Arc::new(move |ptr| !(test)(ptr)),
            description: format!("not({})", self.description).into(),
            kind: SelectivityKind::Custom,
            cost: self.cost,
        }
    }

    /// Disjunction with another filter over the same component.
    ///
    /// # Panics
    /// Panics when the filters test different component types; a disjunction
    /// across components has no single column to bind to.
    pub fn or(self, other: ComponentFilter) -> Self {
        assert_eq!(
            self.component, other.component,
            "or() requires filters over the same component"
        );
        let left = Arc::clone(&self.test);
        let right = Arc::clone(&other.test);
        Self {
            component: self.component,
            test: Arc::new(move |ptr| (left)(ptr) || (right)(ptr)),
            description: format!("({} or {})", self.description, other.description).into(),
            kind: SelectivityKind::Custom,
            cost: self.cost + other.cost,
        }
    }
}

/// Total-order sort over one component's extracted key.
pub struct SortSpec {
    component: ComponentId,
    key: Arc<dyn Fn(*const u8) -> f64 + Send + Sync>,
    descending: bool,
    description: Arc<str>,
}

impl Clone for SortSpec {
    fn clone(&self) -> Self {
        Self {
            component: self.component,
            key: Arc::clone(&self.key),
            descending: self.descending,
            description: Arc::clone(&self.description),
        }
    }
}

impl std::fmt::Debug for SortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortSpec")
            .field("component", &self.component)
            .field("descending", &self.descending)
            .field("description", &self.description)
            .finish()
    }
}

impl SortSpec {
    pub fn new<T: Component>(
        key: impl Fn(&T) -> f64 + Send + Sync + 'static,
        description: impl Into<Arc<str>>,
        descending: bool,
    ) -> Self {
        Self {
            component: component_id::<T>(),
            // SAFETY: key_raw is only called with pointers into columns of
            // this component id
            key: Arc::new(move |ptr: *const u8| key(unsafe { &*(ptr as *const T) })),
            descending,
            description: description.into(),
        }
    }

    pub fn component(&self) -> ComponentId {
        self.component
    }

    pub fn descending(&self) -> bool {
        self.descending
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// # Safety
    /// `ptr` must point at a live value of this spec's component type.
    #[inline]
    pub(crate) unsafe fn key_raw(&self, ptr: *const u8) -> f64 {
        (self.key)(ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Health {
        current: f32,
    }

    #[test]
    fn test_filter_evaluates_typed_value() {
        let filter = ComponentFilter::new::<Health>(
            |h| h.current > 50.0,
            "health > 50",
            SelectivityKind::Range,
        );

        let alive = Health { current: 80.0 };
        let dead = Health { current: 10.0 };
        unsafe {
            assert!(filter.matches_raw(&alive as *const Health as *const u8));
            assert!(!filter.matches_raw(&dead as *const Health as *const u8));
        }
    }

    #[test]
    fn test_negate_and_or() {
        let low = ComponentFilter::new::<Health>(
            |h| h.current < 20.0,
            "health < 20",
            SelectivityKind::Range,
        );
        let high = ComponentFilter::new::<Health>(
            |h| h.current > 80.0,
            "health > 80",
            SelectivityKind::Range,
        );

        let extreme = low.clone().or(high);
        let mid = extreme.clone().negate();

        let sample = Health { current: 50.0 };
        let ptr = &sample as *const Health as *const u8;
        unsafe {
            assert!(!extreme.matches_raw(ptr));
            assert!(mid.matches_raw(ptr));
        }
    }

    #[test]
    fn test_identity_hash_tracks_description() {
        let a = ComponentFilter::new::<Health>(|_| true, "same", SelectivityKind::Custom);
        let b = ComponentFilter::new::<Health>(|_| false, "same", SelectivityKind::Custom);
        let c = ComponentFilter::new::<Health>(|_| true, "different", SelectivityKind::Custom);

        assert_eq!(a.identity_hash(), b.identity_hash());
        assert_ne!(a.identity_hash(), c.identity_hash());
    }

    #[test]
    fn test_sort_spec_key() {
        let sort = SortSpec::new::<Health>(|h| h.current as f64, "by health", true);
        let sample = Health { current: 42.0 };
        let key = unsafe { sort.key_raw(&sample as *const Health as *const u8) };
        assert_eq!(key, 42.0);
        assert!(sort.descending());
    }
}
