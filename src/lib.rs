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

//! Archetype Query - low-latency query engine for archetype-based entity
//! storage.
//!
//! Entities are partitioned by component signature into archetypes with
//! column-wise storage; the engine answers "all entities with components
//! T₁…Tₙ whose values satisfy P" with optional ordering, limits,
//! aggregation and spatial restriction, memoizing results behind a
//! bloom-gated LRU cache keyed by query fingerprint and world version.

pub mod archetype;
pub mod cache;
pub mod component;
pub mod engine;
pub mod entity;
pub mod error;
pub mod hotpath;
pub mod prelude;
pub mod query;
pub mod signature;
pub mod spatial;
pub mod world;

// Re-exports for convenience
pub use archetype::Archetype;
pub use component::{Bundle, Component, ComponentId};
pub use engine::{PerformanceMetrics, QueryConfig, QueryEngine, SharedWorld};
pub use entity::EntityId;
pub use error::{QueryError, Result};
pub use query::{
    ComponentFilter, ComponentSet, ExecutionStrategy, Query, QueryBuilder, QueryData,
    QueryFingerprint, QueryRows, QueryStats, SelectivityKind, SortSpec,
};
pub use signature::Signature;
pub use spatial::{Aabb, Region, RTree, SpatialComponent, SpatialHashGrid, SpatialIndex, Sphere};
pub use world::World;
