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

//! Convenience re-exports for typical use.

pub use crate::engine::{QueryConfig, QueryEngine, SharedWorld};
pub use crate::entity::EntityId;
pub use crate::error::{QueryError, Result};
pub use crate::query::{
    ComponentFilter, Query, QueryBuilder, QueryRows, SelectivityKind, SortSpec,
};
pub use crate::spatial::{Region, SpatialComponent};
pub use crate::world::World;
pub use glam::Vec3;
