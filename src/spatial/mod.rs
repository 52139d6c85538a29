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

//! Spatial regions and index implementations.
//!
//! The archetype store is the ground truth; these indices accelerate region
//! and k-nearest queries over entities carrying a position-bearing component
//! and are kept consistent by the world's mutation paths.

mod grid;
mod rtree;

pub use grid::SpatialHashGrid;
pub use rtree::RTree;

use std::sync::Arc;

use glam::Vec3;

use crate::component::Component;
use crate::entity::EntityId;

/// Maps a component type to the point the spatial index tracks.
pub trait SpatialComponent: Component {
    fn position(&self) -> Vec3;
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Degenerate box covering a single point
    pub fn point(p: Vec3) -> Self {
        Self { min: p, max: p }
    }

    /// Inverted box that any expand() call snaps to its argument
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    #[inline]
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        !(other.min.x > self.max.x
            || other.max.x < self.min.x
            || other.min.y > self.max.y
            || other.max.y < self.min.y
            || other.min.z > self.max.z
            || other.max.z < self.min.z)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Sum of the three extents. Used as the enlargement metric during
    /// R-tree descent; unlike volume it stays meaningful for the degenerate
    /// boxes point data produces.
    pub fn margin(&self) -> f32 {
        let size = self.max - self.min;
        if size.x < 0.0 {
            return 0.0;
        }
        size.x + size.y + size.z
    }

    pub fn expand_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn expand(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Squared distance from `p` to the closest point of the box, 0 inside.
    /// Infinite for the inverted empty box.
    #[inline]
    pub fn distance_squared(&self, p: Vec3) -> f32 {
        let clamped = p.min(self.max).max(self.min);
        (p - clamped).length_squared()
    }
}

/// Sphere region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

impl Sphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    #[inline]
    pub fn contains(&self, p: Vec3) -> bool {
        (p - self.center).length_squared() <= self.radius * self.radius
    }

    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        aabb.distance_squared(self.center) <= self.radius * self.radius
    }

    pub fn bounding_box(&self) -> Aabb {
        let r = Vec3::splat(self.radius);
        Aabb::new(self.center - r, self.center + r)
    }
}

/// Spatial region for queries: box, sphere, cylinder (horizontal disk times
/// vertical extent), or an opaque predicate with a caller-supplied bound.
#[derive(Clone)]
pub enum Region {
    Aabb(Aabb),
    Sphere(Sphere),
    Cylinder {
        center: Vec3,
        radius: f32,
        half_height: f32,
    },
    Custom {
        bounds: Aabb,
        predicate: Arc<dyn Fn(Vec3) -> bool + Send + Sync>,
    },
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Region::Aabb(aabb) => f.debug_tuple("Aabb").field(aabb).finish(),
            Region::Sphere(sphere) => f.debug_tuple("Sphere").field(sphere).finish(),
            Region::Cylinder {
                center,
                radius,
                half_height,
            } => f
                .debug_struct("Cylinder")
                .field("center", center)
                .field("radius", radius)
                .field("half_height", half_height)
                .finish(),
            Region::Custom { bounds, .. } => {
                f.debug_struct("Custom").field("bounds", bounds).finish()
            }
        }
    }
}

impl Region {
    pub fn aabb(min: Vec3, max: Vec3) -> Self {
        Region::Aabb(Aabb::new(min, max))
    }

    pub fn sphere(center: Vec3, radius: f32) -> Self {
        Region::Sphere(Sphere::new(center, radius))
    }

    pub fn cylinder(center: Vec3, radius: f32, height: f32) -> Self {
        Region::Cylinder {
            center,
            radius,
            half_height: height * 0.5,
        }
    }

    pub fn custom(
        bounds: Aabb,
        predicate: impl Fn(Vec3) -> bool + Send + Sync + 'static,
    ) -> Self {
        Region::Custom {
            bounds,
            predicate: Arc::new(predicate),
        }
    }

    /// Exact point membership test.
    pub fn contains(&self, p: Vec3) -> bool {
        match self {
            Region::Aabb(aabb) => aabb.contains(p),
            Region::Sphere(sphere) => sphere.contains(p),
            Region::Cylinder {
                center,
                radius,
                half_height,
            } => {
                let diff = p - *center;
                let horizontal_sq = diff.x * diff.x + diff.z * diff.z;
                horizontal_sq <= radius * radius && diff.y.abs() <= *half_height
            }
            Region::Custom { predicate, .. } => predicate(p),
        }
    }

    /// Conservative bounding box of the region.
    pub fn bounding_box(&self) -> Aabb {
        match self {
            Region::Aabb(aabb) => *aabb,
            Region::Sphere(sphere) => sphere.bounding_box(),
            Region::Cylinder {
                center,
                radius,
                half_height,
            } => {
                let extent = Vec3::new(*radius, *half_height, *radius);
                Aabb::new(*center - extent, *center + extent)
            }
            Region::Custom { bounds, .. } => *bounds,
        }
    }

    /// Conservative intersection test against a box. Exact for box and
    /// sphere; cylinder and custom fall back to their bounding boxes.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        match self {
            Region::Aabb(own) => own.intersects(aabb),
            Region::Sphere(sphere) => sphere.intersects_aabb(aabb),
            _ => self.bounding_box().intersects(aabb),
        }
    }
}

/// Interchangeable spatial index over entity positions.
pub trait SpatialIndex: Send + Sync {
    fn insert(&mut self, entity: EntityId, position: Vec3);

    /// Remove by the position the index last saw; returns false when the
    /// entry was not found there (a missed update upstream).
    fn remove(&mut self, entity: EntityId, last_known_position: Vec3) -> bool;

    fn update(&mut self, entity: EntityId, old_position: Vec3, new_position: Vec3) {
        self.remove(entity, old_position);
        self.insert(entity, new_position);
    }

    /// Append every entity whose position lies inside `region` to `out`.
    fn query_region(&self, region: &Region, out: &mut Vec<EntityId>);

    /// The k nearest entities to `center`, ascending by squared distance.
    fn query_nearest(&self, center: Vec3, k: usize) -> Vec<(EntityId, f32)>;

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
