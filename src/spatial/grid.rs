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

//! Uniform hash grid over entity positions.
//!
//! Space is tiled into cubic cells; each non-empty cell holds its resident
//! (entity, position) pairs. Best for dense, bounded worlds with roughly
//! uniform distribution. Cell size is the tuning knob: near the mean query
//! radius minimizes wasted cell visits.

use ahash::AHashMap;
use glam::Vec3;

use crate::entity::EntityId;

use super::{Region, SpatialIndex};

const DEFAULT_CELL_SIZE: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CellCoord {
    x: i32,
    y: i32,
    z: i32,
}

/// Uniform hash grid spatial index.
pub struct SpatialHashGrid {
    cell_size: f32,
    cells: AHashMap<CellCoord, Vec<(EntityId, Vec3)>>,
    len: usize,
}

impl Default for SpatialHashGrid {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

impl SpatialHashGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: cell_size.max(f32::EPSILON),
            cells: AHashMap::new(),
            len: 0,
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    #[inline]
    fn cell_of(&self, p: Vec3) -> CellCoord {
        CellCoord {
            x: (p.x / self.cell_size).floor() as i32,
            y: (p.y / self.cell_size).floor() as i32,
            z: (p.z / self.cell_size).floor() as i32,
        }
    }

    fn cell_aabb(&self, c: CellCoord) -> super::Aabb {
        let min = Vec3::new(
            c.x as f32 * self.cell_size,
            c.y as f32 * self.cell_size,
            c.z as f32 * self.cell_size,
        );
        super::Aabb::new(min, min + Vec3::splat(self.cell_size))
    }

    /// Occupied-cell bounds in cell coordinates, None when empty.
    fn occupied_bounds(&self) -> Option<(CellCoord, CellCoord)> {
        let mut iter = self.cells.keys();
        let first = *iter.next()?;
        let mut min = first;
        let mut max = first;
        for &c in iter {
            min.x = min.x.min(c.x);
            min.y = min.y.min(c.y);
            min.z = min.z.min(c.z);
            max.x = max.x.max(c.x);
            max.y = max.y.max(c.y);
            max.z = max.z.max(c.z);
        }
        Some((min, max))
    }
}

impl SpatialIndex for SpatialHashGrid {
    fn insert(&mut self, entity: EntityId, position: Vec3) {
        let coord = self.cell_of(position);
        self.cells
            .entry(coord)
            .or_insert_with(|| Vec::with_capacity(8))
            .push((entity, position));
        self.len += 1;
    }

    fn remove(&mut self, entity: EntityId, last_known_position: Vec3) -> bool {
        let coord = self.cell_of(last_known_position);
        let Some(cell) = self.cells.get_mut(&coord) else {
            return false;
        };
        let Some(idx) = cell.iter().position(|&(e, _)| e == entity) else {
            return false;
        };
        cell.swap_remove(idx);
        if cell.is_empty() {
            self.cells.remove(&coord);
        }
        self.len -= 1;
        true
    }

    fn query_region(&self, region: &Region, out: &mut Vec<EntityId>) {
        let bounds = region.bounding_box();
        let min = self.cell_of(bounds.min);
        let max = self.cell_of(bounds.max);

        for x in min.x..=max.x {
            for y in min.y..=max.y {
                for z in min.z..=max.z {
                    let coord = CellCoord { x, y, z };
                    let Some(cell) = self.cells.get(&coord) else {
                        continue;
                    };
                    if !region.intersects_aabb(&self.cell_aabb(coord)) {
                        continue;
                    }
                    for &(entity, position) in cell {
                        if region.contains(position) {
                            out.push(entity);
                        }
                    }
                }
            }
        }
    }

    fn query_nearest(&self, center: Vec3, k: usize) -> Vec<(EntityId, f32)> {
        if k == 0 || self.len == 0 {
            return Vec::new();
        }

        let Some((lo, hi)) = self.occupied_bounds() else {
            return Vec::new();
        };
        let origin = self.cell_of(center);
        let max_shell = [
            (origin.x - lo.x).abs(),
            (origin.y - lo.y).abs(),
            (origin.z - lo.z).abs(),
            (hi.x - origin.x).abs(),
            (hi.y - origin.y).abs(),
            (hi.z - origin.z).abs(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0);

        // Sorted best-k list, worst candidate last
        let mut best: Vec<(EntityId, f32)> = Vec::with_capacity(k + 1);

        fn consider(best: &mut Vec<(EntityId, f32)>, k: usize, entity: EntityId, d2: f32) {
            if best.len() < k {
                best.push((entity, d2));
                best.sort_by(|a, b| a.1.total_cmp(&b.1));
            } else if d2 < best[k - 1].1 {
                best[k - 1] = (entity, d2);
                best.sort_by(|a, b| a.1.total_cmp(&b.1));
            }
        }

        for shell in 0..=max_shell {
            // Every cell of shell r is at least (r-1) cell widths away from
            // any point inside the origin cell
            if best.len() == k {
                let shell_min = (shell - 1).max(0) as f32 * self.cell_size;
                if shell_min * shell_min > best[k - 1].1 {
                    break;
                }
            }

            for x in (origin.x - shell)..=(origin.x + shell) {
                for y in (origin.y - shell)..=(origin.y + shell) {
                    for z in (origin.z - shell)..=(origin.z + shell) {
                        let on_shell = (x - origin.x).abs() == shell
                            || (y - origin.y).abs() == shell
                            || (z - origin.z).abs() == shell;
                        if !on_shell {
                            continue;
                        }
                        let Some(cell) = self.cells.get(&CellCoord { x, y, z }) else {
                            continue;
                        };
                        for &(entity, position) in cell {
                            consider(&mut best, k, entity, (position - center).length_squared());
                        }
                    }
                }
            }
        }

        best
    }

    fn clear(&mut self) {
        self.cells.clear();
        self.len = 0;
    }

    fn len(&self) -> usize {
        self.len
    }
}
