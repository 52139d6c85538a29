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

//! World: central entity and archetype storage.
//!
//! The world owns every archetype, the entity location table, the version
//! counter the cache keys on, and the spatial index kept consistent with
//! position-bearing components. An entity lives in exactly one archetype;
//! adding or removing a component migrates it, values moving with it.

use ahash::AHashMap;
use glam::Vec3;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::archetype::Archetype;
use crate::component::{
    component_id, component_info, Bundle, Component, ComponentId, MAX_BUNDLE_COMPONENTS,
};
use crate::entity::{EntityId, EntityLocation};
use crate::error::{QueryError, Result};
use crate::signature::Signature;
use crate::spatial::{Region, SpatialComponent, SpatialHashGrid, SpatialIndex};

const MAX_BATCH: usize = 10_000_000;

unsafe fn erased_position<P: SpatialComponent>(ptr: *const u8) -> Vec3 {
    (*(ptr as *const P)).position()
}

/// Spatial tracking state: which component carries positions, how to read
/// one out of a raw column slot, and the index kept in sync.
struct SpatialTracking {
    component: ComponentId,
    extract: unsafe fn(*const u8) -> Vec3,
    index: Box<dyn SpatialIndex>,
    /// Last position each tracked entity was indexed at; drives removes and
    /// updates without re-reading columns that may already be gone.
    positions: AHashMap<EntityId, Vec3>,
}

/// Central archetype store
pub struct World {
    /// Entity locations keyed by generational slotmap IDs
    entity_locations: SlotMap<EntityId, EntityLocation>,

    /// All archetypes, in creation order (stable discovery order for queries)
    archetypes: Vec<Archetype>,

    /// Maps component signatures to archetype indices
    archetype_index: AHashMap<Signature, usize>,

    /// Cache for archetype transitions when adding/removing components
    transitions: AHashMap<(usize, ComponentId, bool), usize>,

    /// Monotonic counter bumped after every structural mutation
    version: u64,

    spatial: Option<SpatialTracking>,
}

impl World {
    /// Create a new, empty world.
    pub fn new() -> Self {
        let mut world = Self {
            entity_locations: SlotMap::with_key(),
            archetypes: Vec::with_capacity(64),
            archetype_index: AHashMap::with_capacity(64),
            transitions: AHashMap::with_capacity(128),
            version: 1,
            spatial: None,
        };

        // Bootstrap the empty archetype (entities with no components).
        // Always index 0; simplifies logic elsewhere.
        world.get_or_create_archetype_with(Signature::new(), |_| {});
        world
    }

    /// Current world version. Readers that sampled an older version must
    /// treat their view as stale.
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    /// Spawn a new entity with the given bundle of components.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Result<EntityId> {
        let ids = B::component_ids();
        let signature = B::signature();

        let arch_id = self.get_or_create_archetype_with(signature, |archetype| {
            B::register_columns(archetype);
        });
        self.archetypes[arch_id].reserve_rows(1)?;

        let id = self.entity_locations.insert(EntityLocation::PENDING);
        let archetype = &mut self.archetypes[arch_id];
        let row = archetype.allocate_row(id);

        // Pre-resolve column indices so bundle writes skip hash lookups
        let mut ptrs = [std::ptr::null_mut(); MAX_BUNDLE_COMPONENTS];
        for (i, &cid) in ids.iter().enumerate() {
            let col_idx = archetype
                .column_index(cid)
                .expect("bundle column registered");
            let column = archetype.column_mut_by_index(col_idx).expect("column");
            ptrs[i] = column.get_raw(row).expect("allocated row");
        }

        // SAFETY: pointers target freshly allocated slots in bundle order
        unsafe { bundle.write_components(&ptrs[..ids.len()]) };

        self.entity_locations[id] = EntityLocation {
            archetype_id: arch_id,
            row,
        };

        self.index_spatial_if_tracked(id, arch_id, row);
        self.bump_version();
        Ok(id)
    }

    /// Spawn multiple entities sharing one bundle shape.
    ///
    /// Cheaper than repeated `spawn`: one archetype resolution, one reserve.
    pub fn spawn_batch<B, I>(&mut self, bundles: I) -> Result<Vec<EntityId>>
    where
        B: Bundle,
        I: IntoIterator<Item = B>,
        I::IntoIter: ExactSizeIterator,
    {
        let bundles = bundles.into_iter();
        let count = bundles.len();
        if count > MAX_BATCH {
            return Err(QueryError::BatchTooLarge);
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let ids = B::component_ids();
        let signature = B::signature();
        let arch_id = self.get_or_create_archetype_with(signature, |archetype| {
            B::register_columns(archetype);
        });
        self.archetypes[arch_id].reserve_rows(count)?;

        let mut column_indices: SmallVec<[usize; MAX_BUNDLE_COMPONENTS]> = SmallVec::new();
        for &cid in ids.iter() {
            column_indices.push(
                self.archetypes[arch_id]
                    .column_index(cid)
                    .expect("bundle column registered"),
            );
        }

        let mut entity_ids = Vec::with_capacity(count);
        for bundle in bundles {
            let id = self.entity_locations.insert(EntityLocation::PENDING);
            let archetype = &mut self.archetypes[arch_id];
            let row = archetype.allocate_row(id);

            let mut ptrs = [std::ptr::null_mut(); MAX_BUNDLE_COMPONENTS];
            for (i, &col_idx) in column_indices.iter().enumerate() {
                let column = archetype.column_mut_by_index(col_idx).expect("column");
                ptrs[i] = column.get_raw(row).expect("allocated row");
            }
            // SAFETY: pointers target freshly allocated slots in bundle order
            unsafe { bundle.write_components(&ptrs[..ids.len()]) };

            self.entity_locations[id] = EntityLocation {
                archetype_id: arch_id,
                row,
            };
            self.index_spatial_if_tracked(id, arch_id, row);
            entity_ids.push(id);
        }

        self.bump_version();
        Ok(entity_ids)
    }

    /// Destroy an entity. Returns false when the handle is stale or unknown.
    pub fn despawn(&mut self, entity: EntityId) -> bool {
        let Some(location) = self.entity_locations.remove(entity) else {
            return false;
        };

        if let Some(tracking) = self.spatial.as_mut() {
            if let Some(pos) = tracking.positions.remove(&entity) {
                tracking.index.remove(entity, pos);
            }
        }

        let archetype = &mut self.archetypes[location.archetype_id];
        if let Some(displaced) = archetype.swap_remove_row(location.row) {
            if let Some(loc) = self.entity_locations.get_mut(displaced) {
                loc.row = location.row;
            }
        }

        self.bump_version();
        true
    }

    /// Check whether the handle still names a live entity.
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entity_locations.contains_key(entity)
    }

    /// Get entity location
    pub fn location(&self, entity: EntityId) -> Option<EntityLocation> {
        self.entity_locations.get(entity).copied()
    }

    /// Get immutable reference to a component on an entity
    pub fn get_component<T: Component>(&self, entity: EntityId) -> Option<&T> {
        let location = self.entity_locations.get(entity)?;
        let archetype = self.archetypes.get(location.archetype_id)?;
        let column = archetype.column(component_id::<T>())?;
        column.get::<T>(location.row)
    }

    /// Get mutable reference to a component on an entity.
    ///
    /// Handing out a `&mut` is treated as a change: the world version is
    /// bumped so cached query results that may depend on the value are
    /// invalidated on their next probe.
    pub fn get_component_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        let location = *self.entity_locations.get(entity)?;
        self.bump_version();
        let archetype = self.archetypes.get_mut(location.archetype_id)?;
        let column = archetype.column_mut(component_id::<T>())?;
        column.get_mut::<T>(location.row)
    }

    /// Check if entity has a specific component
    pub fn has_component<T: Component>(&self, entity: EntityId) -> bool {
        let Some(location) = self.entity_locations.get(entity) else {
            return false;
        };
        self.archetypes[location.archetype_id].has_column(component_id::<T>())
    }

    /// Add a component to an entity, migrating it to the wider archetype.
    ///
    /// Adding a component the entity already has is a value update: no
    /// migration and no version bump.
    pub fn add_component<T: Component>(&mut self, entity: EntityId, component: T) -> Result<()> {
        let location = *self
            .entity_locations
            .get(entity)
            .ok_or(QueryError::EntityNotFound)?;
        let cid = component_id::<T>();

        // Idempotent update path
        if self.archetypes[location.archetype_id].has_column(cid) {
            let column = self.archetypes[location.archetype_id]
                .column_mut(cid)
                .expect("column present");
            let slot = column.get_mut::<T>(location.row).expect("live row");
            *slot = component;
            self.refresh_tracked_position(entity, location.archetype_id, location.row, cid);
            return Ok(());
        }

        let target_id = self.transition_target(location.archetype_id, cid, true, || {
            component_info(cid).expect("component registered")
        });

        // Reserve before touching the source so failure leaves the world
        // unchanged
        self.archetypes[target_id].reserve_rows(1)?;

        let new_row = self.move_entity(entity, location, target_id);
        {
            let archetype = &mut self.archetypes[target_id];
            let column = archetype.column_mut(cid).expect("target column");
            let slot = column.get_raw(new_row).expect("allocated row");
            // SAFETY: slot is the uninitialized cell allocated for this row
            unsafe { std::ptr::write(slot as *mut T, component) };
        }

        self.index_spatial_if_added(entity, target_id, new_row, cid);
        self.bump_version();
        Ok(())
    }

    /// Remove a component from an entity, migrating it to the narrower
    /// archetype. The removed value is dropped.
    pub fn remove_component<T: Component>(&mut self, entity: EntityId) -> Result<()> {
        let location = *self
            .entity_locations
            .get(entity)
            .ok_or(QueryError::EntityNotFound)?;
        let cid = component_id::<T>();

        if !self.archetypes[location.archetype_id].has_column(cid) {
            return Err(QueryError::ComponentNotFound);
        }

        let target_id = self.transition_target(location.archetype_id, cid, false, || {
            component_info(cid).expect("component registered")
        });
        self.archetypes[target_id].reserve_rows(1)?;

        if let Some(tracking) = self.spatial.as_mut() {
            if tracking.component == cid {
                if let Some(pos) = tracking.positions.remove(&entity) {
                    tracking.index.remove(entity, pos);
                }
            }
        }

        self.move_entity(entity, location, target_id);
        self.bump_version();
        Ok(())
    }

    /// Resolve the target archetype for a single-component transition,
    /// caching the edge.
    fn transition_target(
        &mut self,
        src: usize,
        cid: ComponentId,
        adding: bool,
        info: impl FnOnce() -> crate::component::ComponentInfo,
    ) -> usize {
        if let Some(&target) = self.transitions.get(&(src, cid, adding)) {
            return target;
        }

        let src_signature = *self.archetypes[src].signature();
        let target_signature = if adding {
            src_signature.with(cid)
        } else {
            src_signature.without(cid)
        };

        // Replicate the source's columns (minus the removed one) plus the
        // added component's column
        let mut infos = self.archetypes[src].column_infos();
        if adding {
            infos.push(info());
        } else {
            infos.retain(|i| i.id != cid);
        }

        let target = self.get_or_create_archetype_with(target_signature, |archetype| {
            for info in infos {
                archetype.register_column_info(info);
            }
        });
        self.transitions.insert((src, cid, adding), target);
        target
    }

    /// Move an entity between archetypes, carrying shared component values
    /// and dropping values whose column the target lacks. Returns the new
    /// row. The target must have capacity reserved.
    fn move_entity(&mut self, entity: EntityId, old: EntityLocation, target_id: usize) -> usize {
        debug_assert_ne!(old.archetype_id, target_id);

        let (src, tgt) = if old.archetype_id < target_id {
            let (left, right) = self.archetypes.split_at_mut(target_id);
            (&mut left[old.archetype_id], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(old.archetype_id);
            (&mut right[0], &mut left[target_id])
        };

        let new_row = tgt.allocate_row(entity);

        let src_ids: SmallVec<[ComponentId; 8]> = src.signature().iter().collect();
        for cid in src_ids {
            let src_col = src.column_mut(cid).expect("signature column");
            let src_ptr = src_col.get_raw(old.row).expect("live row");
            let item_size = src_col.item_size();

            match tgt.column_mut(cid) {
                Some(tgt_col) => {
                    let dst_ptr = tgt_col.get_raw(new_row).expect("allocated row");
                    // SAFETY: both slots are item_size bytes of the same type;
                    // the source value is moved, not copied (forgotten below)
                    unsafe { std::ptr::copy_nonoverlapping(src_ptr, dst_ptr, item_size) };
                }
                None => {
                    // Component not carried over: drop it in place
                    if let Some(info) = component_info(cid) {
                        if let Some(drop_fn) = info.drop_fn {
                            // SAFETY: the slot holds a live value that no one
                            // else will observe or drop
                            unsafe { drop_fn(src_ptr) };
                        }
                    }
                }
            }
        }

        if let Some(displaced) = src.swap_remove_row_forget(old.row) {
            if let Some(loc) = self.entity_locations.get_mut(displaced) {
                loc.row = old.row;
            }
        }

        self.entity_locations[entity] = EntityLocation {
            archetype_id: target_id,
            row: new_row,
        };
        new_row
    }

    /// Get archetype by ID
    pub fn archetype(&self, id: usize) -> Option<&Archetype> {
        self.archetypes.get(id)
    }

    /// Get all archetypes in stable creation order
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    pub fn entity_count(&self) -> usize {
        self.entity_locations.len()
    }

    /// Every archetype whose signature is a superset of `required`, in
    /// stable creation order.
    pub fn archetypes_matching<'w>(
        &'w self,
        required: &'w Signature,
    ) -> impl Iterator<Item = (usize, &'w Archetype)> + 'w {
        self.archetypes
            .iter()
            .enumerate()
            .filter(move |(_, arch)| required.is_subset_of(arch.signature()))
    }

    /// Indices of matching archetypes (used by the executor and the
    /// hot-path pre-bound lists).
    pub fn matching_indices(&self, required: &Signature) -> Vec<usize> {
        self.archetypes_matching(required).map(|(i, _)| i).collect()
    }

    /// Exact count of entities in archetypes matching `required`.
    pub fn matching_entity_count(&self, required: &Signature) -> usize {
        self.archetypes_matching(required)
            .map(|(_, arch)| arch.len())
            .sum()
    }

    /// Clear all entities and archetypes. Archetype handles are invalidated;
    /// the spatial index is reset.
    pub fn clear(&mut self) {
        self.entity_locations.clear();
        self.archetypes.clear();
        self.archetype_index.clear();
        self.transitions.clear();
        if let Some(tracking) = self.spatial.as_mut() {
            tracking.index.clear();
            tracking.positions.clear();
        }

        self.get_or_create_archetype_with(Signature::new(), |_| {});
        self.bump_version();
    }

    /// Get or create archetype with a callback run once on creation
    fn get_or_create_archetype_with<F>(&mut self, signature: Signature, on_create: F) -> usize
    where
        F: FnOnce(&mut Archetype),
    {
        if let Some(&id) = self.archetype_index.get(&signature) {
            return id;
        }

        let mut archetype = Archetype::new(signature);
        on_create(&mut archetype);

        // Push first so the index never names a missing archetype
        self.archetypes.push(archetype);
        let id = self.archetypes.len() - 1;
        self.archetype_index.insert(signature, id);
        id
    }

    // ========== Spatial tracking ==========

    /// Track positions of component `P` in a uniform hash grid.
    pub fn track_spatial<P: SpatialComponent>(&mut self) {
        self.track_spatial_with::<P>(Box::new(SpatialHashGrid::default()));
    }

    /// Track positions of component `P` in a caller-chosen index.
    pub fn track_spatial_with<P: SpatialComponent>(&mut self, index: Box<dyn SpatialIndex>) {
        let mut tracking = SpatialTracking {
            component: component_id::<P>(),
            extract: erased_position::<P>,
            index,
            positions: AHashMap::new(),
        };

        // Index everything already present
        for archetype in &self.archetypes {
            let Some(col_idx) = archetype.column_index(tracking.component) else {
                continue;
            };
            let column = archetype.column_by_index(col_idx).expect("column");
            for (row, &entity) in archetype.entities().iter().enumerate() {
                let ptr = column.get_raw(row).expect("live row");
                // SAFETY: the column stores P values
                let pos = unsafe { (tracking.extract)(ptr) };
                tracking.index.insert(entity, pos);
                tracking.positions.insert(entity, pos);
            }
        }

        self.spatial = Some(tracking);
    }

    /// The component id positions are tracked for, if any.
    pub fn spatial_tracked(&self) -> Option<ComponentId> {
        self.spatial.as_ref().map(|t| t.component)
    }

    /// Re-read an entity's tracked position after an in-place mutation and
    /// update the index. Returns false when nothing is tracked for it.
    pub fn refresh_position(&mut self, entity: EntityId) -> bool {
        let Some(location) = self.entity_locations.get(entity).copied() else {
            return false;
        };
        let Some(tracking) = self.spatial.as_ref() else {
            return false;
        };
        let cid = tracking.component;
        if !self.archetypes[location.archetype_id].has_column(cid) {
            return false;
        }
        self.refresh_tracked_position(entity, location.archetype_id, location.row, cid);
        true
    }

    /// Rebuild the spatial index from scratch; supports the clear path and
    /// recovery from missed updates.
    pub fn rebuild_spatial_index(&mut self) {
        let Some(mut tracking) = self.spatial.take() else {
            return;
        };
        tracking.index.clear();
        tracking.positions.clear();

        for archetype in &self.archetypes {
            let Some(col_idx) = archetype.column_index(tracking.component) else {
                continue;
            };
            let column = archetype.column_by_index(col_idx).expect("column");
            for (row, &entity) in archetype.entities().iter().enumerate() {
                let ptr = column.get_raw(row).expect("live row");
                // SAFETY: the column stores the tracked component
                let pos = unsafe { (tracking.extract)(ptr) };
                tracking.index.insert(entity, pos);
                tracking.positions.insert(entity, pos);
            }
        }

        self.spatial = Some(tracking);
    }

    /// Region query against the tracked index. Empty when tracking is off.
    pub fn spatial_query_region(&self, region: &Region, out: &mut Vec<EntityId>) {
        if let Some(tracking) = self.spatial.as_ref() {
            tracking.index.query_region(region, out);
        }
    }

    /// K-nearest query against the tracked index, ascending by squared
    /// distance. Empty when tracking is off.
    pub fn spatial_query_nearest(&self, center: Vec3, k: usize) -> Vec<(EntityId, f32)> {
        match self.spatial.as_ref() {
            Some(tracking) => tracking.index.query_nearest(center, k),
            None => Vec::new(),
        }
    }

    /// The position the index last saw for an entity.
    pub fn tracked_position(&self, entity: EntityId) -> Option<Vec3> {
        self.spatial
            .as_ref()
            .and_then(|t| t.positions.get(&entity).copied())
    }

    fn index_spatial_if_tracked(&mut self, entity: EntityId, arch_id: usize, row: usize) {
        let Some(tracking) = self.spatial.as_mut() else {
            return;
        };
        let cid = tracking.component;
        let Some(column) = self.archetypes[arch_id].column(cid) else {
            return;
        };
        let ptr = column.get_raw(row).expect("live row");
        // SAFETY: the column stores the tracked component
        let pos = unsafe { (tracking.extract)(ptr) };
        tracking.index.insert(entity, pos);
        tracking.positions.insert(entity, pos);
    }

    fn index_spatial_if_added(
        &mut self,
        entity: EntityId,
        arch_id: usize,
        row: usize,
        added: ComponentId,
    ) {
        if self.spatial.as_ref().map(|t| t.component) == Some(added) {
            self.index_spatial_if_tracked(entity, arch_id, row);
        }
    }

    /// Update the index entry after a value write to the tracked component.
    fn refresh_tracked_position(
        &mut self,
        entity: EntityId,
        arch_id: usize,
        row: usize,
        written: ComponentId,
    ) {
        let Some(tracking) = self.spatial.as_mut() else {
            return;
        };
        if tracking.component != written {
            return;
        }
        let Some(column) = self.archetypes[arch_id].column(written) else {
            return;
        };
        let ptr = column.get_raw(row).expect("live row");
        // SAFETY: the column stores the tracked component
        let new_pos = unsafe { (tracking.extract)(ptr) };
        match tracking.positions.insert(entity, new_pos) {
            Some(old_pos) => tracking.index.update(entity, old_pos, new_pos),
            None => tracking.index.insert(entity, new_pos),
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Pos {
        x: f32,
        y: f32,
        z: f32,
    }

    impl SpatialComponent for Pos {
        fn position(&self) -> Vec3 {
            Vec3::new(self.x, self.y, self.z)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Vel {
        x: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Tag;

    #[test]
    fn test_spawn_despawn() {
        let mut world = World::new();

        let entity = world.spawn((Pos { x: 1.0, y: 2.0, z: 0.0 },)).unwrap();
        assert!(world.is_alive(entity));
        assert_eq!(
            world.get_component::<Pos>(entity),
            Some(&Pos { x: 1.0, y: 2.0, z: 0.0 })
        );

        assert!(world.despawn(entity));
        assert!(!world.is_alive(entity));
        assert!(world.get_component::<Pos>(entity).is_none());
        // Second despawn on the stale handle is a no-op
        assert!(!world.despawn(entity));
    }

    #[test]
    fn test_stale_handle_fails_after_slot_reuse() {
        let mut world = World::new();
        let a = world.spawn((Vel { x: 1.0 },)).unwrap();
        world.despawn(a);

        let b = world.spawn((Vel { x: 2.0 },)).unwrap();
        assert_ne!(a, b);
        assert!(world.get_component::<Vel>(a).is_none());
        assert_eq!(world.get_component::<Vel>(b), Some(&Vel { x: 2.0 }));
    }

    #[test]
    fn test_add_component_migrates() {
        let mut world = World::new();
        let e = world.spawn((Vel { x: 1.0 },)).unwrap();
        let v0 = world.version();

        world.add_component(e, Tag).unwrap();
        assert_eq!(world.version(), v0 + 1);
        assert!(world.has_component::<Tag>(e));
        assert_eq!(world.get_component::<Vel>(e), Some(&Vel { x: 1.0 }));

        // Old archetype is empty but still live
        let vel_only = Signature::from_ids(&[component_id::<Vel>()]);
        let empty_count: usize = world
            .archetypes_matching(&vel_only)
            .filter(|(_, a)| *a.signature() == vel_only)
            .map(|(_, a)| a.len())
            .sum();
        assert_eq!(empty_count, 0);
    }

    #[test]
    fn test_add_existing_is_value_update() {
        let mut world = World::new();
        let e = world.spawn((Vel { x: 1.0 },)).unwrap();
        let v0 = world.version();
        let arch0 = world.location(e).unwrap().archetype_id;

        world.add_component(e, Vel { x: 9.0 }).unwrap();
        assert_eq!(world.version(), v0, "no version bump on value update");
        assert_eq!(world.location(e).unwrap().archetype_id, arch0);
        assert_eq!(world.get_component::<Vel>(e), Some(&Vel { x: 9.0 }));
    }

    #[test]
    fn test_remove_component() {
        let mut world = World::new();
        let e = world
            .spawn((Vel { x: 1.0 }, Tag))
            .unwrap();

        world.remove_component::<Tag>(e).unwrap();
        assert!(!world.has_component::<Tag>(e));
        assert_eq!(world.get_component::<Vel>(e), Some(&Vel { x: 1.0 }));

        assert_eq!(
            world.remove_component::<Tag>(e),
            Err(QueryError::ComponentNotFound)
        );
    }

    #[test]
    fn test_migration_fixes_displaced_entity() {
        let mut world = World::new();
        let a = world.spawn((Vel { x: 0.0 },)).unwrap();
        let b = world.spawn((Vel { x: 1.0 },)).unwrap();
        let c = world.spawn((Vel { x: 2.0 },)).unwrap();

        // Moving the first row out swaps the last entity into row 0
        world.add_component(a, Tag).unwrap();

        assert_eq!(world.get_component::<Vel>(a), Some(&Vel { x: 0.0 }));
        assert_eq!(world.get_component::<Vel>(b), Some(&Vel { x: 1.0 }));
        assert_eq!(world.get_component::<Vel>(c), Some(&Vel { x: 2.0 }));

        let loc_c = world.location(c).unwrap();
        assert_eq!(loc_c.row, 0);
    }

    #[test]
    fn test_dropping_component_values_on_remove() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Counted;
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut world = World::new();
        let e = world.spawn((Vel { x: 0.0 }, Counted)).unwrap();
        world.remove_component::<Counted>(e).unwrap();
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
        assert_eq!(world.get_component::<Vel>(e), Some(&Vel { x: 0.0 }));
    }

    #[test]
    fn test_spawn_batch() {
        let mut world = World::new();
        let ids = world
            .spawn_batch((0..100).map(|i| (Vel { x: i as f32 },)))
            .unwrap();
        assert_eq!(ids.len(), 100);
        assert_eq!(world.entity_count(), 100);
        assert_eq!(world.get_component::<Vel>(ids[42]), Some(&Vel { x: 42.0 }));
    }

    #[test]
    fn test_matching_iterates_supersets_in_order() {
        let mut world = World::new();
        world.spawn((Vel { x: 0.0 },)).unwrap();
        world.spawn((Vel { x: 1.0 }, Tag)).unwrap();
        world.spawn((Tag,)).unwrap();

        let vel_sig = Signature::from_ids(&[component_id::<Vel>()]);
        let matched: Vec<usize> = world.matching_indices(&vel_sig);
        assert_eq!(matched.len(), 2);
        assert!(matched[0] < matched[1]);
        assert_eq!(world.matching_entity_count(&vel_sig), 2);
    }

    #[test]
    fn test_spatial_tracking_follows_mutations() {
        let mut world = World::new();
        world.track_spatial::<Pos>();

        let e = world
            .spawn((Pos { x: 1.0, y: 0.0, z: 0.0 },))
            .unwrap();
        assert_eq!(world.tracked_position(e), Some(Vec3::new(1.0, 0.0, 0.0)));

        // Value update through add_component refreshes the index
        world
            .add_component(e, Pos { x: 5.0, y: 0.0, z: 0.0 })
            .unwrap();
        let mut out = Vec::new();
        world.spatial_query_region(&Region::sphere(Vec3::new(5.0, 0.0, 0.0), 0.5), &mut out);
        assert_eq!(out, vec![e]);

        // In-place mutation needs an explicit refresh
        world.get_component_mut::<Pos>(e).unwrap().x = 9.0;
        world.refresh_position(e);
        assert_eq!(world.tracked_position(e), Some(Vec3::new(9.0, 0.0, 0.0)));

        world.despawn(e);
        let mut out = Vec::new();
        world.spatial_query_region(&Region::sphere(Vec3::new(9.0, 0.0, 0.0), 0.5), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut world = World::new();
        world.track_spatial::<Pos>();
        for i in 0..10 {
            world
                .spawn((Pos { x: i as f32, y: 0.0, z: 0.0 },))
                .unwrap();
        }

        let v0 = world.version();
        world.clear();
        assert_eq!(world.entity_count(), 0);
        assert!(world.version() > v0);
        assert_eq!(world.spatial_query_nearest(Vec3::ZERO, 5).len(), 0);
        // Empty archetype is rebuilt
        assert_eq!(world.archetype_count(), 1);
    }
}
