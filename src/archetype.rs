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

//! Archetype storage: struct-of-arrays columns with row allocation and
//! swap-removal.
//!
//! An archetype is the canonical home of every entity sharing one component
//! signature. Each component type owns one contiguous column; row N of every
//! column belongs to entity N of the archetype's entity list. Removal is
//! swap-with-last so columns stay dense.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::component::{component_id, component_info, Component, ComponentId, ComponentInfo};
use crate::entity::EntityId;
use crate::error::{QueryError, Result};
use crate::signature::Signature;

/// Archetype: Structure of Arrays storage
pub struct Archetype {
    signature: Signature,
    entities: Vec<EntityId>,
    columns: Vec<ComponentColumn>,
    column_indices: FxHashMap<ComponentId, usize>,
}

impl Archetype {
    /// Create new archetype for the given signature. Columns are registered
    /// separately so the caller controls their order.
    pub fn new(signature: Signature) -> Self {
        Self {
            signature,
            entities: Vec::new(),
            columns: Vec::new(),
            column_indices: FxHashMap::default(),
        }
    }

    /// Get signature
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Register a column for component type T
    pub fn register_column<T: Component>(&mut self) {
        let id = component_id::<T>();
        if !self.column_indices.contains_key(&id) {
            let idx = self.columns.len();
            self.columns.push(ComponentColumn::new::<T>());
            self.column_indices.insert(id, idx);
        }
    }

    /// Register a column from registry info (used when replicating a source
    /// archetype's columns during migration, where no generic type is at hand)
    pub fn register_column_info(&mut self, info: ComponentInfo) {
        if !self.column_indices.contains_key(&info.id) {
            let idx = self.columns.len();
            self.columns.push(ComponentColumn::from_info(info));
            self.column_indices.insert(info.id, idx);
        }
    }

    /// Reserve space for additional rows in the entity list and every column.
    ///
    /// Migrations call this on the target archetype before touching the
    /// source, so an allocation failure leaves the world unchanged.
    pub fn reserve_rows(&mut self, additional: usize) -> Result<()> {
        if self
            .entities
            .try_reserve(additional)
            .is_err()
        {
            return Err(QueryError::AllocationFailed);
        }
        for column in &mut self.columns {
            column.reserve(additional)?;
        }
        Ok(())
    }

    /// Allocate a row for `entity`, bumping every column. Returns the row
    /// index. Callers must write each column slot immediately afterwards.
    pub fn allocate_row(&mut self, entity: EntityId) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        for column in &mut self.columns {
            column.push_uninit();
        }
        row
    }

    /// Remove a row, dropping its component values. Returns the entity that
    /// was swapped into `row`, if any, so the caller can fix its location.
    pub fn swap_remove_row(&mut self, row: usize) -> Option<EntityId> {
        self.swap_remove_impl(row, true)
    }

    /// Remove a row whose component values were already moved out. Same
    /// displaced-entity contract as [`swap_remove_row`](Self::swap_remove_row).
    pub(crate) fn swap_remove_row_forget(&mut self, row: usize) -> Option<EntityId> {
        self.swap_remove_impl(row, false)
    }

    fn swap_remove_impl(&mut self, row: usize, drop_values: bool) -> Option<EntityId> {
        if row >= self.entities.len() {
            return None;
        }

        for column in &mut self.columns {
            // SAFETY: row < len was checked above and columns track entities 1:1
            unsafe { column.swap_remove_unchecked(row, drop_values) };
        }
        self.entities.swap_remove(row);

        if row < self.entities.len() {
            Some(self.entities[row])
        } else {
            None
        }
    }

    /// Get column immutably
    pub fn column(&self, id: ComponentId) -> Option<&ComponentColumn> {
        let idx = *self.column_indices.get(&id)?;
        self.columns.get(idx)
    }

    /// Get column mutably
    pub fn column_mut(&mut self, id: ComponentId) -> Option<&mut ComponentColumn> {
        let idx = *self.column_indices.get(&id)?;
        self.columns.get_mut(idx)
    }

    /// Get column index for a component type
    pub fn column_index(&self, id: ComponentId) -> Option<usize> {
        self.column_indices.get(&id).copied()
    }

    /// Get column by precomputed index
    pub fn column_by_index(&self, index: usize) -> Option<&ComponentColumn> {
        self.columns.get(index)
    }

    /// Get mutable column by precomputed index
    pub fn column_mut_by_index(&mut self, index: usize) -> Option<&mut ComponentColumn> {
        self.columns.get_mut(index)
    }

    pub fn has_column(&self, id: ComponentId) -> bool {
        self.column_indices.contains_key(&id)
    }

    /// Registered component ids with their column infos, for replication
    pub(crate) fn column_infos(&self) -> SmallVec<[ComponentInfo; 8]> {
        let mut infos = SmallVec::new();
        for (&id, &idx) in &self.column_indices {
            let col = &self.columns[idx];
            infos.push(ComponentInfo {
                id,
                type_id: col.type_id,
                layout: col.item_layout,
                drop_fn: col.drop_fn,
            });
        }
        infos
    }

    /// Get all entities in row order
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Is empty
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Type-erased component column honoring the component's layout.
///
/// A raw allocation grown geometrically, with drop glue recorded at
/// construction so `Drop` can walk live rows.
pub struct ComponentColumn {
    data: NonNull<u8>,
    len: usize,
    cap: usize,
    item_layout: Layout,
    type_id: std::any::TypeId,
    drop_fn: Option<unsafe fn(*mut u8)>,
}

// SAFETY: columns only store Component values, which are Send + Sync
unsafe impl Send for ComponentColumn {}
unsafe impl Sync for ComponentColumn {}

impl ComponentColumn {
    /// Create new column for type T
    pub fn new<T: Component>() -> Self {
        // Registration also records the drop glue used below
        let info = component_info(component_id::<T>()).expect("component registered");
        Self::from_info(info)
    }

    /// Create new column from registry info
    pub fn from_info(info: ComponentInfo) -> Self {
        Self {
            data: NonNull::dangling(),
            len: 0,
            cap: if info.layout.size() == 0 { usize::MAX } else { 0 },
            item_layout: info.layout,
            type_id: info.type_id,
            drop_fn: info.drop_fn,
        }
    }

    #[inline]
    pub fn item_size(&self) -> usize {
        self.item_layout.size()
    }

    /// Number of live rows
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Grow the allocation so at least `additional` more rows fit.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let needed = self.len.checked_add(additional).ok_or(QueryError::AllocationFailed)?;
        if needed <= self.cap || self.item_layout.size() == 0 {
            return Ok(());
        }

        let new_cap = needed.max(self.cap * 2).max(4);
        let new_bytes = new_cap
            .checked_mul(self.item_layout.size())
            .ok_or(QueryError::AllocationFailed)?;
        let new_layout = Layout::from_size_align(new_bytes, self.item_layout.align())
            .map_err(|_| QueryError::AllocationFailed)?;

        let new_ptr = if self.cap == 0 {
            // SAFETY: new_layout has non-zero size (size 0 returned above)
            unsafe { alloc::alloc(new_layout) }
        } else {
            let old_layout = Layout::from_size_align(
                self.cap * self.item_layout.size(),
                self.item_layout.align(),
            )
            .map_err(|_| QueryError::AllocationFailed)?;
            // SAFETY: data was allocated with old_layout
            unsafe { alloc::realloc(self.data.as_ptr(), old_layout, new_bytes) }
        };

        match NonNull::new(new_ptr) {
            Some(ptr) => {
                self.data = ptr;
                self.cap = new_cap;
                Ok(())
            }
            None => Err(QueryError::AllocationFailed),
        }
    }

    /// Bump the length by one, growing if necessary, and return the new row's
    /// slot pointer. The slot is uninitialized; the caller must write it
    /// before anything can observe the row.
    pub fn push_uninit(&mut self) -> *mut u8 {
        if self.len == self.cap {
            // Growth here cannot be made transactional; migrations avoid it
            // by reserving up front.
            self.reserve(1).expect("column allocation failed");
        }
        let ptr = unsafe { self.ptr_at(self.len) };
        self.len += 1;
        ptr
    }

    /// Raw pointer to a row's slot.
    ///
    /// # Safety
    /// `row` must be within the column's capacity.
    #[inline]
    unsafe fn ptr_at(&self, row: usize) -> *mut u8 {
        if self.item_layout.size() == 0 {
            // Aligned dangling pointer; ZST references still need alignment
            return self.item_layout.align() as *mut u8;
        }
        self.data.as_ptr().add(row * self.item_layout.size())
    }

    /// Raw pointer to a live row, bounds-checked.
    pub fn get_raw(&self, row: usize) -> Option<*mut u8> {
        if row >= self.len {
            return None;
        }
        // SAFETY: row < len <= cap
        Some(unsafe { self.ptr_at(row) })
    }

    /// Get component at row
    pub fn get<T: Component>(&self, row: usize) -> Option<&T> {
        debug_assert_eq!(self.type_id, std::any::TypeId::of::<T>());
        if row >= self.len {
            return None;
        }
        // SAFETY: row is live, the column stores T values
        Some(unsafe { &*(self.ptr_at(row) as *const T) })
    }

    /// Get mutable component at row
    pub fn get_mut<T: Component>(&mut self, row: usize) -> Option<&mut T> {
        debug_assert_eq!(self.type_id, std::any::TypeId::of::<T>());
        if row >= self.len {
            return None;
        }
        // SAFETY: row is live, the column stores T values
        Some(unsafe { &mut *(self.ptr_at(row) as *mut T) })
    }

    /// Typed view of the whole column.
    pub fn as_slice<T: Component>(&self) -> &[T] {
        debug_assert_eq!(self.type_id, std::any::TypeId::of::<T>());
        // SAFETY: len rows of T are initialized
        unsafe { std::slice::from_raw_parts(self.data.as_ptr() as *const T, self.len) }
    }

    /// Swap-remove a row.
    ///
    /// # Safety
    /// `row` must be a live row. When `drop_value` is false the caller must
    /// have moved the value out already.
    pub(crate) unsafe fn swap_remove_unchecked(&mut self, row: usize, drop_value: bool) {
        debug_assert!(row < self.len);

        if drop_value {
            if let Some(drop_fn) = self.drop_fn {
                drop_fn(self.ptr_at(row));
            }
        }

        let last = self.len - 1;
        if row != last && self.item_layout.size() != 0 {
            std::ptr::copy_nonoverlapping(
                self.ptr_at(last),
                self.ptr_at(row),
                self.item_layout.size(),
            );
        }
        self.len = last;
    }

    /// Drop all live rows.
    pub fn clear(&mut self) {
        if let Some(drop_fn) = self.drop_fn {
            for row in 0..self.len {
                // SAFETY: every row below len is live
                unsafe { drop_fn(self.ptr_at(row)) };
            }
        }
        self.len = 0;
    }
}

impl Drop for ComponentColumn {
    fn drop(&mut self) {
        self.clear();
        if self.item_layout.size() != 0 && self.cap > 0 {
            let layout = Layout::from_size_align(
                self.cap * self.item_layout.size(),
                self.item_layout.align(),
            )
            .expect("layout validated at reserve time");
            // SAFETY: data was allocated with this layout
            unsafe { alloc::dealloc(self.data.as_ptr(), layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::component_id;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Pos {
        x: f32,
        y: f32,
    }

    #[test]
    fn test_column_push_and_get() {
        let mut col = ComponentColumn::new::<Pos>();
        for i in 0..10 {
            let ptr = col.push_uninit();
            unsafe {
                std::ptr::write(ptr as *mut Pos, Pos { x: i as f32, y: 0.0 });
            }
        }

        assert_eq!(col.len(), 10);
        assert_eq!(col.get::<Pos>(3), Some(&Pos { x: 3.0, y: 0.0 }));
        assert_eq!(col.get::<Pos>(10), None);
    }

    #[test]
    fn test_column_swap_remove_moves_last() {
        let mut col = ComponentColumn::new::<u64>();
        for i in 0..4u64 {
            let ptr = col.push_uninit();
            unsafe { std::ptr::write(ptr as *mut u64, i) };
        }

        unsafe { col.swap_remove_unchecked(1, true) };
        assert_eq!(col.len(), 3);
        assert_eq!(col.as_slice::<u64>(), &[0, 3, 2]);
    }

    #[test]
    fn test_column_drops_values() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Counted;
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        {
            let mut col = ComponentColumn::new::<Counted>();
            for _ in 0..5 {
                let ptr = col.push_uninit();
                unsafe { std::ptr::write(ptr as *mut Counted, Counted) };
            }
        }
        assert_eq!(DROPS.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_archetype_rows_track_entities() {
        let mut arch = Archetype::new(Signature::from_ids(&[component_id::<Pos>()]));
        arch.register_column::<Pos>();

        let mut world_entities = slotmap::SlotMap::<EntityId, ()>::with_key();
        let e0 = world_entities.insert(());
        let e1 = world_entities.insert(());
        let e2 = world_entities.insert(());

        for (i, e) in [e0, e1, e2].into_iter().enumerate() {
            let row = arch.allocate_row(e);
            assert_eq!(row, i);
            let col = arch.column_mut(component_id::<Pos>()).unwrap();
            let ptr = col.get_raw(row).unwrap();
            unsafe { std::ptr::write(ptr as *mut Pos, Pos { x: i as f32, y: 0.0 }) };
        }

        // Removing row 0 swaps e2 into its place
        let displaced = arch.swap_remove_row(0);
        assert_eq!(displaced, Some(e2));
        assert_eq!(arch.entities(), &[e2, e1]);
        let col = arch.column(component_id::<Pos>()).unwrap();
        assert_eq!(col.get::<Pos>(0), Some(&Pos { x: 2.0, y: 0.0 }));
    }
}
