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

//! Component and Bundle traits plus the dense component-type registry.
//!
//! Components are plain data attached to entities. The engine never
//! introspects a component beyond its size, alignment, move and drop; the
//! registry maps each component type to a small dense index so signatures
//! can be fixed-width bitsets.

use std::alloc::Layout;
use std::any::TypeId;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};

use crate::archetype::Archetype;
use crate::signature::{Signature, MAX_COMPONENT_TYPES};

/// Maximum number of components supported by Bundle implementations
pub const MAX_BUNDLE_COMPONENTS: usize = 8;

/// Marker trait for components
///
/// Components must be 'static (no borrowed data)
pub trait Component: 'static + Send + Sync {}

/// Automatically implement Component for all valid types
impl<T: 'static + Send + Sync> Component for T {}

/// Dense component type index, assigned at first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) u16);

impl ComponentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Per-type bookkeeping the columns need: layout and drop glue.
#[derive(Debug, Clone, Copy)]
pub struct ComponentInfo {
    pub id: ComponentId,
    pub type_id: TypeId,
    pub layout: Layout,
    pub drop_fn: Option<unsafe fn(*mut u8)>,
}

struct TypeRegistry {
    ids: FxHashMap<TypeId, ComponentId>,
    infos: Vec<ComponentInfo>,
}

static REGISTRY: RwLock<Option<TypeRegistry>> = RwLock::new(None);

unsafe fn drop_in_place_erased<T>(ptr: *mut u8) {
    std::ptr::drop_in_place(ptr as *mut T);
}

/// Resolve the dense id for `T`, registering it on first use.
///
/// # Panics
/// Panics once more than [`MAX_COMPONENT_TYPES`] distinct component types
/// have been registered; exceeding the signature width is a programming
/// error, not a runtime condition.
pub fn component_id<T: Component>() -> ComponentId {
    let type_id = TypeId::of::<T>();

    {
        let guard = REGISTRY.read();
        if let Some(reg) = guard.as_ref() {
            if let Some(&id) = reg.ids.get(&type_id) {
                return id;
            }
        }
    }

    let mut guard = REGISTRY.write();
    let reg = guard.get_or_insert_with(|| TypeRegistry {
        ids: FxHashMap::default(),
        infos: Vec::with_capacity(64),
    });

    // Another thread may have registered between the read and write locks
    if let Some(&id) = reg.ids.get(&type_id) {
        return id;
    }

    let index = reg.infos.len();
    if index >= MAX_COMPONENT_TYPES {
        panic!("Component type limit exceeded ({MAX_COMPONENT_TYPES}): widen Signature");
    }

    let id = ComponentId(index as u16);
    reg.infos.push(ComponentInfo {
        id,
        type_id,
        layout: Layout::new::<T>(),
        drop_fn: if std::mem::needs_drop::<T>() {
            Some(drop_in_place_erased::<T>)
        } else {
            None
        },
    });
    reg.ids.insert(type_id, id);
    id
}

/// Look up the registered info for a dense id.
pub fn component_info(id: ComponentId) -> Option<ComponentInfo> {
    let guard = REGISTRY.read();
    guard.as_ref().and_then(|reg| reg.infos.get(id.index()).copied())
}

/// Bundle of components
///
/// Allows spawning entities with multiple components at once.
pub trait Bundle: Send + Sync + 'static {
    /// Dense ids of all components in the bundle
    fn component_ids() -> SmallVec<[ComponentId; MAX_BUNDLE_COMPONENTS]>
    where
        Self: Sized;

    /// Signature covering every component in the bundle
    fn signature() -> Signature
    where
        Self: Sized,
    {
        let mut sig = Signature::new();
        for id in Self::component_ids() {
            sig.insert(id);
        }
        sig
    }

    /// Ensure component columns exist in an archetype
    fn register_columns(archetype: &mut Archetype)
    where
        Self: Sized;

    /// Write components to raw pointers, consuming the bundle
    ///
    /// # Safety
    /// Caller must ensure pointers are valid, properly aligned, and ordered
    /// to match `component_ids()`.
    unsafe fn write_components(self, ptrs: &[*mut u8]);
}

// Macro for tuple Bundle implementations
macro_rules! impl_bundle {
    ($($T:ident),*) => {
        impl<$($T: Component),*> Bundle for ($($T,)*) {
            fn component_ids() -> SmallVec<[ComponentId; MAX_BUNDLE_COMPONENTS]> {
                smallvec![$(component_id::<$T>()),*]
            }

            fn register_columns(archetype: &mut Archetype) {
                $(archetype.register_column::<$T>();)*
            }

            #[allow(non_snake_case)]
            unsafe fn write_components(self, ptrs: &[*mut u8]) {
                let ($($T,)*) = self;
                let mut i = 0;
                $(
                    std::ptr::write(ptrs[i] as *mut $T, $T);
                    i += 1;
                )*
                let _ = i; // Suppress unused warning
            }
        }
    };
}

// Implement for tuples of 1-8 components
impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);
