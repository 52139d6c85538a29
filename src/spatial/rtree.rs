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

//! R-tree spatial index.
//!
//! Height-balanced tree of AABBs with fan-out `MAX_ENTRIES` and minimum fill
//! `MAX_ENTRIES / 2`. Insertion descends into the child whose box grows
//! least; overflowing nodes split with a linear seed pick, and splits
//! propagate upward to the root. Best for non-uniform distributions or
//! worlds with large empty regions.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use glam::Vec3;

use crate::entity::EntityId;

use super::{Aabb, Region, SpatialIndex};

const MAX_ENTRIES: usize = 16;
const MIN_ENTRIES: usize = MAX_ENTRIES / 2;

#[derive(Debug, Clone, Copy)]
struct LeafEntry {
    entity: EntityId,
    position: Vec3,
}

enum Node {
    Leaf {
        bounds: Aabb,
        entries: Vec<LeafEntry>,
    },
    Internal {
        bounds: Aabb,
        children: Vec<Node>,
    },
}

impl Node {
    fn empty_leaf() -> Node {
        Node::Leaf {
            bounds: Aabb::empty(),
            entries: Vec::with_capacity(MAX_ENTRIES + 1),
        }
    }

    fn bounds(&self) -> Aabb {
        match self {
            Node::Leaf { bounds, .. } | Node::Internal { bounds, .. } => *bounds,
        }
    }

    fn recompute_bounds(&mut self) {
        match self {
            Node::Leaf { bounds, entries } => {
                let mut b = Aabb::empty();
                for e in entries.iter() {
                    b.expand_point(e.position);
                }
                *bounds = b;
            }
            Node::Internal { bounds, children } => {
                let mut b = Aabb::empty();
                for c in children.iter() {
                    b.expand(&c.bounds());
                }
                *bounds = b;
            }
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Node::Leaf { entries, .. } => entries.is_empty(),
            Node::Internal { children, .. } => children.is_empty(),
        }
    }

    /// Insert an entry, returning a split-off sibling when this node
    /// overflowed. The caller owns propagating the sibling upward.
    fn insert(&mut self, entry: LeafEntry) -> Option<Node> {
        match self {
            Node::Leaf { bounds, entries } => {
                bounds.expand_point(entry.position);
                entries.push(entry);
                if entries.len() > MAX_ENTRIES {
                    Some(split_leaf(bounds, entries))
                } else {
                    None
                }
            }
            Node::Internal { bounds, children } => {
                let target = choose_child(children, entry.position);
                bounds.expand_point(entry.position);
                if let Some(sibling) = children[target].insert(entry) {
                    children.push(sibling);
                    if children.len() > MAX_ENTRIES {
                        return Some(split_internal(bounds, children));
                    }
                }
                None
            }
        }
    }

    /// Remove the entry for `entity`, guided by its last known position.
    /// Returns whether anything was removed; bounds along the path shrink
    /// and emptied children are dropped.
    fn remove(&mut self, entity: EntityId, position: Vec3, exhaustive: bool) -> bool {
        match self {
            Node::Leaf { entries, .. } => {
                let found = entries.iter().position(|e| e.entity == entity);
                match found {
                    Some(idx) => {
                        entries.swap_remove(idx);
                        self.recompute_bounds();
                        true
                    }
                    None => false,
                }
            }
            Node::Internal { children, .. } => {
                let mut removed = false;
                for child in children.iter_mut() {
                    let guided = exhaustive || child.bounds().contains(position);
                    if guided && child.remove(entity, position, exhaustive) {
                        removed = true;
                        break;
                    }
                }
                if removed {
                    children.retain(|c| !c.is_empty());
                    self.recompute_bounds();
                }
                removed
            }
        }
    }

    fn query_region(&self, region: &Region, out: &mut Vec<EntityId>) {
        if !region.intersects_aabb(&self.bounds()) {
            return;
        }
        match self {
            Node::Leaf { entries, .. } => {
                for e in entries {
                    if region.contains(e.position) {
                        out.push(e.entity);
                    }
                }
            }
            Node::Internal { children, .. } => {
                for c in children {
                    c.query_region(region, out);
                }
            }
        }
    }
}

/// Least-margin-enlargement descent, ties broken by the smaller box.
fn choose_child(children: &[Node], p: Vec3) -> usize {
    let mut best = 0;
    let mut best_growth = f32::INFINITY;
    let mut best_margin = f32::INFINITY;

    for (i, child) in children.iter().enumerate() {
        let before = child.bounds();
        let mut after = before;
        after.expand_point(p);
        let growth = after.margin() - before.margin();
        let margin = before.margin();
        if growth < best_growth || (growth == best_growth && margin < best_margin) {
            best = i;
            best_growth = growth;
            best_margin = margin;
        }
    }
    best
}

/// Longest axis of the separation between two boxes' centers.
fn seed_axis(bounds: &Aabb) -> usize {
    let size = bounds.max - bounds.min;
    if size.x >= size.y && size.x >= size.z {
        0
    } else if size.y >= size.z {
        1
    } else {
        2
    }
}

fn axis_value(p: Vec3, axis: usize) -> f32 {
    match axis {
        0 => p.x,
        1 => p.y,
        _ => p.z,
    }
}

/// Linear split: seeds are the extreme entries along the node's longest
/// axis; the rest distribute by least enlargement with min-fill forcing.
fn split_leaf(bounds: &mut Aabb, entries: &mut Vec<LeafEntry>) -> Node {
    let axis = seed_axis(bounds);
    let (mut lo_idx, mut hi_idx) = (0, 0);
    for (i, e) in entries.iter().enumerate() {
        if axis_value(e.position, axis) < axis_value(entries[lo_idx].position, axis) {
            lo_idx = i;
        }
        if axis_value(e.position, axis) > axis_value(entries[hi_idx].position, axis) {
            hi_idx = i;
        }
    }
    if lo_idx == hi_idx {
        hi_idx = (lo_idx + 1) % entries.len();
    }

    let mut rest: Vec<LeafEntry> = Vec::with_capacity(entries.len());
    let hi_seed = entries[hi_idx];
    let lo_seed = entries[lo_idx];
    for (i, e) in entries.drain(..).enumerate() {
        if i != lo_idx && i != hi_idx {
            rest.push(e);
        }
    }

    let mut left = vec![lo_seed];
    let mut right = vec![hi_seed];
    let mut left_bounds = Aabb::point(lo_seed.position);
    let mut right_bounds = Aabb::point(hi_seed.position);

    let mut remaining = rest.len();
    for e in rest {
        // Force the assignment when a side must take everything left to
        // reach min fill
        let force_left = left.len() + remaining <= MIN_ENTRIES;
        let force_right = right.len() + remaining <= MIN_ENTRIES;
        remaining -= 1;

        let go_left = if force_left {
            true
        } else if force_right {
            false
        } else {
            let mut l = left_bounds;
            l.expand_point(e.position);
            let mut r = right_bounds;
            r.expand_point(e.position);
            (l.margin() - left_bounds.margin()) <= (r.margin() - right_bounds.margin())
        };

        if go_left {
            left_bounds.expand_point(e.position);
            left.push(e);
        } else {
            right_bounds.expand_point(e.position);
            right.push(e);
        }
    }

    *entries = left;
    *bounds = left_bounds;
    Node::Leaf {
        bounds: right_bounds,
        entries: right,
    }
}

fn split_internal(bounds: &mut Aabb, children: &mut Vec<Node>) -> Node {
    let axis = seed_axis(bounds);
    let (mut lo_idx, mut hi_idx) = (0, 0);
    for (i, c) in children.iter().enumerate() {
        if axis_value(c.bounds().center(), axis)
            < axis_value(children[lo_idx].bounds().center(), axis)
        {
            lo_idx = i;
        }
        if axis_value(c.bounds().center(), axis)
            > axis_value(children[hi_idx].bounds().center(), axis)
        {
            hi_idx = i;
        }
    }
    if lo_idx == hi_idx {
        hi_idx = (lo_idx + 1) % children.len();
    }

    // Remove the larger index first so the smaller one stays valid
    let (bigger, smaller) = if lo_idx > hi_idx {
        (lo_idx, hi_idx)
    } else {
        (hi_idx, lo_idx)
    };
    let first = children.swap_remove(bigger);
    let second = children.swap_remove(smaller);
    let (lo_seed, hi_seed) = if lo_idx > hi_idx {
        (first, second)
    } else {
        (second, first)
    };

    let mut left_bounds = lo_seed.bounds();
    let mut right_bounds = hi_seed.bounds();
    let mut left = vec![lo_seed];
    let mut right = vec![hi_seed];

    let rest: Vec<Node> = children.drain(..).collect();
    let mut remaining = rest.len();
    for c in rest {
        let force_left = left.len() + remaining <= MIN_ENTRIES;
        let force_right = right.len() + remaining <= MIN_ENTRIES;
        remaining -= 1;

        let cb = c.bounds();
        let go_left = if force_left {
            true
        } else if force_right {
            false
        } else {
            let mut l = left_bounds;
            l.expand(&cb);
            let mut r = right_bounds;
            r.expand(&cb);
            (l.margin() - left_bounds.margin()) <= (r.margin() - right_bounds.margin())
        };

        if go_left {
            left_bounds.expand(&cb);
            left.push(c);
        } else {
            right_bounds.expand(&cb);
            right.push(c);
        }
    }

    *children = left;
    *bounds = left_bounds;
    Node::Internal {
        bounds: right_bounds,
        children: right,
    }
}

/// R-tree spatial index over entity positions.
pub struct RTree {
    root: Node,
    len: usize,
}

impl Default for RTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RTree {
    pub fn new() -> Self {
        Self {
            root: Node::empty_leaf(),
            len: 0,
        }
    }
}

impl SpatialIndex for RTree {
    fn insert(&mut self, entity: EntityId, position: Vec3) {
        let entry = LeafEntry { entity, position };
        if let Some(sibling) = self.root.insert(entry) {
            // Root split: grow the tree by one level
            let old_root = std::mem::replace(&mut self.root, Node::empty_leaf());
            let mut bounds = old_root.bounds();
            bounds.expand(&sibling.bounds());
            self.root = Node::Internal {
                bounds,
                children: vec![old_root, sibling],
            };
        }
        self.len += 1;
    }

    fn remove(&mut self, entity: EntityId, last_known_position: Vec3) -> bool {
        let removed = self.root.remove(entity, last_known_position, false)
            // Stale position: fall back to a full scan so a missed update
            // upstream cannot leak the entry
            || self.root.remove(entity, last_known_position, true);
        if removed {
            self.len -= 1;
            // Collapse a single-child root to keep height minimal
            loop {
                let replace = match &mut self.root {
                    Node::Internal { children, .. } if children.len() == 1 => {
                        Some(children.pop().expect("one child"))
                    }
                    _ => None,
                };
                match replace {
                    Some(child) => self.root = child,
                    None => break,
                }
            }
        }
        removed
    }

    fn query_region(&self, region: &Region, out: &mut Vec<EntityId>) {
        self.root.query_region(region, out);
    }

    fn query_nearest(&self, center: Vec3, k: usize) -> Vec<(EntityId, f32)> {
        if k == 0 || self.len == 0 {
            return Vec::new();
        }

        // Best-first traversal keyed by squared distance to the node box or
        // leaf point
        enum Item<'t> {
            Node(&'t Node),
            Entry(LeafEntry),
        }

        struct Queued<'t> {
            dist2: f32,
            item: Item<'t>,
        }

        impl PartialEq for Queued<'_> {
            fn eq(&self, other: &Self) -> bool {
                self.dist2 == other.dist2
            }
        }
        impl Eq for Queued<'_> {}
        impl PartialOrd for Queued<'_> {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }
        impl Ord for Queued<'_> {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.dist2.total_cmp(&other.dist2)
            }
        }

        let mut heap: BinaryHeap<Reverse<Queued<'_>>> = BinaryHeap::new();
        heap.push(Reverse(Queued {
            dist2: self.root.bounds().distance_squared(center),
            item: Item::Node(&self.root),
        }));

        let mut results = Vec::with_capacity(k);
        while let Some(Reverse(next)) = heap.pop() {
            match next.item {
                Item::Entry(entry) => {
                    results.push((entry.entity, next.dist2));
                    if results.len() == k {
                        break;
                    }
                }
                Item::Node(Node::Leaf { entries, .. }) => {
                    for e in entries {
                        heap.push(Reverse(Queued {
                            dist2: (e.position - center).length_squared(),
                            item: Item::Entry(*e),
                        }));
                    }
                }
                Item::Node(Node::Internal { children, .. }) => {
                    for c in children {
                        heap.push(Reverse(Queued {
                            dist2: c.bounds().distance_squared(center),
                            item: Item::Node(c),
                        }));
                    }
                }
            }
        }

        results
    }

    fn clear(&mut self) {
        self.root = Node::empty_leaf();
        self.len = 0;
    }

    fn len(&self) -> usize {
        self.len
    }
}
