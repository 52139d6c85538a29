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

//! Multi-tier query result cache.
//!
//! A bloom filter gates an LRU store with TTL. Entries are keyed by query
//! fingerprint and carry the world version they were computed at; version
//! mismatch on read evicts the entry and reports a miss, which is the
//! authoritative invalidation mechanism. The per-component dependency map
//! supports surgical invalidation for callers that want results to survive
//! unrelated mutations.

mod bloom;
mod lru;

pub use bloom::BloomFilter;
pub use lru::{CacheEntry, TtlLru};

use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;

use crate::component::ComponentId;
use crate::entity::EntityId;
use crate::query::QueryFingerprint;

/// Cache behavior counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub bloom_rejects: usize,
    pub version_evictions: usize,
    pub evictions: usize,
    pub expirations: usize,
    pub entries: usize,
    pub memory_bytes: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheInner {
    bloom: BloomFilter,
    store: TtlLru,
    /// World version each fingerprint was computed at
    versions: AHashMap<QueryFingerprint, u64>,
    /// Component type -> fingerprints whose queries consume it
    dependents: AHashMap<ComponentId, AHashSet<QueryFingerprint>>,
    hits: usize,
    misses: usize,
    bloom_rejects: usize,
    version_evictions: usize,
}

impl CacheInner {
    fn forget(&mut self, fingerprint: &QueryFingerprint) {
        self.store.remove(fingerprint);
        self.versions.remove(fingerprint);
        // The bloom filter cannot forget; stale bits only cost a map probe
    }
}

/// Memoizes query results across calls sharing a fingerprint and world
/// version. The bloom filter and LRU live behind one mutex so eviction and
/// insertion cannot race.
pub struct QueryCache {
    inner: Mutex<CacheInner>,
    default_ttl: Duration,
}

impl QueryCache {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                bloom: BloomFilter::with_capacity(max_entries.saturating_mul(2), 0.01),
                store: TtlLru::new(max_entries),
                versions: AHashMap::new(),
                dependents: AHashMap::new(),
                hits: 0,
                misses: 0,
                bloom_rejects: 0,
                version_evictions: 0,
            }),
            default_ttl,
        }
    }

    /// Look up a fingerprint at the given world version. Returns the owned
    /// entity list; the caller refetches component values from the live
    /// world. Version mismatch evicts and misses.
    pub fn get(&self, fingerprint: &QueryFingerprint, world_version: u64) -> Option<Vec<EntityId>> {
        let mut inner = self.inner.lock();

        if !inner.bloom.might_contain(fingerprint.hash64()) {
            inner.bloom_rejects += 1;
            inner.misses += 1;
            return None;
        }

        let stored = inner.versions.get(fingerprint).copied();
        if let Some(stored) = stored {
            if stored != world_version {
                inner.forget(fingerprint);
                inner.version_evictions += 1;
                inner.misses += 1;
                return None;
            }
        }

        let now = Instant::now();
        match inner.store.get(fingerprint, now) {
            Some(entry) => {
                let entities = entry.entities.clone();
                inner.hits += 1;
                Some(entities)
            }
            None => {
                inner.versions.remove(fingerprint);
                inner.misses += 1;
                None
            }
        }
    }

    /// Store a computed result.
    pub fn store(
        &self,
        fingerprint: QueryFingerprint,
        entities: Vec<EntityId>,
        world_version: u64,
        ttl: Option<Duration>,
    ) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut inner = self.inner.lock();

        inner.bloom.add(fingerprint.hash64());
        inner.versions.insert(fingerprint, world_version);
        for component in fingerprint.required.iter() {
            inner
                .dependents
                .entry(component)
                .or_default()
                .insert(fingerprint);
        }

        let entry = CacheEntry::new(entities, fingerprint, ttl, world_version);
        if let Some(evicted) = inner.store.put(fingerprint, entry) {
            inner.versions.remove(&evicted);
        }
    }

    /// Drop one entry, used when a hit fails re-validation against the
    /// store (corruption-as-miss).
    pub fn evict(&self, fingerprint: &QueryFingerprint) {
        self.inner.lock().forget(fingerprint);
    }

    /// Evict every cached result that consumes `component`. Finer-grained
    /// alternative to version bumping.
    pub fn invalidate_component(&self, component: ComponentId) {
        let mut inner = self.inner.lock();
        let Some(fingerprints) = inner.dependents.remove(&component) else {
            return;
        };
        for fingerprint in fingerprints {
            inner.forget(&fingerprint);
        }
        tracing::debug!(component = component.index(), "invalidated dependent queries");
    }

    /// Full reset.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.bloom.clear();
        inner.store.clear();
        inner.versions.clear();
        inner.dependents.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            bloom_rejects: inner.bloom_rejects,
            version_evictions: inner.version_evictions,
            evictions: inner.store.evictions,
            expirations: inner.store.expirations,
            entries: inner.store.len(),
            memory_bytes: inner.store.memory_bytes(),
        }
    }
}
