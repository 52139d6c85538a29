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

//! TTL-aware LRU store for cached query results.
//!
//! Wraps `lru::LruCache`; entries expire by age independently of recency.
//! Expired entries are treated as absent, removed lazily on touch and
//! opportunistically during a periodic sweep.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::entity::EntityId;
use crate::query::QueryFingerprint;

/// Sweep cadence in insertions
const SWEEP_INTERVAL: usize = 100;

/// A memoized query result: owned entity ids plus the metadata needed to
/// decide whether the entry is still usable. Component values are never
/// cached; hits refetch them from the live world.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub entities: Vec<EntityId>,
    pub fingerprint: QueryFingerprint,
    pub created_at: Instant,
    pub ttl: Duration,
    pub world_version: u64,
    pub size_bytes: usize,
    pub access_count: usize,
    pub last_access: Instant,
}

impl CacheEntry {
    pub fn new(
        entities: Vec<EntityId>,
        fingerprint: QueryFingerprint,
        ttl: Duration,
        world_version: u64,
    ) -> Self {
        let now = Instant::now();
        let size_bytes = std::mem::size_of::<CacheEntry>()
            + entities.capacity() * std::mem::size_of::<EntityId>();
        Self {
            entities,
            fingerprint,
            created_at: now,
            ttl,
            world_version,
            size_bytes,
            access_count: 0,
            last_access: now,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }

    fn touch(&mut self, now: Instant) {
        self.access_count += 1;
        self.last_access = now;
    }
}

/// LRU map with per-entry TTL.
pub struct TtlLru {
    map: LruCache<QueryFingerprint, CacheEntry>,
    insertions_since_sweep: usize,
    memory_bytes: usize,
    pub(crate) evictions: usize,
    pub(crate) expirations: usize,
}

impl TtlLru {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero");
        Self {
            map: LruCache::new(capacity),
            insertions_since_sweep: 0,
            memory_bytes: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn memory_bytes(&self) -> usize {
        self.memory_bytes
    }

    /// Fetch and touch. Expired entries are removed and reported as absent.
    pub fn get(&mut self, key: &QueryFingerprint, now: Instant) -> Option<&CacheEntry> {
        let expired = self
            .map
            .peek(key)
            .map(|entry| entry.is_expired(now))
            .unwrap_or(false);
        if expired {
            if let Some(entry) = self.map.pop(key) {
                self.memory_bytes -= entry.size_bytes;
                self.expirations += 1;
            }
            return None;
        }

        let entry = self.map.get_mut(key)?;
        entry.touch(now);
        Some(entry)
    }

    /// Insert, evicting the LRU tail past capacity. Expired entries are
    /// swept first so a dead head never costs a live tail its slot.
    pub fn put(&mut self, key: QueryFingerprint, entry: CacheEntry) -> Option<QueryFingerprint> {
        self.insertions_since_sweep += 1;
        if self.insertions_since_sweep >= SWEEP_INTERVAL {
            self.sweep_expired(Instant::now());
            self.insertions_since_sweep = 0;
        }

        self.memory_bytes += entry.size_bytes;
        match self.map.push(key, entry) {
            Some((old_key, old_entry)) => {
                self.memory_bytes -= old_entry.size_bytes;
                if old_key != key {
                    self.evictions += 1;
                    Some(old_key)
                } else {
                    None
                }
            }
            None => None,
        }
    }

    pub fn remove(&mut self, key: &QueryFingerprint) -> Option<CacheEntry> {
        let entry = self.map.pop(key)?;
        self.memory_bytes -= entry.size_bytes;
        Some(entry)
    }

    /// Drop every expired entry. Returns the keys removed so version and
    /// dependency maps can forget them too.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<QueryFingerprint> {
        let dead: Vec<QueryFingerprint> = self
            .map
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| *key)
            .collect();
        for key in &dead {
            if let Some(entry) = self.map.pop(key) {
                self.memory_bytes -= entry.size_bytes;
                self.expirations += 1;
            }
        }
        dead
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.memory_bytes = 0;
        self.insertions_since_sweep = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::Signature;

    fn fp(n: u64) -> QueryFingerprint {
        QueryFingerprint {
            required: Signature::new(),
            predicate_hash: n,
            flags: Default::default(),
        }
    }

    fn entry(ttl: Duration) -> CacheEntry {
        CacheEntry::new(Vec::new(), fp(0), ttl, 1)
    }

    #[test]
    fn test_capacity_bound_holds() {
        let mut lru = TtlLru::new(4);
        for i in 0..100 {
            lru.put(fp(i), entry(Duration::from_secs(60)));
        }
        assert_eq!(lru.len(), 4);
        assert!(lru.evictions >= 96);
    }

    #[test]
    fn test_lru_order_evicts_tail() {
        let mut lru = TtlLru::new(2);
        let now = Instant::now();
        lru.put(fp(1), entry(Duration::from_secs(60)));
        lru.put(fp(2), entry(Duration::from_secs(60)));

        // Touch 1 so 2 becomes the tail
        assert!(lru.get(&fp(1), now).is_some());
        lru.put(fp(3), entry(Duration::from_secs(60)));

        assert!(lru.get(&fp(1), now).is_some());
        assert!(lru.get(&fp(2), now).is_none());
        assert!(lru.get(&fp(3), now).is_some());
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let mut lru = TtlLru::new(4);
        lru.put(fp(1), entry(Duration::ZERO));

        let later = Instant::now() + Duration::from_millis(10);
        assert!(lru.get(&fp(1), later).is_none());
        assert_eq!(lru.expirations, 1);
        assert_eq!(lru.len(), 0);
    }

    #[test]
    fn test_access_metadata_updates() {
        let mut lru = TtlLru::new(4);
        lru.put(fp(1), entry(Duration::from_secs(60)));

        let now = Instant::now();
        lru.get(&fp(1), now);
        let seen = lru.get(&fp(1), now).unwrap();
        assert_eq!(seen.access_count, 2);
    }

    #[test]
    fn test_memory_accounting() {
        let mut lru = TtlLru::new(8);
        let e = CacheEntry::new(vec![], fp(1), Duration::from_secs(1), 1);
        let size = e.size_bytes;
        lru.put(fp(1), e);
        assert_eq!(lru.memory_bytes(), size);
        lru.remove(&fp(1));
        assert_eq!(lru.memory_bytes(), 0);
    }
}
