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

//! Hot-path tracking and per-fingerprint profiling.
//!
//! The tracker counts executions per query fingerprint and marks a
//! fingerprint hot once its count crosses the threshold. It does not
//! generate specialized code; the engine consults the hot set to take a
//! faster branch (pre-bound archetype lists). The profiler keeps a
//! running-mean execution time per fingerprint. Both can be disabled at
//! construction, turning every record call into a no-op.

use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;

use crate::query::QueryFingerprint;

/// Snapshot row: one fingerprint's accumulated statistics.
#[derive(Debug, Clone, Copy)]
pub struct FingerprintStats {
    pub fingerprint: QueryFingerprint,
    pub executions: u64,
    pub mean_execution: Duration,
    pub is_hot: bool,
}

#[derive(Default)]
struct TrackerInner {
    counts: AHashMap<QueryFingerprint, u64>,
    hot: AHashSet<QueryFingerprint>,
}

/// Execution-count tracker with a hot threshold.
pub struct HotPathTracker {
    enabled: bool,
    threshold: u64,
    inner: Mutex<TrackerInner>,
}

impl HotPathTracker {
    pub fn new(enabled: bool, threshold: usize) -> Self {
        Self {
            enabled,
            threshold: threshold.max(1) as u64,
            inner: Mutex::new(TrackerInner::default()),
        }
    }

    /// Count one execution. Returns whether the fingerprint is hot after
    /// this call.
    pub fn record(&self, fingerprint: QueryFingerprint) -> bool {
        if !self.enabled {
            return false;
        }
        let mut inner = self.inner.lock();
        let count = inner.counts.entry(fingerprint).or_insert(0);
        *count += 1;
        let crossed = *count >= self.threshold;
        if crossed {
            inner.hot.insert(fingerprint);
        }
        crossed
    }

    pub fn is_hot(&self, fingerprint: &QueryFingerprint) -> bool {
        self.enabled && self.inner.lock().hot.contains(fingerprint)
    }

    /// The current hot set, owned.
    pub fn hot_set(&self) -> Vec<QueryFingerprint> {
        if !self.enabled {
            return Vec::new();
        }
        self.inner.lock().hot.iter().copied().collect()
    }

    pub fn execution_count(&self, fingerprint: &QueryFingerprint) -> u64 {
        self.inner
            .lock()
            .counts
            .get(fingerprint)
            .copied()
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.counts.clear();
        inner.hot.clear();
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Timing {
    executions: u64,
    mean_nanos: f64,
}

/// Per-fingerprint running-mean execution times.
pub struct QueryProfiler {
    enabled: bool,
    timings: Mutex<AHashMap<QueryFingerprint, Timing>>,
}

impl QueryProfiler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            timings: Mutex::new(AHashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&self, fingerprint: QueryFingerprint, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        let mut timings = self.timings.lock();
        let timing = timings.entry(fingerprint).or_default();
        timing.executions += 1;
        let n = timing.executions as f64;
        timing.mean_nanos += (elapsed.as_nanos() as f64 - timing.mean_nanos) / n;
    }

    /// Owned snapshot of the accumulated statistics, hot flags filled in by
    /// the caller-supplied tracker.
    pub fn snapshot(&self, tracker: &HotPathTracker) -> Vec<FingerprintStats> {
        let timings = self.timings.lock();
        timings
            .iter()
            .map(|(fingerprint, timing)| FingerprintStats {
                fingerprint: *fingerprint,
                executions: timing.executions,
                mean_execution: Duration::from_nanos(timing.mean_nanos as u64),
                is_hot: tracker.is_hot(fingerprint),
            })
            .collect()
    }

    pub fn mean_execution(&self, fingerprint: &QueryFingerprint) -> Option<Duration> {
        self.timings
            .lock()
            .get(fingerprint)
            .map(|t| Duration::from_nanos(t.mean_nanos as u64))
    }

    pub fn clear(&self) {
        self.timings.lock().clear();
    }
}

/// Pre-bound matched-archetype list for a hot fingerprint, updated
/// incrementally as new archetypes appear.
#[derive(Debug, Clone, Default)]
pub(crate) struct BoundArchetypes {
    pub indices: Vec<usize>,
    pub seen_archetypes: usize,
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

    #[test]
    fn test_crosses_threshold() {
        let tracker = HotPathTracker::new(true, 3);
        assert!(!tracker.record(fp(1)));
        assert!(!tracker.record(fp(1)));
        assert!(tracker.record(fp(1)));
        assert!(tracker.is_hot(&fp(1)));
        assert!(!tracker.is_hot(&fp(2)));
        assert_eq!(tracker.hot_set(), vec![fp(1)]);
    }

    #[test]
    fn test_disabled_is_noop() {
        let tracker = HotPathTracker::new(false, 1);
        for _ in 0..100 {
            tracker.record(fp(1));
        }
        assert!(!tracker.is_hot(&fp(1)));
        assert!(tracker.hot_set().is_empty());
    }

    #[test]
    fn test_profiler_running_mean() {
        let tracker = HotPathTracker::new(true, 1);
        let profiler = QueryProfiler::new(true);

        profiler.record(fp(1), Duration::from_nanos(100));
        profiler.record(fp(1), Duration::from_nanos(300));

        let mean = profiler.mean_execution(&fp(1)).unwrap();
        assert_eq!(mean, Duration::from_nanos(200));

        tracker.record(fp(1));
        let snapshot = profiler.snapshot(&tracker);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].executions, 2);
        assert!(snapshot[0].is_hot);
    }

    #[test]
    fn test_profiler_disabled_records_nothing() {
        let profiler = QueryProfiler::new(false);
        profiler.record(fp(1), Duration::from_secs(1));
        assert!(profiler.mean_execution(&fp(1)).is_none());
    }
}
