//! Per-pod usage memory and per-label running sums.
//!
//! The store is shared by all dispatch workers. Workers never hold the same
//! pod key at once, but different keys touch the same label sums, so both
//! maps are sharded [`DashMap`]s.

use std::collections::{BTreeMap, BTreeSet};

use dashmap::DashMap;

use super::usage_tracker::combination_key;

/// Plugin types remembered for each counted pod, plus the running sum of
/// every label the tracker has emitted.
#[derive(Debug, Default)]
pub struct UsageStore {
    /// Pod key (`namespace/name`) to the plugin types it was counted under.
    /// An empty set means "counted, but no plugin type resolved".
    tracked: DashMap<String, BTreeSet<String>>,
    /// Label to cumulative delta
    sums: DashMap<String, i64>,
}

impl UsageStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Combination label last counted for `key`, or `None` when untracked
    pub fn remembered(&self, key: &str) -> Option<String> {
        self.tracked.get(key).map(|entry| combination_key(entry.value()))
    }

    /// Record the plugin types counted for `key`
    pub fn remember(&self, key: &str, types: BTreeSet<String>) {
        self.tracked.insert(key.to_string(), types);
    }

    /// Stop tracking `key`, returning the types it was counted under
    pub fn forget(&self, key: &str) -> Option<BTreeSet<String>> {
        self.tracked.remove(key).map(|(_, types)| types)
    }

    /// Number of pods currently counted
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Apply `delta` to the running sum of `label`.
    ///
    /// `observe` runs with the new sum while the label's shard is still
    /// locked, so observers of the same label see sums in order.
    pub fn adjust<F>(&self, label: &str, delta: i64, observe: F) -> i64
    where
        F: FnOnce(i64),
    {
        let mut sum = self.sums.entry(label.to_string()).or_insert(0);
        *sum += delta;
        let current = *sum;
        observe(current);
        current
    }

    /// Current running sum of `label`
    pub fn running_sum(&self, label: &str) -> i64 {
        self.sums.get(label).map(|sum| *sum).unwrap_or(0)
    }

    /// Snapshot of all non-zero running sums, ordered by label
    pub fn sums(&self) -> BTreeMap<String, i64> {
        self.sums
            .iter()
            .filter(|entry| *entry.value() != 0)
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}
