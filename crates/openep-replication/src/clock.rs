//! Vector clocks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use openep_core::RegionId;

/// How two vector clocks relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    /// Every counter is ≤ the other's, at least one strictly less.
    Less,
    /// Every counter is ≥ the other's, at least one strictly greater.
    Greater,
    /// All counters equal.
    Equal,
    /// Each clock has a counter ahead of the other: a true conflict.
    Concurrent,
}

/// A mapping of region to monotonic counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    counters: BTreeMap<RegionId, u64>,
}

impl VectorClock {
    /// An all-zero clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The counter for one region (zero when absent).
    #[must_use]
    pub fn get(&self, region: &RegionId) -> u64 {
        self.counters.get(region).copied().unwrap_or(0)
    }

    /// Advance one region's counter and return its new value.
    pub fn increment(&mut self, region: &RegionId) -> u64 {
        let counter = self.counters.entry(region.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Merge element-wise, keeping the maximum of each counter.
    pub fn merge(&mut self, other: &Self) {
        for (region, &counter) in &other.counters {
            let entry = self.counters.entry(region.clone()).or_insert(0);
            *entry = (*entry).max(counter);
        }
    }

    /// Compare against another clock.
    #[must_use]
    pub fn compare(&self, other: &Self) -> ClockOrdering {
        let mut less = false;
        let mut greater = false;

        for region in self.counters.keys().chain(other.counters.keys()) {
            let mine = self.get(region);
            let theirs = other.get(region);
            if mine < theirs {
                less = true;
            } else if mine > theirs {
                greater = true;
            }
        }

        match (less, greater) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Less,
            (false, true) => ClockOrdering::Greater,
            (true, true) => ClockOrdering::Concurrent,
        }
    }
}

impl<const N: usize> From<[(RegionId, u64); N]> for VectorClock {
    fn from(entries: [(RegionId, u64); N]) -> Self {
        Self {
            counters: entries.into_iter().collect(),
        }
    }
}
