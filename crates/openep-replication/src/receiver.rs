//! Receiver-side clock merging and conflict decisions.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::clock::{ClockOrdering, VectorClock};
use crate::resolver::{ConflictResolver, ReplicaMeta, Winner};

/// What the receiver should do with an incoming replicated write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The incoming write is causally stale; drop it.
    Stale,
    /// The incoming write strictly supersedes local state; apply it.
    Apply,
    /// Concurrent and the resolver chose the incoming write; apply it.
    ResolvedRemote,
    /// Concurrent and the resolver chose the local state; drop the write.
    ResolvedLocal,
}

impl ApplyOutcome {
    /// Whether the incoming write should be applied to local stores.
    #[must_use]
    pub fn should_apply(self) -> bool {
        matches!(self, Self::Apply | Self::ResolvedRemote)
    }
}

/// Per-`(bucket, key)` replica state on the receiving side.
///
/// Every decision merges the incoming clock into the stored clock
/// (element-wise max), so causal history is never lost even for dropped
/// writes.
pub struct ReplicaReceiver {
    clocks: DashMap<(String, String), ReplicaMeta>,
    resolver: Arc<dyn ConflictResolver>,
}

impl std::fmt::Debug for ReplicaReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaReceiver")
            .field("tracked_keys", &self.clocks.len())
            .finish_non_exhaustive()
    }
}

impl ReplicaReceiver {
    /// Create a receiver with the given resolver.
    #[must_use]
    pub fn new(resolver: Arc<dyn ConflictResolver>) -> Self {
        Self {
            clocks: DashMap::new(),
            resolver,
        }
    }

    /// Decide whether an incoming write for `(bucket, key)` applies, and
    /// merge its clock into the stored clock.
    pub fn decide(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
        incoming_clock: &VectorClock,
        incoming_wall: DateTime<Utc>,
    ) -> ApplyOutcome {
        let map_key = (bucket.to_owned(), key.to_owned());
        let mut entry = self.clocks.entry(map_key).or_insert_with(|| ReplicaMeta {
            version_id: String::new(),
            clock: VectorClock::new(),
            wall_clock: DateTime::<Utc>::MIN_UTC,
        });

        let ordering = incoming_clock.compare(&entry.clock);
        let outcome = match ordering {
            ClockOrdering::Less | ClockOrdering::Equal => ApplyOutcome::Stale,
            ClockOrdering::Greater => ApplyOutcome::Apply,
            ClockOrdering::Concurrent => {
                let remote = ReplicaMeta {
                    version_id: version_id.to_owned(),
                    clock: incoming_clock.clone(),
                    wall_clock: incoming_wall,
                };
                match self.resolver.resolve(&entry, &remote) {
                    Winner::Remote => ApplyOutcome::ResolvedRemote,
                    Winner::Local => ApplyOutcome::ResolvedLocal,
                }
            }
        };

        // Causal history is merged regardless of the outcome.
        entry.clock.merge(incoming_clock);
        if outcome.should_apply() {
            entry.version_id = version_id.to_owned();
            entry.wall_clock = incoming_wall;
        }

        debug!(
            bucket,
            key,
            version_id,
            ordering = ?ordering,
            outcome = ?outcome,
            "incoming replica decision"
        );
        outcome
    }

    /// The stored clock for `(bucket, key)`, if any write was seen.
    #[must_use]
    pub fn clock(&self, bucket: &str, key: &str) -> Option<VectorClock> {
        self.clocks
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|meta| meta.clock.clone())
    }

    /// Record a local write so later incoming writes compare against it.
    pub fn record_local(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
        clock: VectorClock,
        wall_clock: DateTime<Utc>,
    ) {
        self.clocks.insert(
            (bucket.to_owned(), key.to_owned()),
            ReplicaMeta {
                version_id: version_id.to_owned(),
                clock,
                wall_clock,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::LastWriteWins;
    use openep_core::RegionId;

    fn receiver() -> ReplicaReceiver {
        ReplicaReceiver::new(Arc::new(LastWriteWins))
    }

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        let mut vc = VectorClock::new();
        for (region, count) in entries {
            for _ in 0..*count {
                vc.increment(&RegionId::new(*region));
            }
        }
        vc
    }

    #[test]
    fn test_should_apply_strictly_newer_write() {
        let receiver = receiver();
        receiver.record_local("b", "k", "v1", clock(&[("A", 1)]), Utc::now());

        let outcome = receiver.decide("b", "k", "v2", &clock(&[("A", 2)]), Utc::now());
        assert_eq!(outcome, ApplyOutcome::Apply);
    }

    #[test]
    fn test_should_drop_stale_write() {
        let receiver = receiver();
        receiver.record_local("b", "k", "v2", clock(&[("A", 2)]), Utc::now());

        let outcome = receiver.decide("b", "k", "v1", &clock(&[("A", 1)]), Utc::now());
        assert_eq!(outcome, ApplyOutcome::Stale);
        // The stored clock keeps its maximum.
        let stored = receiver.clock("b", "k").expect("clock");
        assert_eq!(stored.get(&RegionId::new("A")), 2);
    }

    #[test]
    fn test_should_resolve_concurrent_writes_and_merge_clocks() {
        let receiver = receiver();
        // Local {A:3, B:1}, written slightly in the past.
        receiver.record_local(
            "b",
            "k",
            "local-v",
            clock(&[("A", 3), ("B", 1)]),
            Utc::now() - chrono::Duration::seconds(10),
        );

        // Incoming {A:2, B:2}: concurrent; LWW picks the newer remote.
        let outcome = receiver.decide("b", "k", "remote-v", &clock(&[("A", 2), ("B", 2)]), Utc::now());
        assert_eq!(outcome, ApplyOutcome::ResolvedRemote);

        // Merged stored clock is {A:3, B:2}.
        let stored = receiver.clock("b", "k").expect("clock");
        assert_eq!(stored.get(&RegionId::new("A")), 3);
        assert_eq!(stored.get(&RegionId::new("B")), 2);
    }

    #[test]
    fn test_should_keep_local_when_it_is_newer_in_conflict() {
        let receiver = receiver();
        receiver.record_local("b", "k", "local-v", clock(&[("A", 3)]), Utc::now());

        let outcome = receiver.decide(
            "b",
            "k",
            "remote-v",
            &clock(&[("B", 1)]),
            Utc::now() - chrono::Duration::seconds(60),
        );
        assert_eq!(outcome, ApplyOutcome::ResolvedLocal);
    }

    #[test]
    fn test_should_apply_first_write_for_unknown_key() {
        let receiver = receiver();
        let outcome = receiver.decide("b", "new", "v1", &clock(&[("A", 1)]), Utc::now());
        assert_eq!(outcome, ApplyOutcome::Apply);
    }
}
