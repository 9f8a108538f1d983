//! Conflict resolution for concurrent cross-region writes.

use chrono::{DateTime, Utc};

use crate::clock::VectorClock;

/// The metadata a resolver sees for each side of a conflict.
#[derive(Debug, Clone)]
pub struct ReplicaMeta {
    /// The version ID of this side's write.
    pub version_id: String,
    /// This side's vector clock.
    pub clock: VectorClock,
    /// This side's wall-clock write time.
    pub wall_clock: DateTime<Utc>,
}

/// Which side of a conflict survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// Keep the local state; the incoming write is discarded.
    Local,
    /// Apply the incoming write over the local state.
    Remote,
}

/// Resolves concurrent writes that vector clocks cannot order.
pub trait ConflictResolver: Send + Sync {
    /// Pick the surviving side.
    fn resolve(&self, local: &ReplicaMeta, remote: &ReplicaMeta) -> Winner;
}

/// The default resolver: Last-Write-Wins by wall clock, remote winning
/// ties (so replays converge on the incoming state).
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl ConflictResolver for LastWriteWins {
    fn resolve(&self, local: &ReplicaMeta, remote: &ReplicaMeta) -> Winner {
        if remote.wall_clock >= local.wall_clock {
            Winner::Remote
        } else {
            Winner::Local
        }
    }
}
