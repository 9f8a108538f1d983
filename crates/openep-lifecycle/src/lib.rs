//! Lifecycle rule processing for OpenEndpoint.
//!
//! A periodic scan walks every bucket with at least one enabled rule,
//! gathers expiration and transition candidates by *listing* the bucket
//! under each rule's filter, and applies actions in ascending rule
//! priority (the first applicable action of a type wins per version).
//! Re-running the scan is a no-op for versions it already acted on.

mod matcher;
mod processor;

pub use matcher::{filter_matches, rule_due_days};
pub use processor::{
    LifecycleBackend, LifecycleCandidate, LifecycleProcessor, LifecycleStats,
};
