//! The periodic lifecycle processor.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use openep_core::EndpointResult;
use openep_meta::{LifecycleAction, LifecycleConfig, LifecycleRule, RuleStatus};

use crate::matcher::{filter_matches, rule_due_days};

/// One current version under lifecycle consideration.
#[derive(Debug, Clone)]
pub struct LifecycleCandidate {
    /// The object key.
    pub key: String,
    /// The version ID.
    pub version_id: String,
    /// Payload size in bytes.
    pub size: u64,
    /// When the version was created.
    pub created_at: DateTime<Utc>,
    /// The version's tags.
    pub tags: Vec<(String, String)>,
    /// The version's current storage class.
    pub storage_class: String,
}

/// What the storage plane exposes to the processor.
///
/// The pipeline implements this over its stores; lifecycle actions go
/// through the same delete/transition paths as user requests so refcounts
/// and events stay correct.
pub trait LifecycleBackend: Send + Sync {
    /// Buckets that carry a lifecycle configuration.
    fn buckets_with_lifecycle(&self) -> Vec<(String, LifecycleConfig)>;

    /// Current (non-delete-marker) versions under `prefix` in a bucket.
    fn list_current(&self, bucket: &str, prefix: &str) -> Vec<LifecycleCandidate>;

    /// Expire one version: delete it per the bucket's versioning semantics
    /// (delete marker when enabled, physical removal otherwise).
    fn expire(&self, bucket: &str, key: &str) -> EndpointResult<()>;

    /// Mark a version with a new storage class.
    fn transition(&self, bucket: &str, key: &str, version_id: &str, storage_class: &str)
    -> EndpointResult<()>;

    /// Abort multipart uploads initiated before `cutoff`. Returns how many
    /// were aborted.
    fn abort_uploads_before(&self, bucket: &str, cutoff: DateTime<Utc>) -> EndpointResult<usize>;
}

/// Counters from one lifecycle scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleStats {
    /// Versions expired.
    pub expired: usize,
    /// Versions transitioned to a new storage class.
    pub transitioned: usize,
    /// Multipart uploads aborted.
    pub aborted_uploads: usize,
}

// ---------------------------------------------------------------------------
// LifecycleProcessor
// ---------------------------------------------------------------------------

/// The long-lived lifecycle task.
pub struct LifecycleProcessor {
    backend: Arc<dyn LifecycleBackend>,
    interval: StdDuration,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LifecycleProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleProcessor")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl LifecycleProcessor {
    /// Create a processor scanning every `interval`.
    #[must_use]
    pub fn new(backend: Arc<dyn LifecycleBackend>, interval: StdDuration) -> Self {
        Self {
            backend,
            interval,
            shutdown: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the periodic scan task.
    pub fn start(self: &Arc<Self>) {
        let (tx, mut shutdown) = watch::channel(false);
        let processor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(processor.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Consume the immediate first tick so the first scan happens one
            // full interval after start.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => {
                        debug!("lifecycle processor shutting down");
                        return;
                    }
                }
                match processor.run_once() {
                    Ok(stats) => {
                        if stats != LifecycleStats::default() {
                            info!(
                                expired = stats.expired,
                                transitioned = stats.transitioned,
                                aborted_uploads = stats.aborted_uploads,
                                "lifecycle scan applied actions"
                            );
                        }
                    }
                    Err(e) => warn!(error = %e, "lifecycle scan failed"),
                }
            }
        });
        *self.worker.lock() = Some(handle);
        *self.shutdown.lock() = Some(tx);
        info!(interval_secs = self.interval.as_secs(), "lifecycle processor started");
    }

    /// Signal shutdown and wait for the scan task to finish its iteration.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "lifecycle worker panicked");
            }
        }
    }

    /// Run one full scan. Also callable directly (tests, admin trigger).
    ///
    /// # Errors
    ///
    /// Returns the first storage error encountered; prior actions of the
    /// scan remain applied (the scan is idempotent, so a rerun converges).
    pub fn run_once(&self) -> EndpointResult<LifecycleStats> {
        let now = Utc::now();
        let mut stats = LifecycleStats::default();

        for (bucket, config) in self.backend.buckets_with_lifecycle() {
            // Enabled rules in ascending priority; first applicable action
            // of a kind wins per version.
            let mut rules: Vec<&LifecycleRule> = config
                .rules
                .iter()
                .filter(|r| r.status == RuleStatus::Enabled)
                .collect();
            rules.sort_by_key(|r| r.priority);
            if rules.is_empty() {
                continue;
            }

            self.scan_bucket(&bucket, &rules, now, &mut stats)?;
        }
        Ok(stats)
    }

    // -----------------------------------------------------------------------
    // Private
    // -----------------------------------------------------------------------

    fn scan_bucket(
        &self,
        bucket: &str,
        rules: &[&LifecycleRule],
        now: DateTime<Utc>,
        stats: &mut LifecycleStats,
    ) -> EndpointResult<()> {
        // Candidates come from listing under each rule's prefix; a rule's
        // prefix is never itself treated as an object key. The widest
        // listing (empty prefix) is shared across rules.
        let candidates = self.backend.list_current(bucket, "");

        for candidate in &candidates {
            let mut expired = false;
            let mut transitioned = false;

            for rule in rules {
                if expired {
                    break;
                }
                if !filter_matches(&rule.filter, &candidate.key, candidate.size, &candidate.tags) {
                    continue;
                }

                for action in &rule.actions {
                    match action {
                        LifecycleAction::Expiration { days, date } => {
                            let due = days
                                .map(|d| rule_due_days(candidate.created_at, d, now))
                                .or_else(|| date.map(|d| now >= d))
                                .unwrap_or(false);
                            if due && !expired {
                                debug!(bucket, key = %candidate.key, rule = %rule.id, "expiring version");
                                self.backend.expire(bucket, &candidate.key)?;
                                stats.expired += 1;
                                expired = true;
                            }
                        }
                        LifecycleAction::Transition {
                            days,
                            storage_class,
                        } => {
                            let due = rule_due_days(candidate.created_at, *days, now);
                            // Already being in the target class makes the
                            // rerun a no-op.
                            if due
                                && !transitioned
                                && !expired
                                && candidate.storage_class != *storage_class
                            {
                                debug!(
                                    bucket,
                                    key = %candidate.key,
                                    rule = %rule.id,
                                    storage_class = %storage_class,
                                    "transitioning version"
                                );
                                self.backend.transition(
                                    bucket,
                                    &candidate.key,
                                    &candidate.version_id,
                                    storage_class,
                                )?;
                                stats.transitioned += 1;
                                transitioned = true;
                            }
                        }
                        LifecycleAction::AbortIncompleteMultipart { .. } => {
                            // Bucket-scoped; handled below, outside the
                            // per-version walk.
                        }
                    }
                }
            }
        }

        for rule in rules {
            for action in &rule.actions {
                if let LifecycleAction::AbortIncompleteMultipart { days } = action {
                    let cutoff = now - Duration::days(i64::from(*days));
                    stats.aborted_uploads += self.backend.abort_uploads_before(bucket, cutoff)?;
                }
            }
        }

        Ok(())
    }
}
