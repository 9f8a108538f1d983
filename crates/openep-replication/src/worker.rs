//! The replicator: per-target queues and delivery workers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use openep_core::{EndpointResult, RegionId};

use crate::clock::VectorClock;
use crate::op::{OpStatus, ReplicationOp, ReplicationOpKind};

/// Delivers one operation to its destination region.
///
/// Implementations carry the actual wire client; tests use loopback fakes.
#[async_trait::async_trait]
pub trait ReplicationTransport: Send + Sync {
    /// Deliver the operation. A returned error counts against the op's
    /// retry budget.
    async fn deliver(&self, op: &ReplicationOp) -> EndpointResult<()>;
}

/// Tuning knobs for the replicator.
#[derive(Debug, Clone)]
pub struct ReplicatorOptions {
    /// Worker wake-up interval.
    pub tick: Duration,
    /// Delivery attempts before an op is parked as `failed`.
    pub max_retries: u32,
    /// Base of the exponential retry backoff.
    pub backoff_base: Duration,
    /// Upper bound of the retry backoff.
    pub backoff_cap: Duration,
}

impl Default for ReplicatorOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(5),
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

/// One destination region's queue.
struct TargetState {
    region: RegionId,
    active: AtomicBool,
    queue: Mutex<VecDeque<String>>,
}

// ---------------------------------------------------------------------------
// Replicator
// ---------------------------------------------------------------------------

/// The asynchronous replicator.
///
/// Configure targets, then call [`Replicator::start`]; [`Replicator::stop`]
/// drains in-progress deliveries and parks the rest of the queue for the
/// next start.
pub struct Replicator {
    region: RegionId,
    opts: ReplicatorOptions,
    transport: Arc<dyn ReplicationTransport>,
    targets: DashMap<RegionId, Arc<TargetState>>,
    ops: DashMap<String, ReplicationOp>,
    key_clocks: DashMap<(String, String), VectorClock>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Replicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicator")
            .field("region", &self.region)
            .field("targets", &self.targets.len())
            .field("ops", &self.ops.len())
            .finish_non_exhaustive()
    }
}

impl Replicator {
    /// Create a replicator for the local `region`.
    #[must_use]
    pub fn new(
        region: RegionId,
        transport: Arc<dyn ReplicationTransport>,
        opts: ReplicatorOptions,
    ) -> Self {
        Self {
            region,
            opts,
            transport,
            targets: DashMap::new(),
            ops: DashMap::new(),
            key_clocks: DashMap::new(),
            shutdown: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Register a destination region. Targets must be configured before
    /// [`Replicator::start`].
    pub fn add_target(&self, region: RegionId, active: bool) {
        self.targets.entry(region.clone()).or_insert_with(|| {
            Arc::new(TargetState {
                region,
                active: AtomicBool::new(active),
                queue: Mutex::new(VecDeque::new()),
            })
        });
    }

    /// Toggle delivery to a target region. Inactive targets keep queueing.
    pub fn set_target_active(&self, region: &RegionId, active: bool) {
        if let Some(target) = self.targets.get(region) {
            target.active.store(active, Ordering::Release);
        }
    }

    /// Enqueue a write replication for `(bucket, key, version_id)`.
    ///
    /// Stamps the op with the key's vector clock, advanced on the local
    /// region's axis.
    pub fn enqueue_write(
        &self,
        target: &RegionId,
        bucket: &str,
        target_bucket: &str,
        key: &str,
        version_id: &str,
        payload: Bytes,
    ) -> String {
        self.enqueue(
            target,
            ReplicationOpKind::Write,
            bucket,
            target_bucket,
            key,
            version_id,
            Some(payload),
        )
    }

    /// Enqueue a delete replication for `(bucket, key, version_id)`.
    pub fn enqueue_delete(
        &self,
        target: &RegionId,
        bucket: &str,
        target_bucket: &str,
        key: &str,
        version_id: &str,
    ) -> String {
        self.enqueue(
            target,
            ReplicationOpKind::Delete,
            bucket,
            target_bucket,
            key,
            version_id,
            None,
        )
    }

    /// A snapshot of one operation's state.
    #[must_use]
    pub fn get_operation(&self, id: &str) -> Option<ReplicationOp> {
        self.ops.get(id).map(|op| op.clone())
    }

    /// Snapshots of every tracked operation (the status surface).
    #[must_use]
    pub fn operations(&self) -> Vec<ReplicationOp> {
        self.ops.iter().map(|op| op.clone()).collect()
    }

    /// Number of queued (not yet delivered) ops for a target.
    #[must_use]
    pub fn pending_count(&self, region: &RegionId) -> usize {
        self.targets
            .get(region)
            .map(|t| t.queue.lock().len())
            .unwrap_or(0)
    }

    /// The current vector clock for `(bucket, key)` as stamped on outgoing
    /// ops.
    #[must_use]
    pub fn key_clock(&self, bucket: &str, key: &str) -> Option<VectorClock> {
        self.key_clocks
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|c| c.clone())
    }

    /// Spawn one delivery worker per configured target.
    pub fn start(self: &Arc<Self>) {
        let (tx, _) = watch::channel(false);
        let mut workers = self.workers.lock();
        for target in self.targets.iter() {
            let worker = Arc::clone(self);
            let target = Arc::clone(target.value());
            let shutdown = tx.subscribe();
            workers.push(tokio::spawn(async move {
                worker.run_worker(target, shutdown).await;
            }));
        }
        *self.shutdown.lock() = Some(tx);
        info!(region = %self.region, workers = workers.len(), "replication workers started");
    }

    /// Signal shutdown and wait for workers to drain their in-progress op.
    /// Queued ops stay pending for the next start.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "replication worker panicked");
            }
        }
        info!(region = %self.region, "replication workers stopped");
    }

    // -----------------------------------------------------------------------
    // Private
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn enqueue(
        &self,
        target: &RegionId,
        kind: ReplicationOpKind,
        bucket: &str,
        target_bucket: &str,
        key: &str,
        version_id: &str,
        payload: Option<Bytes>,
    ) -> String {
        // Advance the key's clock on the local axis and stamp a snapshot.
        let clock = {
            let mut entry = self
                .key_clocks
                .entry((bucket.to_owned(), key.to_owned()))
                .or_default();
            entry.increment(&self.region);
            entry.clone()
        };

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let op = ReplicationOp {
            id: id.clone(),
            source: self.region.clone(),
            target: target.clone(),
            kind,
            bucket: bucket.to_owned(),
            target_bucket: target_bucket.to_owned(),
            key: key.to_owned(),
            version_id: version_id.to_owned(),
            payload,
            clock,
            wall_clock: now,
            status: OpStatus::Pending,
            retries: 0,
            error: None,
            enqueued_at: now,
            next_attempt_at: now,
        };

        // Targets referenced by replication rules before being configured
        // get an active queue.
        self.add_target(target.clone(), true);
        self.ops.insert(id.clone(), op);
        if let Some(state) = self.targets.get(target) {
            state.queue.lock().push_back(id.clone());
        }
        debug!(target = %target, bucket, key, version_id, op_id = %id, "replication op enqueued");
        id
    }

    async fn run_worker(
        self: Arc<Self>,
        target: Arc<TargetState>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(self.opts.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    debug!(target = %target.region, "replication worker shutting down");
                    return;
                }
            }
            if !target.active.load(Ordering::Acquire) {
                continue;
            }
            self.drain_target(&target, &shutdown).await;
        }
    }

    /// Deliver queued ops for one target until the queue is empty, an op is
    /// still backing off, or shutdown is signaled.
    async fn drain_target(&self, target: &TargetState, shutdown: &watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            let Some(op_id) = target.queue.lock().pop_front() else {
                return;
            };

            // Respect the op's backoff window; the head not being ready
            // means nothing behind it is delivered this tick (FIFO).
            let ready = self
                .ops
                .get(&op_id)
                .is_some_and(|op| op.next_attempt_at <= Utc::now());
            if !ready {
                target.queue.lock().push_front(op_id);
                return;
            }

            let Some(snapshot) = self.mark_in_progress(&op_id) else {
                continue;
            };

            match self.transport.deliver(&snapshot).await {
                Ok(()) => {
                    if let Some(mut op) = self.ops.get_mut(&op_id) {
                        op.status = OpStatus::Completed;
                        op.error = None;
                    }
                    debug!(op_id = %op_id, target = %target.region, "replication delivered");
                }
                Err(e) => self.handle_failure(target, &op_id, &e.to_string()),
            }
        }
    }

    /// Transition an op to `InProgress` and return a delivery snapshot.
    fn mark_in_progress(&self, op_id: &str) -> Option<ReplicationOp> {
        let mut op = self.ops.get_mut(op_id)?;
        op.status = OpStatus::InProgress;
        Some(op.clone())
    }

    /// Apply retry accounting after a failed delivery.
    fn handle_failure(&self, target: &TargetState, op_id: &str, error: &str) {
        let Some(mut op) = self.ops.get_mut(op_id) else {
            return;
        };
        op.retries += 1;
        if op.retries >= self.opts.max_retries {
            op.status = OpStatus::Failed;
            op.error = Some(error.to_owned());
            warn!(
                op_id = %op_id,
                target = %target.region,
                retries = op.retries,
                error,
                "replication op failed permanently"
            );
        } else {
            op.status = OpStatus::Pending;
            op.error = Some(error.to_owned());
            op.next_attempt_at = Utc::now() + self.backoff(op.retries);
            drop(op);
            target.queue.lock().push_back(op_id.to_owned());
            debug!(op_id = %op_id, error, "replication op re-enqueued");
        }
    }

    /// Exponential backoff for the given (1-based) failure count.
    fn backoff(&self, retries: u32) -> chrono::Duration {
        let factor = 2u32.saturating_pow(retries.saturating_sub(1));
        let delay = self
            .opts
            .backoff_base
            .saturating_mul(factor)
            .min(self.opts.backoff_cap);
        chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(30))
    }
}
