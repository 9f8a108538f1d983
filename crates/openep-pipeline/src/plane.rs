//! Storage-plane assembly.
//!
//! [`StoragePlane::bootstrap`] builds the whole stack from configuration:
//! volume engine, dedup store, metadata store, IAM store, notifier,
//! replicator, lifecycle processor, and the authenticator. Nothing here is
//! a process-wide singleton; the plane owns its components and hands out
//! `Arc`s.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use openep_core::{EndpointResult, OpenEpConfig};
use openep_dedup::DedupStore;
use openep_events::EventNotifier;
use openep_lifecycle::{LifecycleBackend, LifecycleProcessor};
use openep_meta::MetadataStore;
use openep_policy::IamStore;
use openep_replication::{
    LastWriteWins, ReplicaReceiver, ReplicationOp, ReplicationTransport, Replicator,
    ReplicatorOptions,
};
use openep_volume::{VolumeEngine, VolumeEngineOptions};

use crate::auth::{Authenticator, StaticCredentials};
use crate::service::ObjectService;

/// A transport that applies delivered ops to a local [`ReplicaReceiver`].
///
/// Stands in for the cross-region wire client in single-process
/// deployments and tests; real deployments plug an HTTP transport into
/// [`Replicator`] instead.
pub struct LoopbackTransport {
    receiver: Arc<ReplicaReceiver>,
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport").finish_non_exhaustive()
    }
}

impl LoopbackTransport {
    /// Create a loopback transport over a receiver.
    #[must_use]
    pub fn new(receiver: Arc<ReplicaReceiver>) -> Self {
        Self { receiver }
    }
}

#[async_trait::async_trait]
impl ReplicationTransport for LoopbackTransport {
    async fn deliver(&self, op: &ReplicationOp) -> EndpointResult<()> {
        self.receiver.decide(
            &op.target_bucket,
            &op.key,
            &op.version_id,
            &op.clock,
            op.wall_clock,
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StoragePlane
// ---------------------------------------------------------------------------

/// The fully wired storage plane.
#[derive(Debug)]
pub struct StoragePlane {
    /// The authorized operation surface.
    pub service: Arc<ObjectService>,
    /// The lifecycle processor (started by [`StoragePlane::start`]).
    pub lifecycle: Arc<LifecycleProcessor>,
    /// The replicator (started by [`StoragePlane::start`]).
    pub replicator: Arc<Replicator>,
    /// The credential authenticator.
    pub authenticator: Arc<Authenticator>,
    /// The event notifier, for wiring subscribers.
    pub notifier: Arc<EventNotifier>,
    /// The receiving side of replication.
    pub receiver: Arc<ReplicaReceiver>,
}

impl StoragePlane {
    /// Build every component from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`openep_core::EndpointError::Internal`] if the volume
    /// engine cannot open its data directory.
    pub fn bootstrap(config: &OpenEpConfig) -> EndpointResult<Self> {
        let engine = Arc::new(VolumeEngine::open(
            &config.storage.data_dir,
            VolumeEngineOptions {
                max_volume_size: config.storage.max_volume_size,
                fsync_batch_bytes: config.storage.fsync_batch_bytes,
            },
        )?);
        let dedup = Arc::new(DedupStore::new(Arc::clone(&engine)));
        let meta = Arc::new(MetadataStore::new());
        let iam = Arc::new(IamStore::new());
        let notifier = Arc::new(EventNotifier::new());
        let receiver = Arc::new(ReplicaReceiver::new(Arc::new(LastWriteWins)));

        let replicator = Arc::new(Replicator::new(
            config.region.clone(),
            Arc::new(LoopbackTransport::new(Arc::clone(&receiver))),
            ReplicatorOptions {
                tick: Duration::from_secs(config.replication_tick_secs),
                ..ReplicatorOptions::default()
            },
        ));
        for peer in &config.replication_peers {
            replicator.add_target(peer.region.clone(), peer.active);
        }

        let service = Arc::new(ObjectService::new(
            config.region.clone(),
            engine,
            dedup,
            meta,
            iam,
            Arc::clone(&notifier),
            Arc::clone(&replicator),
            Duration::from_secs(config.request_timeout_secs),
        ));

        let lifecycle = Arc::new(LifecycleProcessor::new(
            Arc::clone(&service) as Arc<dyn LifecycleBackend>,
            Duration::from_secs(config.lifecycle_interval_secs),
        ));

        let authenticator = Arc::new(Authenticator::new(
            Arc::new(StaticCredentials::new(vec![(
                config.auth.access_key.clone(),
                config.auth.secret_key.clone(),
            )])),
            config.auth.access_key.clone(),
        ));

        info!(region = %config.region, data_dir = %config.storage.data_dir, "storage plane assembled");
        Ok(Self {
            service,
            lifecycle,
            replicator,
            authenticator,
            notifier,
            receiver,
        })
    }

    /// Start the background tasks (replication workers, lifecycle scans).
    pub fn start(&self) {
        self.replicator.start();
        self.lifecycle.start();
    }

    /// Stop background tasks (draining in-progress work) and fsync the
    /// head volume.
    ///
    /// # Errors
    ///
    /// Returns the fsync failure, after the tasks have stopped either way.
    pub async fn shutdown(&self) -> EndpointResult<()> {
        self.lifecycle.stop().await;
        self.replicator.stop().await;
        self.service.sync()
    }
}
