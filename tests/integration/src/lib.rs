//! Cross-subsystem tests for the OpenEndpoint storage plane.
//!
//! Each test assembles a fresh plane over a temporary data directory and
//! drives it through [`openep_pipeline::ObjectService`], the same surface
//! the server binary exposes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use tempfile::TempDir;

use openep_core::{OpenEpConfig, Principal, RegionId, StorageConfig};
use openep_dedup::DedupStore;
use openep_events::EventNotifier;
use openep_meta::MetadataStore;
use openep_pipeline::{ObjectService, StoragePlane};
use openep_policy::IamStore;
use openep_replication::{Replicator, ReplicatorOptions, ReplicationTransport};
use openep_volume::{VolumeEngine, VolumeEngineOptions};

mod test_dedup;
mod test_lifecycle;
mod test_multipart;
mod test_policy;
mod test_replication;
mod test_versioning;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// A bootstrapped plane plus the tempdir keeping its volumes alive.
pub struct TestPlane {
    /// The assembled plane.
    pub plane: StoragePlane,
    _dir: TempDir,
}

/// Bootstrap a plane over a fresh temporary data directory.
#[must_use]
pub fn test_plane() -> TestPlane {
    init_tracing();
    let dir = TempDir::new().expect("create temp data dir");
    let config = OpenEpConfig {
        storage: StorageConfig {
            data_dir: dir.path().to_string_lossy().into_owned(),
            ..StorageConfig::default()
        },
        ..OpenEpConfig::default()
    };
    let plane = StoragePlane::bootstrap(&config).expect("bootstrap plane");
    TestPlane { plane, _dir: dir }
}

/// An [`ObjectService`] wired over a caller-supplied replication transport,
/// for tests that inject delivery failures.
pub struct TestService {
    /// The service under test.
    pub service: Arc<ObjectService>,
    /// The replicator behind it.
    pub replicator: Arc<Replicator>,
    _dir: TempDir,
}

/// Assemble a service around `transport` with fast replication ticks.
#[must_use]
pub fn service_with_transport(transport: Arc<dyn ReplicationTransport>) -> TestService {
    init_tracing();
    let dir = TempDir::new().expect("create temp data dir");
    let engine = Arc::new(
        VolumeEngine::open(dir.path(), VolumeEngineOptions::default()).expect("open engine"),
    );
    let dedup = Arc::new(DedupStore::new(Arc::clone(&engine)));
    let meta = Arc::new(MetadataStore::new());
    let iam = Arc::new(IamStore::new());
    let notifier = Arc::new(EventNotifier::new());
    let replicator = Arc::new(Replicator::new(
        RegionId::new("local"),
        transport,
        ReplicatorOptions {
            tick: Duration::from_millis(10),
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(5),
            ..ReplicatorOptions::default()
        },
    ));
    let service = Arc::new(ObjectService::new(
        RegionId::new("local"),
        engine,
        dedup,
        meta,
        iam,
        notifier,
        Arc::clone(&replicator),
        Duration::from_secs(30),
    ));
    TestService {
        service,
        replicator,
        _dir: dir,
    }
}

/// The root principal every test bucket is owned by.
#[must_use]
pub fn root() -> Principal {
    Principal::root("AKIDROOT")
}

/// An empty request context bag.
#[must_use]
pub fn ctx() -> HashMap<String, String> {
    HashMap::new()
}
