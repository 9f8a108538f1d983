//! Replication through the pipeline: rule matching, retries, failure
//! states, and vector-clock convergence.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use chrono::Utc;
    use parking_lot::Mutex;

    use openep_core::{EndpointError, EndpointResult, RegionId};
    use openep_meta::{
        ReplicationConfig, ReplicationDestination, ReplicationFilter, ReplicationRule, RuleStatus,
    };
    use openep_pipeline::PutObjectOptions;
    use openep_replication::{
        ApplyOutcome, LastWriteWins, OpStatus, ReplicaReceiver, ReplicationOp,
        ReplicationTransport, VectorClock,
    };

    use crate::{ctx, root, service_with_transport};

    /// Transport failing the first `failures` deliveries.
    struct FlakyTransport {
        failures: Mutex<u32>,
        delivered: Mutex<Vec<ReplicationOp>>,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures),
                delivered: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl ReplicationTransport for FlakyTransport {
        async fn deliver(&self, op: &ReplicationOp) -> EndpointResult<()> {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(EndpointError::Unavailable {
                    detail: "injected failure".to_owned(),
                });
            }
            self.delivered.lock().push(op.clone());
            Ok(())
        }
    }

    fn replication_to(region: &str) -> ReplicationConfig {
        ReplicationConfig {
            rules: vec![ReplicationRule {
                id: "to-remote".to_owned(),
                status: RuleStatus::Enabled,
                priority: 0,
                filter: ReplicationFilter::default(),
                destination: ReplicationDestination {
                    region: RegionId::new(region),
                    bucket: "b-replica".to_owned(),
                    storage_class: None,
                    encryption: None,
                },
                delete_marker_replication: true,
            }],
        }
    }

    async fn wait_for_status(
        replicator: &openep_replication::Replicator,
        op_id: &str,
        wanted: OpStatus,
    ) -> ReplicationOp {
        for _ in 0..500 {
            if let Some(op) = replicator.get_operation(op_id) {
                if op.status == wanted {
                    return op;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("op {op_id} never reached {wanted:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_enqueue_and_deliver_put_replication() {
        let transport = FlakyTransport::new(0);
        let ts = service_with_transport(Arc::clone(&transport) as Arc<dyn ReplicationTransport>);
        let root = root();
        ts.service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");
        ts.service
            .put_bucket_replication(&root, &ctx(), "b", replication_to("r2"))
            .expect("set replication");
        ts.replicator.start();

        let put = ts
            .service
            .put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"data"), PutObjectOptions::default())
            .expect("put");

        // The op reaches the destination with the committed version and
        // the destination bucket from the rule.
        for _ in 0..500 {
            if !transport.delivered.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let delivered = transport.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].version_id, put.version_id);
        assert_eq!(delivered[0].target_bucket, "b-replica");
        drop(delivered);
        ts.replicator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_retry_twice_then_complete() {
        let transport = FlakyTransport::new(2);
        let ts = service_with_transport(Arc::clone(&transport) as Arc<dyn ReplicationTransport>);
        let root = root();
        ts.service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");
        ts.service
            .put_bucket_replication(&root, &ctx(), "b", replication_to("r2"))
            .expect("set replication");
        ts.replicator.start();

        ts.service
            .put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"data"), PutObjectOptions::default())
            .expect("put");

        // Find the op id via the delivered record after convergence.
        for _ in 0..500 {
            if !transport.delivered.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let op_id = transport.delivered.lock()[0].id.clone();
        let op = wait_for_status(&ts.replicator, &op_id, OpStatus::Completed).await;
        assert_eq!(op.retries, 2);
        ts.replicator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_fail_permanently_after_retry_budget() {
        // More injected failures than the retry budget allows.
        let transport = FlakyTransport::new(100);
        let ts = service_with_transport(Arc::clone(&transport) as Arc<dyn ReplicationTransport>);
        let root = root();
        ts.service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");
        ts.service
            .put_bucket_replication(&root, &ctx(), "b", replication_to("r2"))
            .expect("set replication");
        ts.replicator.start();

        ts.service
            .put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"data"), PutObjectOptions::default())
            .expect("put");

        // The sole op must end up failed, with its error recorded, and
        // stay queryable through the status surface.
        let op = loop {
            let ops = ts.replicator.operations();
            if let Some(op) = ops.iter().find(|op| op.status == OpStatus::Failed) {
                break op.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(op.retries, 3);
        assert!(op.error.as_deref().is_some_and(|e| e.contains("injected")));
        let queried = ts.replicator.get_operation(&op.id).expect("queryable");
        assert_eq!(queried.status, OpStatus::Failed);
        assert_eq!(ts.replicator.pending_count(&RegionId::new("r2")), 0);
        assert!(transport.delivered.lock().is_empty());
        ts.replicator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_replicate_delete_markers_when_rule_opts_in() {
        let transport = FlakyTransport::new(0);
        let ts = service_with_transport(Arc::clone(&transport) as Arc<dyn ReplicationTransport>);
        let root = root();
        ts.service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");
        ts.service
            .put_bucket_versioning(&root, &ctx(), "b", openep_meta::VersioningStatus::Enabled)
            .expect("enable versioning");
        ts.service
            .put_bucket_replication(&root, &ctx(), "b", replication_to("r2"))
            .expect("set replication");
        ts.replicator.start();

        ts.service
            .put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"data"), PutObjectOptions::default())
            .expect("put");
        ts.service
            .delete_object(&root, &ctx(), "b", "k", None, false)
            .expect("delete");

        for _ in 0..500 {
            if transport.delivered.lock().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let delivered = transport.delivered.lock();
        assert_eq!(delivered.len(), 2);
        assert!(delivered[1].payload.is_none());
        drop(delivered);
        ts.replicator.stop().await;
    }

    #[test]
    fn test_should_resolve_concurrent_clocks_with_lww() {
        // Local {A:3, B:1}; incoming {A:2, B:2}: concurrent, LWW picks the
        // newer remote, merged clock is {A:3, B:2}.
        let receiver = ReplicaReceiver::new(Arc::new(LastWriteWins));
        let local_clock =
            VectorClock::from([(RegionId::new("A"), 3), (RegionId::new("B"), 1)]);
        let incoming_clock =
            VectorClock::from([(RegionId::new("A"), 2), (RegionId::new("B"), 2)]);

        receiver.record_local(
            "b",
            "k",
            "local-v",
            local_clock,
            Utc::now() - chrono::Duration::seconds(30),
        );
        let outcome = receiver.decide("b", "k", "remote-v", &incoming_clock, Utc::now());
        assert_eq!(outcome, ApplyOutcome::ResolvedRemote);

        let merged = receiver.clock("b", "k").expect("merged clock");
        assert_eq!(merged.get(&RegionId::new("A")), 3);
        assert_eq!(merged.get(&RegionId::new("B")), 2);
    }
}
