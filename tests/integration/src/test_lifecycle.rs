//! Lifecycle processing against the live plane.

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use openep_lifecycle::LifecycleBackend;
    use openep_meta::{
        LifecycleAction, LifecycleConfig, LifecycleFilter, LifecycleRule, RuleStatus,
        VersioningStatus,
    };
    use openep_pipeline::PutObjectOptions;

    use crate::{ctx, root, test_plane};

    fn expire_now_rule(prefix: &str) -> LifecycleConfig {
        LifecycleConfig {
            rules: vec![LifecycleRule {
                id: format!("expire-{prefix}"),
                status: RuleStatus::Enabled,
                priority: 0,
                filter: LifecycleFilter {
                    prefix: Some(prefix.to_owned()),
                    ..LifecycleFilter::default()
                },
                actions: vec![LifecycleAction::Expiration {
                    days: Some(0),
                    date: None,
                }],
            }],
        }
    }

    #[tokio::test]
    async fn test_should_expire_only_keys_under_rule_prefix() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");
        for key in ["tmp/a", "other/b"] {
            service
                .put_object(&root, &ctx(), "b", key, Bytes::from_static(b"data"), PutObjectOptions::default())
                .expect("put");
        }
        service
            .put_bucket_lifecycle(&root, &ctx(), "b", expire_now_rule("tmp/"))
            .expect("set lifecycle");

        let stats = tp.plane.lifecycle.run_once().expect("scan");
        assert_eq!(stats.expired, 1);

        assert!(service.get_object(&root, &ctx(), "b", "tmp/a", None).is_err());
        assert!(service.get_object(&root, &ctx(), "b", "other/b", None).is_ok());

        // The second run finds nothing to do.
        let stats = tp.plane.lifecycle.run_once().expect("rescan");
        assert_eq!(stats.expired, 0);
    }

    #[tokio::test]
    async fn test_should_insert_delete_marker_when_expiring_versioned_key() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");
        service
            .put_bucket_versioning(&root, &ctx(), "b", VersioningStatus::Enabled)
            .expect("enable versioning");
        service
            .put_object(&root, &ctx(), "b", "tmp/x", Bytes::from_static(b"data"), PutObjectOptions::default())
            .expect("put");
        service
            .put_bucket_lifecycle(&root, &ctx(), "b", expire_now_rule("tmp/"))
            .expect("set lifecycle");

        let stats = tp.plane.lifecycle.run_once().expect("scan");
        assert_eq!(stats.expired, 1);

        // The key reads as gone, but its history holds the old version
        // plus a delete marker.
        assert!(service.get_object(&root, &ctx(), "b", "tmp/x", None).is_err());
        let page = service
            .list_versions(&root, &ctx(), "b", "", "", "", "", 100)
            .expect("list versions");
        assert_eq!(page.versions.len(), 2);
        assert!(page.versions[0].version.is_delete_marker());
    }

    #[tokio::test]
    async fn test_should_transition_storage_class_once() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");
        service
            .put_object(&root, &ctx(), "b", "cold/x", Bytes::from_static(b"data"), PutObjectOptions::default())
            .expect("put");
        service
            .put_bucket_lifecycle(
                &root,
                &ctx(),
                "b",
                LifecycleConfig {
                    rules: vec![LifecycleRule {
                        id: "to-glacier".to_owned(),
                        status: RuleStatus::Enabled,
                        priority: 0,
                        filter: LifecycleFilter::default(),
                        actions: vec![LifecycleAction::Transition {
                            days: 0,
                            storage_class: "GLACIER".to_owned(),
                        }],
                    }],
                },
            )
            .expect("set lifecycle");

        assert_eq!(tp.plane.lifecycle.run_once().expect("scan").transitioned, 1);
        let record = service
            .head_object(&root, &ctx(), "b", "cold/x", None)
            .expect("head");
        assert_eq!(record.storage_class, "GLACIER");

        // Idempotent: already in the target class.
        assert_eq!(tp.plane.lifecycle.run_once().expect("rescan").transitioned, 0);
    }

    #[tokio::test]
    async fn test_should_abort_stale_multipart_uploads() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");
        let upload_id = service
            .create_multipart_upload(&root, &ctx(), "b", "big", PutObjectOptions::default())
            .expect("create upload");
        service
            .put_bucket_lifecycle(
                &root,
                &ctx(),
                "b",
                LifecycleConfig {
                    rules: vec![LifecycleRule {
                        id: "abort-stale".to_owned(),
                        status: RuleStatus::Enabled,
                        priority: 0,
                        filter: LifecycleFilter::default(),
                        actions: vec![LifecycleAction::AbortIncompleteMultipart { days: 0 }],
                    }],
                },
            )
            .expect("set lifecycle");

        // days = 0 puts the cutoff at "now"; the just-created upload
        // qualifies as stale.
        let stats = tp.plane.lifecycle.run_once().expect("scan");
        assert_eq!(stats.aborted_uploads, 1);

        // The upload is gone.
        let result = service.upload_part(
            &root,
            &ctx(),
            "b",
            &upload_id,
            1,
            Bytes::from_static(b"late"),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_should_expose_lifecycle_buckets_through_backend() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "with-rules", false)
            .expect("create bucket");
        service
            .create_bucket(&root, &ctx(), "without-rules", false)
            .expect("create bucket");
        service
            .put_bucket_lifecycle(&root, &ctx(), "with-rules", expire_now_rule("x/"))
            .expect("set lifecycle");

        let buckets = service.buckets_with_lifecycle();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].0, "with-rules");
    }
}
