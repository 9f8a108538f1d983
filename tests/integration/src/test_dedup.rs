//! Deduplication behavior through the full pipeline.

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use openep_core::EndpointError;
    use openep_pipeline::PutObjectOptions;

    use crate::{ctx, root, test_plane};

    #[tokio::test]
    async fn test_should_deduplicate_identical_payloads_across_keys() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b1", false)
            .expect("create bucket");

        let first = service
            .put_object(
                &root,
                &ctx(),
                "b1",
                "k1",
                Bytes::from_static(&[1, 2, 3]),
                PutObjectOptions::default(),
            )
            .expect("put k1");
        assert!(!first.deduplicated);

        let second = service
            .put_object(
                &root,
                &ctx(),
                "b1",
                "k2",
                Bytes::from_static(&[1, 2, 3]),
                PutObjectOptions::default(),
            )
            .expect("put k2");
        assert!(second.deduplicated);

        // One physical blob, two references.
        let record = service
            .head_object(&root, &ctx(), "b1", "k1", None)
            .expect("head k1");
        let entry = service.dedup().get(&record.fingerprint).expect("dedup entry");
        assert_eq!(entry.refcount, 2);
        assert_eq!(service.engine_stats().live_needles, 1);

        // Removing one reference keeps the other readable.
        service
            .delete_object(&root, &ctx(), "b1", "k1", None, false)
            .expect("delete k1");
        let entry = service.dedup().get(&record.fingerprint).expect("dedup entry");
        assert_eq!(entry.refcount, 1);

        let get = service
            .get_object(&root, &ctx(), "b1", "k2", None)
            .expect("get k2");
        assert_eq!(get.data.as_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_should_reclaim_blob_after_last_reference() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b1", false)
            .expect("create bucket");

        let put = service
            .put_object(
                &root,
                &ctx(),
                "b1",
                "only",
                Bytes::from_static(b"solo"),
                PutObjectOptions::default(),
            )
            .expect("put");
        let record = service
            .head_object(&root, &ctx(), "b1", "only", None)
            .expect("head");

        service
            .delete_object(&root, &ctx(), "b1", "only", None, false)
            .expect("delete");

        // The blob is tombstoned and unreadable.
        assert!(matches!(
            service.dedup().get(&record.fingerprint),
            Err(EndpointError::NotFound { .. })
        ));
        assert_eq!(service.engine_stats().tombstoned_needles, 1);
        assert_eq!(put.etag, record.etag);
    }

    #[tokio::test]
    async fn test_should_keep_blob_alive_across_overwrites() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b1", false)
            .expect("create bucket");

        // Overwriting a key with the same content keeps one reference: the
        // new version gains one and the displaced version releases one.
        for _ in 0..3 {
            service
                .put_object(
                    &root,
                    &ctx(),
                    "b1",
                    "stable",
                    Bytes::from_static(b"same bytes"),
                    PutObjectOptions::default(),
                )
                .expect("put");
        }

        let record = service
            .head_object(&root, &ctx(), "b1", "stable", None)
            .expect("head");
        let entry = service.dedup().get(&record.fingerprint).expect("entry");
        assert_eq!(entry.refcount, 1);
        assert_eq!(service.engine_stats().live_needles, 1);
    }
}
