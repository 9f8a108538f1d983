//! Multipart uploads, events, and the torn-edge behaviors of the pipeline.

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use openep_core::EndpointError;
    use openep_pipeline::PutObjectOptions;

    use crate::{ctx, root, test_plane};

    #[tokio::test]
    async fn test_should_assemble_multipart_upload_with_composite_etag() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");

        let upload_id = service
            .create_multipart_upload(&root, &ctx(), "b", "big", PutObjectOptions::default())
            .expect("create upload");

        let e1 = service
            .upload_part(&root, &ctx(), "b", &upload_id, 1, Bytes::from_static(b"hello "))
            .expect("part 1");
        let e2 = service
            .upload_part(&root, &ctx(), "b", &upload_id, 2, Bytes::from_static(b"world"))
            .expect("part 2");

        let outcome = service
            .complete_multipart_upload(&root, &ctx(), "b", &upload_id, &[(1, e1), (2, e2)])
            .expect("complete");
        assert_eq!(outcome.size, 11);
        assert!(outcome.etag.ends_with("-2\""));

        let get = service.get_object(&root, &ctx(), "b", "big", None).expect("get");
        assert_eq!(get.data.as_ref(), b"hello world");
        assert_eq!(get.record.etag, outcome.etag);

        // The upload is gone once completed.
        assert!(matches!(
            service.upload_part(&root, &ctx(), "b", &upload_id, 3, Bytes::from_static(b"late")),
            Err(EndpointError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_reject_bad_completion_manifests() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");

        let upload_id = service
            .create_multipart_upload(&root, &ctx(), "b", "big", PutObjectOptions::default())
            .expect("create upload");
        let e1 = service
            .upload_part(&root, &ctx(), "b", &upload_id, 1, Bytes::from_static(b"a"))
            .expect("part 1");

        // Wrong ETag.
        assert!(matches!(
            service.complete_multipart_upload(
                &root,
                &ctx(),
                "b",
                &upload_id,
                &[(1, "\"bogus\"".to_owned())]
            ),
            Err(EndpointError::PreconditionFailed { .. })
        ));

        // Missing part.
        assert!(matches!(
            service.complete_multipart_upload(
                &root,
                &ctx(),
                "b",
                &upload_id,
                &[(1, e1), (2, "\"missing\"".to_owned())]
            ),
            Err(EndpointError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_abort_multipart_upload() {
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
            .upload_part(&root, &ctx(), "b", &upload_id, 1, Bytes::from_static(b"part"))
            .expect("part 1");

        service
            .abort_multipart_upload(&root, &ctx(), "b", &upload_id)
            .expect("abort");
        assert!(service.upload_part(&root, &ctx(), "b", &upload_id, 2, Bytes::from_static(b"x")).is_err());

        // The bucket is empty again and deletable.
        service.delete_bucket(&root, &ctx(), "b").expect("delete bucket");
    }

    #[tokio::test]
    async fn test_should_emit_events_for_puts_and_deletes() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");

        let (_id, mut created) = tp.plane.notifier.subscribe("b", "s3:ObjectCreated:*", 8);
        let (_id, mut removed) = tp.plane.notifier.subscribe("b", "s3:ObjectRemoved:*", 8);

        service
            .put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"data"), PutObjectOptions::default())
            .expect("put");
        service
            .delete_object(&root, &ctx(), "b", "k", None, false)
            .expect("delete");

        let event = created.recv().await.expect("created event");
        assert_eq!(event.name, "s3:ObjectCreated:Put");
        assert_eq!(event.key.as_deref(), Some("k"));
        assert_eq!(event.size, Some(4));

        let event = removed.recv().await.expect("removed event");
        assert_eq!(event.name, "s3:ObjectRemoved:Delete");
    }

    #[tokio::test]
    async fn test_should_reject_oversized_and_invalid_puts() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");

        // Empty keys are invalid.
        assert!(matches!(
            service.put_object(&root, &ctx(), "b", "", Bytes::from_static(b"x"), PutObjectOptions::default()),
            Err(EndpointError::InvalidArgument { .. })
        ));

        // Too many tags are invalid.
        let opts = PutObjectOptions {
            tags: (0..11).map(|i| (format!("k{i}"), String::new())).collect(),
            ..PutObjectOptions::default()
        };
        assert!(matches!(
            service.put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"x"), opts),
            Err(EndpointError::InvalidArgument { .. })
        ));
    }
}
