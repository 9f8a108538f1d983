//! Versioning semantics through the pipeline.

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use openep_core::EndpointError;
    use openep_meta::VersioningStatus;
    use openep_pipeline::PutObjectOptions;

    use crate::{ctx, root, test_plane};

    #[tokio::test]
    async fn test_should_list_versions_newest_first_with_marker() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");
        service
            .put_bucket_versioning(&root, &ctx(), "b", VersioningStatus::Enabled)
            .expect("enable versioning");

        let v1 = service
            .put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"v1"), PutObjectOptions::default())
            .expect("put v1");
        let v2 = service
            .put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"v2"), PutObjectOptions::default())
            .expect("put v2");
        let deleted = service
            .delete_object(&root, &ctx(), "b", "k", None, false)
            .expect("delete");
        assert!(deleted.delete_marker);
        let v3 = service
            .put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"v3"), PutObjectOptions::default())
            .expect("put v3");

        let page = service
            .list_versions(&root, &ctx(), "b", "", "", "", "", 100)
            .expect("list versions");
        assert_eq!(page.versions.len(), 4);

        // Order: v3 (current), the delete marker, v2, v1.
        assert_eq!(page.versions[0].version.version_id(), v3.version_id);
        assert!(page.versions[0].is_latest);
        assert!(!page.versions[0].version.is_delete_marker());

        assert!(page.versions[1].version.is_delete_marker());
        assert_eq!(
            page.versions[1].version.version_id(),
            deleted.version_id.as_deref().expect("marker id")
        );

        assert_eq!(page.versions[2].version.version_id(), v2.version_id);
        assert_eq!(page.versions[3].version.version_id(), v1.version_id);
    }

    #[tokio::test]
    async fn test_should_read_old_versions_by_id() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");
        service
            .put_bucket_versioning(&root, &ctx(), "b", VersioningStatus::Enabled)
            .expect("enable versioning");

        let v1 = service
            .put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"one"), PutObjectOptions::default())
            .expect("put v1");
        service
            .put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"two"), PutObjectOptions::default())
            .expect("put v2");

        let current = service
            .get_object(&root, &ctx(), "b", "k", None)
            .expect("get current");
        assert_eq!(current.data.as_ref(), b"two");

        let old = service
            .get_object(&root, &ctx(), "b", "k", Some(&v1.version_id))
            .expect("get old version");
        assert_eq!(old.data.as_ref(), b"one");
    }

    #[tokio::test]
    async fn test_should_hide_key_behind_delete_marker_until_new_put() {
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
            .put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"data"), PutObjectOptions::default())
            .expect("put");
        service
            .delete_object(&root, &ctx(), "b", "k", None, false)
            .expect("delete");

        assert!(matches!(
            service.get_object(&root, &ctx(), "b", "k", None),
            Err(EndpointError::NotFound { .. })
        ));
        let page = service
            .list_objects(&root, &ctx(), "b", "", "", "", 100)
            .expect("list");
        assert!(page.objects.is_empty());

        // A new PUT makes the key visible again.
        service
            .put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"back"), PutObjectOptions::default())
            .expect("re-put");
        let get = service.get_object(&root, &ctx(), "b", "k", None).expect("get");
        assert_eq!(get.data.as_ref(), b"back");
    }

    #[tokio::test]
    async fn test_should_keep_versions_readable_after_suspension() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");
        service
            .put_bucket_versioning(&root, &ctx(), "b", VersioningStatus::Enabled)
            .expect("enable versioning");

        let v1 = service
            .put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"versioned"), PutObjectOptions::default())
            .expect("put versioned");

        service
            .put_bucket_versioning(&root, &ctx(), "b", VersioningStatus::Suspended)
            .expect("suspend");
        let null_put = service
            .put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"null-one"), PutObjectOptions::default())
            .expect("put null");
        assert_eq!(null_put.version_id, "null");

        // Overwriting the null version again does not grow history.
        service
            .put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"null-two"), PutObjectOptions::default())
            .expect("overwrite null");
        let page = service
            .list_versions(&root, &ctx(), "b", "", "", "", "", 100)
            .expect("list versions");
        assert_eq!(page.versions.len(), 2);

        // The pre-suspension version survives.
        let old = service
            .get_object(&root, &ctx(), "b", "k", Some(&v1.version_id))
            .expect("get pre-suspension version");
        assert_eq!(old.data.as_ref(), b"versioned");

        // Suspended cannot revert to unversioned.
        assert!(matches!(
            service.put_bucket_versioning(&root, &ctx(), "b", VersioningStatus::Unversioned),
            Err(EndpointError::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_group_listing_by_delimiter() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");

        for key in ["photos/2023/a.jpg", "photos/2024/b.jpg", "readme.txt"] {
            service
                .put_object(&root, &ctx(), "b", key, Bytes::from_static(b"x"), PutObjectOptions::default())
                .expect("put");
        }

        let page = service
            .list_objects(&root, &ctx(), "b", "", "/", "", 100)
            .expect("list");
        assert_eq!(page.common_prefixes, vec!["photos/".to_owned()]);
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].key, "readme.txt");

        // max_keys = 0 yields an empty, non-truncated page.
        let empty = service
            .list_objects(&root, &ctx(), "b", "", "", "", 0)
            .expect("list zero");
        assert!(empty.objects.is_empty());
        assert!(!empty.is_truncated);
    }
}
