//! Policy evaluation through the authorized surface.

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use openep_core::{EndpointError, Principal};
    use openep_pipeline::PutObjectOptions;
    use openep_policy::PolicyDocument;

    use crate::{ctx, root, test_plane};

    fn allow_get_deny_secret() -> PolicyDocument {
        PolicyDocument::from_json(
            r#"{
                "Statement": [
                    {
                        "Effect": "Allow",
                        "Principal": "*",
                        "Action": "s3:GetObject",
                        "Resource": "arn:aws:s3:::b/*"
                    },
                    {
                        "Effect": "Deny",
                        "Principal": "*",
                        "Action": "s3:GetObject",
                        "Resource": "arn:aws:s3:::b/secret*"
                    }
                ]
            }"#,
        )
        .expect("parse policy")
    }

    #[tokio::test]
    async fn test_should_let_explicit_deny_beat_allow() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");
        for key in ["public/x", "secret/x"] {
            service
                .put_object(&root, &ctx(), "b", key, Bytes::from_static(b"data"), PutObjectOptions::default())
                .expect("put");
        }
        service
            .put_bucket_policy(&root, &ctx(), "b", allow_get_deny_secret())
            .expect("set policy");

        let user = Principal::new("u");
        let allowed = service.get_object(&user, &ctx(), "b", "public/x", None);
        assert!(allowed.is_ok());

        let denied = service.get_object(&user, &ctx(), "b", "secret/x", None);
        assert!(matches!(
            denied,
            Err(EndpointError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_default_deny_unknown_principals() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");
        service
            .put_object(&root, &ctx(), "b", "k", Bytes::from_static(b"data"), PutObjectOptions::default())
            .expect("put");

        // No policy grants anything: a plain principal is denied, the
        // bucket owner passes.
        let user = Principal::new("stranger");
        assert!(matches!(
            service.get_object(&user, &ctx(), "b", "k", None),
            Err(EndpointError::PermissionDenied { .. })
        ));
        assert!(service.get_object(&root, &ctx(), "b", "k", None).is_ok());
    }

    #[tokio::test]
    async fn test_should_bind_explicit_deny_even_for_owner() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");
        service
            .put_object(&root, &ctx(), "b", "secret/x", Bytes::from_static(b"data"), PutObjectOptions::default())
            .expect("put");
        service
            .put_bucket_policy(&root, &ctx(), "b", allow_get_deny_secret())
            .expect("set policy");

        assert!(matches!(
            service.get_object(&root, &ctx(), "b", "secret/x", None),
            Err(EndpointError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_honor_attached_iam_policies() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");

        let writer = Principal::new("AKIDWRITER");
        // Without an attached policy the PUT is denied.
        assert!(matches!(
            service.put_object(
                &writer,
                &ctx(),
                "b",
                "k",
                Bytes::from_static(b"data"),
                PutObjectOptions::default()
            ),
            Err(EndpointError::PermissionDenied { .. })
        ));

        service.iam().attach(
            "AKIDWRITER",
            PolicyDocument::from_json(
                r#"{
                    "Statement": [{
                        "Effect": "Allow",
                        "Principal": "*",
                        "Action": "s3:PutObject",
                        "Resource": "arn:aws:s3:::b/*"
                    }]
                }"#,
            )
            .expect("parse policy"),
        );

        assert!(
            service
                .put_object(
                    &writer,
                    &ctx(),
                    "b",
                    "k",
                    Bytes::from_static(b"data"),
                    PutObjectOptions::default()
                )
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_should_roundtrip_bucket_policy_document() {
        let tp = test_plane();
        let service = &tp.plane.service;
        let root = root();
        service
            .create_bucket(&root, &ctx(), "b", false)
            .expect("create bucket");

        let policy = allow_get_deny_secret();
        service
            .put_bucket_policy(&root, &ctx(), "b", policy.clone())
            .expect("set policy");

        let stored = service
            .get_bucket_policy(&root, &ctx(), "b")
            .expect("get policy");
        assert_eq!(stored.value, policy);

        // Serialized and reparsed, the document is unchanged.
        let json = stored.value.to_json().expect("to json");
        let reparsed = PolicyDocument::from_json(&json).expect("from json");
        assert_eq!(reparsed, policy);

        service
            .delete_bucket_policy(&root, &ctx(), "b")
            .expect("delete policy");
        assert!(matches!(
            service.get_bucket_policy(&root, &ctx(), "b"),
            Err(EndpointError::NotFound { .. })
        ));
    }
}
