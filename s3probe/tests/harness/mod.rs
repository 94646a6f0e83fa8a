//! Runs whole suites against a local Minio server, with a scoped Minio user for each bucket whose
//! policy grants exactly the permissions the bucket is configured with.
//!
//! These are the closest thing to running the CLI against a real service: if the library's
//! expectations and Minio's enforcement ever disagree, these tests fail.
use crate::progress::TestRunProgressCallback;
use crate::{config_for_minio, Result};
use s3probe::{
    BucketConfig, BucketCredentials, BucketType, Operation, PermissionGrants, Runner, Selection,
    Suite, Summary,
};
use s3probe_testing::{logging::test_with_logging, minio::MinioServer, test_data};
use strum::IntoEnumIterator;

/// Make a bucket, plus a Minio user whose policy matches `label`, and describe both as a bucket
/// config.
///
/// Public buckets are marked for creation so that the runner applies their bucket policy.
async fn scoped_bucket(
    server: &MinioServer,
    label: &str,
    bucket_type: BucketType,
) -> Result<BucketConfig> {
    // Labels use `-` for missing grants, which can't end a bucket name
    let bucket = server
        .create_bucket(format!("probe-{}", label.replace('-', "x")))
        .await?;
    let permissions = PermissionGrants::from_label(label)?;
    let user = server
        .create_user(&permissions.policy_document(&bucket))
        .await?;

    let mut config = BucketConfig::new(bucket);
    config.bucket_type = bucket_type;
    config.permissions = permissions;
    config.create = bucket_type == BucketType::Public;
    config.credentials = Some(BucketCredentials {
        access_key_id: user.access_key_id,
        secret_access_key: user.secret_access_key,
    });

    Ok(config)
}

fn permissions_only() -> Selection {
    Selection {
        suites: vec![Suite::Permissions],
        ..Default::default()
    }
}

fn assert_success(summary: &Summary) {
    for failure in summary.failures() {
        eprintln!("FAIL {}: {}", failure.id, failure.message);
    }

    assert!(summary.is_success(), "{summary}");
}

#[test]
fn granted_permissions_are_enforced() -> Result<()> {
    test_with_logging(async move {
        let server = MinioServer::get().await?;

        let buckets = vec![
            scoped_bucket(&server, "rwld", BucketType::Private).await?,
            scoped_bucket(&server, "r-l-", BucketType::Private).await?,
            scoped_bucket(&server, "-w-d", BucketType::Private).await?,
            scoped_bucket(&server, "r---", BucketType::Public).await?,
        ];

        let registry = s3probe::plan(&buckets, &permissions_only())?;
        assert_eq!(buckets.len() * Operation::iter().count(), registry.len());

        let progress = TestRunProgressCallback::new();
        let summary = Runner::new(config_for_minio(&server))
            .run(registry, &progress)
            .await;

        progress.sanity_check_updates(&summary);
        assert_success(&summary);

        // Every case cleaned up after itself
        let client = server.aws_client().await?;
        for bucket in &buckets {
            assert_eq!(
                Vec::<String>::new(),
                test_data::list_keys(&client, &bucket.name, "").await?,
                "objects left behind in {}",
                bucket.name
            );
        }

        Ok(())
    })
}

#[test]
fn public_listing_is_enforced() -> Result<()> {
    test_with_logging(async move {
        let server = MinioServer::get().await?;

        let mut bucket = scoped_bucket(&server, "r-l-", BucketType::Public).await?;
        bucket.public_list = true;

        let selection = Selection {
            operations: vec![Operation::AnonymousDownload, Operation::AnonymousList],
            ..permissions_only()
        };
        let registry = s3probe::plan(&[bucket], &selection)?;
        assert_eq!(2, registry.len());

        let summary = Runner::new(config_for_minio(&server))
            .run_without_progress(registry)
            .await;

        assert_success(&summary);

        Ok(())
    })
}

#[test]
fn misconfigured_grants_are_detected() -> Result<()> {
    test_with_logging(async move {
        let server = MinioServer::get().await?;

        // The user can do everything, but the bucket claims it is read-only
        let mut bucket = scoped_bucket(&server, "rwld", BucketType::Private).await?;
        bucket.permissions = PermissionGrants::from_label("r---")?;

        let selection = Selection {
            operations: vec![Operation::DownloadFile, Operation::UploadFile],
            ..permissions_only()
        };
        let registry = s3probe::plan(&[bucket.clone()], &selection)?;

        let summary = Runner::new(config_for_minio(&server))
            .run_without_progress(registry)
            .await;

        assert_eq!(1, summary.passed());
        assert_eq!(1, summary.failed());

        let failure = summary.failures().next().unwrap();
        assert_eq!(format!("{}/upload-file", bucket.name), failure.id);
        assert!(
            failure
                .message
                .contains("expected upload-file to be denied, but it was allowed"),
            "{}",
            failure.message
        );

        // Even the failed case cleaned up the object it managed to upload
        let client = server.aws_client().await?;
        assert!(test_data::list_keys(&client, &bucket.name, "")
            .await?
            .is_empty());

        Ok(())
    })
}

#[test]
fn bad_credentials_fail_rather_than_count_as_denied() -> Result<()> {
    test_with_logging(async move {
        let server = MinioServer::get().await?;
        let name = server.create_bucket("badcreds").await?;

        let mut bucket = BucketConfig::new(&name);
        bucket.permissions = PermissionGrants::none();
        bucket.credentials = Some(BucketCredentials {
            access_key_id: "nobody".to_string(),
            secret_access_key: "not-a-real-secret".to_string(),
        });

        let selection = Selection {
            operations: vec![Operation::DownloadFile, Operation::ListObjects],
            ..permissions_only()
        };
        let registry = s3probe::plan(&[bucket], &selection)?;

        let summary = Runner::new(config_for_minio(&server))
            .run_without_progress(registry)
            .await;

        assert_eq!(2, summary.failed());
        for failure in summary.failures() {
            assert!(
                failure.message.contains("InvalidAccessKeyId"),
                "{}",
                failure.message
            );
        }

        Ok(())
    })
}

#[test]
fn lifecycle_suite() -> Result<()> {
    test_with_logging(async move {
        let server = MinioServer::get().await?;
        let config = config_for_minio(&server);

        let selection = Selection {
            suites: vec![Suite::Lifecycle],
            lifecycle_bucket_prefix: "lifecycle-test".to_string(),
            lifecycle_region: config.region.clone(),
            ..Default::default()
        };
        let registry = s3probe::plan(&[], &selection)?;
        assert_eq!(1, registry.len());

        let summary = Runner::new(config).run_without_progress(registry).await;
        assert_success(&summary);

        // The bucket the suite made is gone again
        let client = server.aws_client().await?;
        let buckets = client.list_buckets().send().await?;
        assert!(!buckets
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name())
            .any(|name| name.starts_with("lifecycle-test-")));

        Ok(())
    })
}
