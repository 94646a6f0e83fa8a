//! Exercises the storage façade against a local Minio server, checking what each operation did by
//! looking at the bucket with a separate raw S3 client.
use crate::{config_for_minio, Result};
use assert_matches::assert_matches;
use bytes::Bytes;
use s3probe::{
    BucketConfig, BucketCredentials, Outcome, PermissionGrants, SdkStorageProvider, Storage,
    StorageProvider, UploadOptions,
};
use s3probe_testing::{logging::test_with_logging, minio::MinioServer, test_data};
use std::sync::Arc;

/// Start (or reuse) the Minio server, create a fresh bucket, and connect to it as the fixture
/// identity
async fn test_setup() -> Result<(Arc<MinioServer>, String, Storage)> {
    let server = MinioServer::get().await?;
    let bucket = server.create_bucket("storage").await?;

    let provider = SdkStorageProvider::new(config_for_minio(&server));
    let storage = provider.fixture(&BucketConfig::new(&bucket)).await;

    Ok((server, bucket, storage))
}

#[test]
fn bucket_lifecycle() -> Result<()> {
    test_with_logging(async move {
        let server = MinioServer::get().await?;
        let provider = SdkStorageProvider::new(config_for_minio(&server));
        let name = format!("storage-lifecycle-{}", rand::random::<u32>());
        let storage = provider.fixture(&BucketConfig::new(&name)).await;

        assert!(!storage.bucket_exists(&name).await?);

        storage.create_bucket(&name, None).await?;
        assert!(storage.bucket_exists(&name).await?);
        assert!(storage
            .list_buckets()
            .await?
            .iter()
            .any(|bucket| bucket.name == name));

        storage.delete_bucket(&name).await?;
        assert!(!storage.bucket_exists(&name).await?);

        Ok(())
    })
}

#[test]
fn upload_download_and_info() -> Result<()> {
    test_with_logging(async move {
        let (server, bucket, storage) = test_setup().await?;
        let client = server.aws_client().await?;

        let data = test_data::random_data(10 * 1024);
        let options = UploadOptions {
            content_type: Some("application/x-test".to_string()),
            metadata: [("purpose".to_string(), "testing".to_string())].into(),
        };

        let receipt = storage
            .upload_file(&bucket, "small.bin", data.clone(), &options)
            .await?;
        assert_eq!(1, receipt.parts);
        assert_eq!(data.len() as u64, receipt.size);
        assert_eq!(
            test_data::sha256(&data),
            test_data::object_hash(&client, &bucket, "small.bin").await?
        );

        let downloaded = storage.download_file(&bucket, "small.bin").await?;
        assert_eq!(data, downloaded.data);
        assert_eq!(options.content_type, downloaded.content_type);
        assert_eq!(Some("testing"), downloaded.metadata.get("purpose").map(String::as_str));

        let info = storage.get_object_info(&bucket, "small.bin").await?;
        assert_eq!(data.len() as u64, info.size);
        assert_eq!(options.content_type, info.content_type);
        assert_eq!(downloaded.e_tag, info.e_tag);
        assert!(info.last_modified.is_some());

        Ok(())
    })
}

#[test]
fn large_uploads_are_multipart() -> Result<()> {
    test_with_logging(async move {
        let (server, bucket, storage) = test_setup().await?;
        let client = server.aws_client().await?;

        // Above the 5 MiB threshold, so `upload_file` switches to multipart on its own
        let data = test_data::random_data(12 * 1024 * 1024);
        let receipt = storage
            .upload_file(&bucket, "large.bin", data.clone(), &UploadOptions::default())
            .await?;

        assert_eq!(3, receipt.parts);
        assert_eq!(
            test_data::sha256(&data),
            test_data::object_hash(&client, &bucket, "large.bin").await?
        );

        // Below the threshold, but forced through the multipart APIs anyway
        let data = Bytes::from_static(b"not very large at all");
        let receipt = storage
            .upload_large_file(&bucket, "forced.bin", data.clone(), &UploadOptions::default())
            .await?;

        assert_eq!(1, receipt.parts);
        assert_eq!(data, storage.download_file(&bucket, "forced.bin").await?.data);

        Ok(())
    })
}

#[test]
fn list_with_and_without_delimiter() -> Result<()> {
    test_with_logging(async move {
        let (server, bucket, storage) = test_setup().await?;
        let client = server.aws_client().await?;

        let (prefix, objects) = test_data::prepend_unique_prefix([
            test_data::TestObject::new("top.txt", "1 KiB"),
            test_data::TestObject::new("a/one.txt", "1 KiB"),
            test_data::TestObject::new("a/two.txt", "1 KiB"),
            test_data::TestObject::new("b/deep/three.txt", "1 KiB"),
        ]);
        test_data::make_test_data(&client, &bucket, objects).await?;

        let flat = storage.list_objects(&bucket, &prefix, None).await?;
        assert_eq!(4, flat.objects.len());
        assert!(flat.folders.is_empty());
        assert!(flat.contains_key(&format!("{prefix}b/deep/three.txt")));

        let rolled_up = storage.list_objects(&bucket, &prefix, Some("/")).await?;
        assert_eq!(
            vec![format!("{prefix}top.txt")],
            rolled_up.keys().map(str::to_string).collect::<Vec<_>>()
        );
        assert_eq!(
            vec![format!("{prefix}a/"), format!("{prefix}b/")],
            rolled_up.folders
        );

        Ok(())
    })
}

#[test]
fn delete_objects_in_batches() -> Result<()> {
    test_with_logging(async move {
        let (server, bucket, storage) = test_setup().await?;
        let client = server.aws_client().await?;

        // More than the 1000 keys a single DeleteObjects request can carry
        let (prefix, objects) = test_data::prepend_unique_prefix(
            (0..1005).map(|i| test_data::TestObject::new(format!("{i:04}"), "1")),
        );
        let test_data = test_data::make_test_data(&client, &bucket, objects).await?;
        let keys = test_data.keys().cloned().collect::<Vec<_>>();

        let report = storage.delete_objects(&bucket, &keys).await?;
        assert!(report.is_complete());
        assert_eq!(1005, report.deleted.len());

        assert!(test_data::list_keys(&client, &bucket, &prefix)
            .await?
            .is_empty());

        // Nothing to delete is not an error
        let report = storage.delete_objects(&bucket, &[]).await?;
        assert!(report.deleted.is_empty());

        Ok(())
    })
}

#[test]
fn large_folders_are_listed_and_deleted_across_pages() -> Result<()> {
    test_with_logging(async move {
        let (server, bucket, storage) = test_setup().await?;
        let client = server.aws_client().await?;

        // More than the 1000 keys one ListObjectsV2 page holds
        let (prefix, objects) = test_data::prepend_unique_prefix(
            (0..1005)
                .map(|i| test_data::TestObject::new(format!("doomed/{i:04}"), "1"))
                .chain((0..3).map(|i| test_data::TestObject::new(format!("kept/{i}"), "1 KiB"))),
        );
        let mut test_data = test_data::make_test_data(&client, &bucket, objects).await?;

        let doomed = format!("{prefix}doomed/");
        let listing = storage.list_objects(&bucket, &doomed, None).await?;
        assert_eq!(1005, listing.objects.len());

        let report = storage.delete_folder(&bucket, &doomed).await?;
        assert!(report.is_complete());
        assert_eq!(1005, report.deleted.len());

        // Only the objects outside the folder are left, untouched
        test_data.retain(|key, _| !key.starts_with(&doomed));
        test_data::validate_test_data_in_s3(&client, &test_data, &bucket, &prefix).await?;

        Ok(())
    })
}

#[test]
fn folders() -> Result<()> {
    test_with_logging(async move {
        let (server, bucket, storage) = test_setup().await?;
        let client = server.aws_client().await?;

        let marker = storage.create_folder(&bucket, "/photos/2024//").await?;
        assert_eq!("photos/2024/", marker);

        let info = storage.get_object_info(&bucket, &marker).await?;
        assert_eq!(0, info.size);

        let objects = [
            test_data::TestObject::new("photos/2024/one.jpg", "2 KiB"),
            test_data::TestObject::new("photos/2024/raw/two.raw", "2 KiB"),
            test_data::TestObject::new("photos/2023/old.jpg", "2 KiB"),
        ];
        let mut test_data = test_data::make_test_data(&client, &bucket, objects).await?;

        let report = storage.delete_folder(&bucket, "photos/2024").await?;
        assert!(report.is_complete());
        assert_eq!(3, report.deleted.len());

        assert!(!test_data::object_exists(&client, &bucket, &marker).await?);

        test_data.retain(|key, _| key.starts_with("photos/2023/"));
        test_data::validate_test_data_in_s3(&client, &test_data, &bucket, "photos/").await?;

        assert_matches!(
            storage.create_folder(&bucket, "///").await,
            Err(s3probe::S3ProbeError::InvalidFolderPath { .. })
        );

        Ok(())
    })
}

#[test]
fn missing_object_is_a_failure_not_a_denial() -> Result<()> {
    test_with_logging(async move {
        let (_server, bucket, storage) = test_setup().await?;

        let result = storage.download_file(&bucket, "does-not-exist").await;
        assert!(result.as_ref().unwrap_err().is_not_found());
        assert_matches!(Outcome::of(&result), Outcome::Failed { .. });

        let result = storage.get_object_info(&bucket, "does-not-exist").await;
        assert!(result.as_ref().unwrap_err().is_not_found());

        Ok(())
    })
}

#[test]
fn scoped_identity_is_denied_what_it_was_not_granted() -> Result<()> {
    test_with_logging(async move {
        let (server, bucket, fixture) = test_setup().await?;

        let grants = PermissionGrants::from_label("r-l-")?;
        let user = server.create_user(&grants.policy_document(&bucket)).await?;

        let mut bucket_config = BucketConfig::new(&bucket);
        bucket_config.permissions = grants;
        bucket_config.credentials = Some(BucketCredentials {
            access_key_id: user.access_key_id,
            secret_access_key: user.secret_access_key,
        });

        let provider = SdkStorageProvider::new(config_for_minio(&server));
        let subject = provider.subject(&bucket_config).await;
        let anonymous = provider.anonymous(&bucket_config).await;

        let data = test_data::random_data(1024);
        fixture
            .upload_file(&bucket, "seeded.bin", data.clone(), &UploadOptions::default())
            .await?;

        // Granted
        assert_eq!(data, subject.download_file(&bucket, "seeded.bin").await?.data);
        assert!(subject.list_objects(&bucket, "", None).await?.contains_key("seeded.bin"));

        // Not granted
        let result = subject
            .upload_file(&bucket, "nope.bin", data, &UploadOptions::default())
            .await;
        assert_matches!(Outcome::of(&result), Outcome::Denied { .. });

        let result = subject.delete_object(&bucket, "seeded.bin").await;
        assert_matches!(Outcome::of(&result), Outcome::Denied { .. });
        assert!(fixture.bucket_exists(&bucket).await?);
        assert_eq!(
            1,
            fixture.list_objects(&bucket, "", None).await?.objects.len()
        );

        // A private bucket is closed to anonymous requests
        let result = anonymous.download_file(&bucket, "seeded.bin").await;
        assert_matches!(Outcome::of(&result), Outcome::Denied { .. });

        Ok(())
    })
}
