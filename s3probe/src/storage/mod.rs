//! The storage façade: each method performs exactly one logical S3 operation and reports the
//! result, with SDK errors wrapped in the matching [`crate::S3ProbeError`] variant so the caller can
//! tell an authorization denial from any other failure.
use crate::{Config, Result};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

mod client;
mod multipart;

pub(crate) use client::Identity;

/// S3 refuses `DeleteObjects` requests with more keys than this
const MAX_KEYS_PER_DELETE: usize = 1000;

/// Wrapper around an S3 client authenticated as one particular identity.
///
/// Clones are cheap; they share the same underlying client.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    client: aws_sdk_s3::Client,
    config: Config,

    /// Short description of who this client authenticates as, for log output
    identity: String,
}

/// A bucket as reported by `ListBuckets`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketSummary {
    pub name: String,
    pub created: Option<DateTime<Utc>>,
}

/// Options that apply to uploaded objects
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub content_type: Option<String>,

    /// User metadata, sent as `x-amz-meta-*` headers
    pub metadata: HashMap<String, String>,
}

/// The result of a successful upload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    pub e_tag: Option<String>,
    pub size: u64,

    /// How many parts the object was uploaded in.  Objects uploaded with a single `PutObject`
    /// count as one part.
    pub parts: usize,
}

/// An object downloaded in its entirety
#[derive(Clone, Debug)]
pub struct DownloadedObject {
    pub key: String,
    pub data: Bytes,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    pub e_tag: Option<String>,
}

/// Object metadata as reported by `HeadObject`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    pub e_tag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One object in a listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub e_tag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// The objects under a prefix, and if a delimiter was used, the "folders" as well
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectListing {
    pub objects: Vec<ObjectEntry>,

    /// Common prefixes, each ending in the delimiter
    pub folders: Vec<String>,
}

impl ObjectListing {
    pub fn contains_key(&self, key: &str) -> bool {
        self.objects.iter().any(|object| object.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.objects.iter().map(|object| object.key.as_str())
    }
}

/// A key that a `DeleteObjects` request failed to delete
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteObjectFailure {
    pub key: String,
    pub code: Option<String>,
    pub message: Option<String>,
}

/// The outcome of a batch delete.
///
/// `DeleteObjects` succeeds as a whole even if some or all keys couldn't be deleted, so the per-key
/// failures are reported here rather than as an error.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteObjectsReport {
    pub deleted: Vec<String>,
    pub errors: Vec<DeleteObjectFailure>,
}

impl DeleteObjectsReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// True if nothing was deleted and every key failed because access was denied
    pub fn all_denied(&self) -> bool {
        self.deleted.is_empty()
            && !self.errors.is_empty()
            && self
                .errors
                .iter()
                .all(|error| crate::outcome::is_denial_code(error.code.as_deref()))
    }

    fn merge(&mut self, other: Self) {
        self.deleted.extend(other.deleted);
        self.errors.extend(other.errors);
    }
}

/// Turn a folder path into the key prefix that emulates the folder: no leading `/`, exactly one
/// trailing `/`.
pub fn folder_key(path: &str) -> Result<String> {
    let trimmed = path.trim_matches('/');

    ensure!(
        !trimmed.is_empty(),
        crate::error::InvalidFolderPathSnafu { path }
    );

    Ok(format!("{trimmed}/"))
}

fn to_chrono(timestamp: Option<&aws_sdk_s3::primitives::DateTime>) -> Option<DateTime<Utc>> {
    // Helpfully, the AWS Rust SDK provides conversions from their own internal DateTime type
    // to Chrono.
    use aws_smithy_types_convert::date_time::DateTimeExt;

    timestamp.and_then(|timestamp| timestamp.to_chrono_utc().ok())
}

fn non_negative(size: Option<i64>) -> u64 {
    size.unwrap_or_default().max(0) as u64
}

impl Storage {
    /// Make a new client for `identity`, in `region` if specified or else in the configured region
    pub(crate) async fn connect(
        config: &Config,
        identity: Identity<'_>,
        region: Option<&str>,
    ) -> Self {
        let description = identity.to_string();
        let client = client::make_s3_client(config, identity, region).await;

        Self::from_client_with_identity(client, config.clone(), description)
    }

    /// Wrap an existing client.  Mostly useful for tests.
    pub fn from_client(client: aws_sdk_s3::Client, config: Config) -> Self {
        Self::from_client_with_identity(client, config, "custom client".to_string())
    }

    fn from_client_with_identity(
        client: aws_sdk_s3::Client,
        config: Config,
        identity: String,
    ) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                client,
                config,
                identity,
            }),
        }
    }

    /// The region buckets go in when the caller doesn't name one.
    ///
    /// This is the configured region, else the region the client resolved from the environment,
    /// and only failing both `us-east-1`.  It must agree with the region requests are sent to, or
    /// the service rejects the location constraint.
    fn default_bucket_region(&self) -> String {
        self.inner
            .config
            .region
            .clone()
            .or_else(|| {
                self.inner
                    .client
                    .config()
                    .region()
                    .map(|region| region.to_string())
            })
            .unwrap_or_else(|| "us-east-1".to_string())
    }

    pub fn client(&self) -> &aws_sdk_s3::Client {
        &self.inner.client
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// Create a bucket, in `region` if specified or else in the configured region.
    #[instrument(skip(self), fields(identity = %self.inner.identity))]
    pub async fn create_bucket(&self, bucket: &str, region: Option<&str>) -> Result<()> {
        let default_region;
        let region = match region {
            Some(region) => region,
            None => {
                default_region = self.default_bucket_region();
                default_region.as_str()
            }
        };

        // `us-east-1` is the one region where a location constraint must NOT be specified
        let bucket_config = (region != "us-east-1").then(|| {
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region))
                .build()
        });

        debug!(region, "Creating bucket");

        self.inner
            .client
            .create_bucket()
            .bucket(bucket)
            .set_create_bucket_configuration(bucket_config)
            .send()
            .await
            .with_context(|_| crate::error::CreateBucketSnafu { bucket })?;

        debug!("Bucket created");

        Ok(())
    }

    #[instrument(skip(self), fields(identity = %self.inner.identity))]
    pub async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.inner
            .client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .with_context(|_| crate::error::DeleteBucketSnafu { bucket })?;

        debug!("Bucket deleted");

        Ok(())
    }

    /// Perform a HEAD on the bucket to check that it exists and is accessible
    #[instrument(skip(self), fields(identity = %self.inner.identity))]
    pub async fn head_bucket(&self, bucket: &str) -> Result<()> {
        self.inner
            .client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .with_context(|_| crate::error::BucketInvalidOrNotAccessibleSnafu { bucket })?;

        Ok(())
    }

    /// Like [`Self::head_bucket`], but a bucket that doesn't exist is `Ok(false)` rather than an
    /// error
    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.head_bucket(bucket).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(identity = %self.inner.identity))]
    pub async fn list_buckets(&self) -> Result<Vec<BucketSummary>> {
        let response = self
            .inner
            .client
            .list_buckets()
            .send()
            .await
            .context(crate::error::ListBucketsSnafu)?;

        let buckets = response
            .buckets()
            .iter()
            .filter_map(|bucket| {
                bucket.name().map(|name| BucketSummary {
                    name: name.to_string(),
                    created: to_chrono(bucket.creation_date()),
                })
            })
            .collect::<Vec<_>>();

        debug!(buckets = buckets.len(), "Listed buckets");

        Ok(buckets)
    }

    /// Replace the bucket policy
    #[instrument(skip(self, policy), fields(identity = %self.inner.identity))]
    pub async fn put_bucket_policy(&self, bucket: &str, policy: &serde_json::Value) -> Result<()> {
        self.inner
            .client
            .put_bucket_policy()
            .bucket(bucket)
            .policy(policy.to_string())
            .send()
            .await
            .with_context(|_| crate::error::PutBucketPolicySnafu { bucket })?;

        debug!("Bucket policy applied");

        Ok(())
    }

    /// Upload an object in one request.
    ///
    /// Objects at or above the configured multipart threshold are handed to
    /// [`Self::upload_large_file`] instead.
    #[instrument(skip(self, data, options), fields(identity = %self.inner.identity, size = data.len()))]
    pub async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &UploadOptions,
    ) -> Result<UploadReceipt> {
        let size = data.len() as u64;

        if size as u128 >= self.inner.config.multipart_threshold.get_bytes() {
            debug!("Object is at or above the multipart threshold; using multipart upload");

            return self.upload_large_file(bucket, key, data, options).await;
        }

        let response = self
            .inner
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .set_content_type(options.content_type.clone())
            .set_metadata((!options.metadata.is_empty()).then(|| options.metadata.clone()))
            .send()
            .await
            .with_context(|_| crate::error::PutObjectSnafu { bucket, key })?;

        debug!(e_tag = ?response.e_tag(), "Uploaded object");

        Ok(UploadReceipt {
            key: key.to_string(),
            e_tag: response.e_tag().map(str::to_string),
            size,
            parts: 1,
        })
    }

    /// Download an entire object into memory
    #[instrument(skip(self), fields(identity = %self.inner.identity))]
    pub async fn download_file(&self, bucket: &str, key: &str) -> Result<DownloadedObject> {
        let response = self
            .inner
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|_| crate::error::GetObjectSnafu { bucket, key })?;

        let content_type = response.content_type().map(str::to_string);
        let metadata = response.metadata().cloned().unwrap_or_default();
        let e_tag = response.e_tag().map(str::to_string);

        let data = response
            .body
            .collect()
            .await
            .with_context(|_| crate::error::ReadByteStreamSnafu { bucket, key })?
            .into_bytes();

        debug!(size = data.len(), "Downloaded object");

        Ok(DownloadedObject {
            key: key.to_string(),
            data,
            content_type,
            metadata,
            e_tag,
        })
    }

    #[instrument(skip(self), fields(identity = %self.inner.identity))]
    pub async fn get_object_info(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        let response = self
            .inner
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|_| crate::error::HeadObjectSnafu { bucket, key })?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: non_negative(response.content_length()),
            content_type: response.content_type().map(str::to_string),
            metadata: response.metadata().cloned().unwrap_or_default(),
            e_tag: response.e_tag().map(str::to_string),
            last_modified: to_chrono(response.last_modified()),
        })
    }

    #[instrument(skip(self), fields(identity = %self.inner.identity))]
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.inner
            .client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|_| crate::error::DeleteObjectSnafu { bucket, key })?;

        debug!("Deleted object");

        Ok(())
    }

    /// Delete many objects with as few `DeleteObjects` requests as possible.
    ///
    /// An empty `keys` list is a no-op; S3 rejects empty delete requests.
    #[instrument(skip(self, keys), fields(identity = %self.inner.identity, keys = keys.len()))]
    pub async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteObjectsReport> {
        let mut report = DeleteObjectsReport::default();

        for batch in keys.chunks(MAX_KEYS_PER_DELETE) {
            let objects = batch
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<std::result::Result<Vec<_>, _>>()
                .with_context(|_| crate::error::BuildDeleteRequestSnafu { bucket })?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .build()
                .with_context(|_| crate::error::BuildDeleteRequestSnafu { bucket })?;

            let response = self
                .inner
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .with_context(|_| crate::error::DeleteObjectsSnafu {
                    bucket,
                    count: batch.len(),
                })?;

            report.merge(DeleteObjectsReport {
                deleted: response
                    .deleted()
                    .iter()
                    .filter_map(|deleted| deleted.key().map(str::to_string))
                    .collect(),
                errors: response
                    .errors()
                    .iter()
                    .map(|error| DeleteObjectFailure {
                        key: error.key().unwrap_or_default().to_string(),
                        code: error.code().map(str::to_string),
                        message: error.message().map(str::to_string),
                    })
                    .collect(),
            });
        }

        debug!(
            deleted = report.deleted.len(),
            errors = report.errors.len(),
            "Deleted objects"
        );

        Ok(report)
    }

    /// Emulate a folder by writing an empty marker object whose key ends in `/`.
    ///
    /// Returns the marker key.
    #[instrument(skip(self), fields(identity = %self.inner.identity))]
    pub async fn create_folder(&self, bucket: &str, path: &str) -> Result<String> {
        let key = folder_key(path)?;

        self.inner
            .client
            .put_object()
            .bucket(bucket)
            .key(&key)
            .body(ByteStream::from_static(b""))
            .send()
            .await
            .with_context(|_| crate::error::PutObjectSnafu {
                bucket,
                key: key.clone(),
            })?;

        debug!(%key, "Created folder marker");

        Ok(key)
    }

    /// Delete a folder marker and every object whose key starts with the folder prefix
    #[instrument(skip(self), fields(identity = %self.inner.identity))]
    pub async fn delete_folder(&self, bucket: &str, path: &str) -> Result<DeleteObjectsReport> {
        let prefix = folder_key(path)?;

        let listing = self.list_objects(bucket, &prefix, None).await?;
        let keys = listing.keys().map(str::to_string).collect::<Vec<_>>();

        debug!(%prefix, objects = keys.len(), "Deleting folder contents");

        self.delete_objects(bucket, &keys).await
    }

    /// List every object under `prefix`, following continuation tokens until the listing is
    /// exhausted.
    ///
    /// With a delimiter, objects in "subfolders" are rolled up into [`ObjectListing::folders`].
    #[instrument(skip(self), fields(identity = %self.inner.identity))]
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> Result<ObjectListing> {
        // Use the paginated API to automatically handle dealing with continuation tokens
        let mut pages = self
            .inner
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_delimiter(delimiter.map(str::to_string))
            .into_paginator()
            .send();

        let mut listing = ObjectListing::default();

        while let Some(page) = pages.next().await {
            let page = page.with_context(|_| crate::error::ListObjectsSnafu { bucket, prefix })?;

            // `contents` is empty rather than missing when nothing matches
            listing
                .objects
                .extend(page.contents().iter().filter_map(|object| {
                    object.key().map(|key| ObjectEntry {
                        key: key.to_string(),
                        size: non_negative(object.size()),
                        e_tag: object.e_tag().map(str::to_string),
                        last_modified: to_chrono(object.last_modified()),
                    })
                }));

            listing.folders.extend(
                page.common_prefixes()
                    .iter()
                    .filter_map(|common| common.prefix().map(str::to_string)),
            );
        }

        debug!(
            objects = listing.objects.len(),
            folders = listing.folders.len(),
            "Listed objects"
        );

        Ok(listing)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("identity", &self.inner.identity)
            .field("client", &"<...>")
            .finish()
    }
}
