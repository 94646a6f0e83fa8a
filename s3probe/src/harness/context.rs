use crate::buckets::BucketConfig;
use crate::storage::{Identity, Storage};
use crate::{Config, Result};
use rand::prelude::*;
use snafu::prelude::*;
use tracing::{debug, warn};

/// Builds the storage clients a test case needs for a bucket.
///
/// The default implementation is [`SdkStorageProvider`]; tests substitute their own.
#[async_trait::async_trait]
pub trait StorageProvider: Sync + Send {
    /// Storage authenticated as the privileged identity used for setup and cleanup
    async fn fixture(&self, bucket: &BucketConfig) -> Storage;

    /// Storage authenticated as the identity whose grants on `bucket` are under test
    async fn subject(&self, bucket: &BucketConfig) -> Storage;

    /// Storage that sends unsigned requests
    async fn anonymous(&self, bucket: &BucketConfig) -> Storage;
}

/// Makes real AWS SDK clients from the config and the bucket's credentials
#[derive(Clone, Debug)]
pub struct SdkStorageProvider {
    config: Config,
}

impl SdkStorageProvider {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl StorageProvider for SdkStorageProvider {
    async fn fixture(&self, bucket: &BucketConfig) -> Storage {
        Storage::connect(&self.config, Identity::Fixture, bucket.region.as_deref()).await
    }

    async fn subject(&self, bucket: &BucketConfig) -> Storage {
        let identity = match &bucket.credentials {
            Some(credentials) => Identity::Scoped(credentials),
            None => Identity::Fixture,
        };

        Storage::connect(&self.config, identity, bucket.region.as_deref()).await
    }

    async fn anonymous(&self, bucket: &BucketConfig) -> Storage {
        Storage::connect(&self.config, Identity::Anonymous, bucket.region.as_deref()).await
    }
}

/// Everything a scenario needs while running one test case
#[derive(Clone, Debug)]
pub struct CaseContext {
    pub case_id: String,
    pub bucket: BucketConfig,

    /// Every object the case creates goes under this prefix, so that cases never see each
    /// other's objects and cleanup knows exactly what to remove.  Always ends in `/`.
    pub prefix: String,

    pub fixture: Storage,
    pub subject: Storage,
    pub anonymous: Storage,
    pub config: Config,
}

impl CaseContext {
    pub async fn new(
        case_id: &str,
        bucket: &BucketConfig,
        config: &Config,
        provider: &dyn StorageProvider,
    ) -> Self {
        let prefix = format!("s3probe-{:08x}/", rand::thread_rng().next_u32());

        debug!(case_id, bucket = %bucket.name, %prefix, "Preparing test case context");

        Self {
            case_id: case_id.to_string(),
            bucket: bucket.clone(),
            prefix,
            fixture: provider.fixture(bucket).await,
            subject: provider.subject(bucket).await,
            anonymous: provider.anonymous(bucket).await,
            config: config.clone(),
        }
    }

    /// The full key of an object named `name` within this case's prefix
    pub fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket.name
    }

    /// Delete everything under this case's prefix with the fixture identity, including multi-part
    /// uploads that were never finished, then verify that nothing is left.
    pub async fn clean_prefix(&self) -> Result<()> {
        let bucket = self.bucket_name();

        let report = self.fixture.delete_folder(bucket, &self.prefix).await?;

        let aborted = self
            .fixture
            .abort_incomplete_uploads(bucket, &self.prefix)
            .await?;
        if aborted > 0 {
            warn!(aborted, prefix = %self.prefix, "Aborted multi-part uploads left behind by the case");
        }

        if let Some(error) = report.errors.first() {
            return crate::error::CheckFailedSnafu {
                message: format!(
                    "cleanup failed to delete {} objects, first was '{}' ({})",
                    report.errors.len(),
                    error.key,
                    error.code.as_deref().unwrap_or("no error code")
                ),
            }
            .fail();
        }

        let remaining = self
            .fixture
            .list_objects(bucket, &self.prefix, None)
            .await?
            .objects
            .len();

        ensure!(
            remaining == 0,
            crate::error::CleanupIncompleteSnafu {
                bucket,
                prefix: &self.prefix,
                remaining,
            }
        );

        debug!(
            bucket,
            prefix = %self.prefix,
            deleted = report.deleted.len(),
            "Cleaned up test case objects"
        );

        Ok(())
    }
}
