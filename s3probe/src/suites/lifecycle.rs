use super::fixtures::{check, TestObject, SMALL_OBJECT_SIZE};
use crate::buckets::BucketConfig;
use crate::harness::{CaseContext, Scenario};
use crate::permissions::PermissionGrants;
use crate::Result;
use rand::prelude::*;
use tracing::{debug, info, instrument, warn};

/// Creates a fresh bucket with the fixture identity, uses it, and deletes it again, checking
/// along the way that the bucket shows up in the bucket listing exactly while it exists.
#[derive(Clone, Debug, Default)]
pub struct BucketLifecycle;

impl BucketLifecycle {
    /// A bucket config for a bucket that doesn't exist yet, with a unique name starting with
    /// `prefix`
    pub fn bucket(prefix: &str, region: Option<&str>) -> BucketConfig {
        let name = format!("{prefix}-lifecycle-{:08x}", rand::thread_rng().next_u32());

        BucketConfig {
            region: region.map(str::to_string),
            permissions: PermissionGrants::all(),
            ..BucketConfig::new(name)
        }
    }

    async fn is_listed(ctx: &CaseContext) -> Result<bool> {
        let buckets = ctx.fixture.list_buckets().await?;

        Ok(buckets
            .iter()
            .any(|bucket| bucket.name == ctx.bucket_name()))
    }
}

#[async_trait::async_trait]
impl Scenario for BucketLifecycle {
    #[instrument(skip(self, ctx), fields(bucket = %ctx.bucket.name))]
    async fn run(&self, ctx: &CaseContext) -> Result<String> {
        let bucket = ctx.bucket_name();

        ctx.fixture
            .create_bucket(bucket, ctx.bucket.region.as_deref())
            .await?;
        info!("Created bucket");

        check(Self::is_listed(ctx).await?, || {
            format!("bucket '{bucket}' was created but is not in the bucket listing")
        })?;

        let object = TestObject::random(ctx, "lifecycle.bin", SMALL_OBJECT_SIZE)
            .seed(ctx)
            .await?;

        let downloaded = ctx.fixture.download_file(bucket, &object.key).await?;
        object.verify_download(&downloaded)?;

        ctx.fixture.delete_object(bucket, &object.key).await?;

        let remaining = ctx.fixture.list_objects(bucket, "", None).await?;
        check(remaining.objects.is_empty(), || {
            format!(
                "bucket '{bucket}' should be empty after deleting '{}' but it has {:?}",
                object.key,
                remaining.keys().collect::<Vec<_>>()
            )
        })?;

        ctx.fixture.delete_bucket(bucket).await?;
        info!("Deleted bucket");

        check(!Self::is_listed(ctx).await?, || {
            format!("bucket '{bucket}' was deleted but is still in the bucket listing")
        })?;

        Ok(format!("bucket '{bucket}' went through its whole lifecycle"))
    }

    async fn cleanup(&self, ctx: &CaseContext) -> Result<()> {
        let bucket = ctx.bucket_name();

        if !ctx.fixture.bucket_exists(bucket).await? {
            debug!(bucket, "Bucket is already gone");
            return Ok(());
        }

        warn!(bucket, "Bucket survived the lifecycle test; removing it");

        let keys = ctx
            .fixture
            .list_objects(bucket, "", None)
            .await?
            .keys()
            .map(str::to_string)
            .collect::<Vec<_>>();

        ctx.fixture.delete_objects(bucket, &keys).await?;
        ctx.fixture.delete_bucket(bucket).await
    }
}
