use super::fixtures::{check, expect_absent, expect_present, TestObject, SMALL_OBJECT_SIZE};
use crate::error::ServiceFailure;
use crate::harness::{CaseContext, Scenario};
use crate::outcome::Outcome;
use crate::permissions::{Expectation, Operation};
use crate::storage::{folder_key, DeleteObjectsReport};
use crate::Result;
use tracing::{debug, instrument};

/// Performs one operation against a bucket, with the identity the operation calls for, and checks
/// that the service allows or denies it as expected.
///
/// Whatever the operation needs to already exist is seeded first with the fixture identity.  When
/// the operation is allowed, its effect is verified as well.  When it is denied, the case checks
/// that it had no effect.
#[derive(Clone, Debug)]
pub struct PermissionCheck {
    pub operation: Operation,
    pub expectation: Expectation,
}

impl PermissionCheck {
    pub fn new(operation: Operation, expectation: Expectation) -> Self {
        Self {
            operation,
            expectation,
        }
    }

    /// Compare the outcome with the expectation, returning the operation's value if it was allowed
    fn judge<T>(&self, result: Result<T>) -> Result<Option<T>> {
        let outcome = Outcome::of(&result);

        self.judge_outcome(&outcome)?;

        Ok(result.ok())
    }

    fn judge_outcome(&self, outcome: &Outcome) -> Result<()> {
        debug!(%outcome, expectation = %self.expectation, "Operation completed");

        check(outcome.matches(self.expectation), || {
            let expected = match self.expectation {
                Expectation::Allow => "allowed",
                Expectation::Deny => "denied",
            };

            format!("expected {} to be {expected}, but it was {outcome}", self.operation)
        })
    }

    /// Like [`Self::judge`] for operations that report per-key failures.
    ///
    /// A report where every key was refused for lack of authorization is a denial, and a report
    /// with some other mix of failures is a failure.
    fn judge_deletion(&self, result: Result<DeleteObjectsReport>) -> Result<Option<DeleteObjectsReport>> {
        let outcome = match &result {
            Ok(report) if report.all_denied() => {
                let first = &report.errors[0];

                Outcome::Denied {
                    failure: ServiceFailure {
                        status: None,
                        code: first.code.clone(),
                        message: first.message.clone(),
                    },
                }
            }
            Ok(report) if !report.is_complete() => Outcome::Failed {
                message: format!(
                    "{} of {} keys were not deleted, first was '{}' ({})",
                    report.errors.len(),
                    report.errors.len() + report.deleted.len(),
                    report.errors[0].key,
                    report.errors[0].code.as_deref().unwrap_or("no error code")
                ),
            },
            other => Outcome::of(other),
        };

        self.judge_outcome(&outcome)?;

        Ok(result.ok())
    }

    async fn upload_file(&self, ctx: &CaseContext) -> Result<()> {
        let object = TestObject::random(ctx, "upload.bin", SMALL_OBJECT_SIZE);

        let result = ctx
            .subject
            .upload_file(ctx.bucket_name(), &object.key, object.data.clone(), &object.options)
            .await;

        self.verify_upload(ctx, &object, result.map(|receipt| receipt.size))
            .await
    }

    async fn upload_large_file(&self, ctx: &CaseContext) -> Result<()> {
        let size = ctx.config.large_object_size.get_bytes() as usize;
        let object = TestObject::random(ctx, "large-upload.bin", size);

        let result = ctx
            .subject
            .upload_large_file(ctx.bucket_name(), &object.key, object.data.clone(), &object.options)
            .await;

        if let Ok(receipt) = &result {
            debug!(parts = receipt.parts, "Multi-part upload completed");
        }

        self.verify_upload(ctx, &object, result.map(|receipt| receipt.size))
            .await
    }

    async fn verify_upload(
        &self,
        ctx: &CaseContext,
        object: &TestObject,
        result: Result<u64>,
    ) -> Result<()> {
        match self.judge(result)? {
            Some(reported_size) => {
                check(reported_size == object.data.len() as u64, || {
                    format!(
                        "upload of '{}' reported {reported_size} bytes but {} were sent",
                        object.key,
                        object.data.len()
                    )
                })?;

                let info = expect_present(ctx, &object.key, object.data.len() as u64).await?;
                object.verify_info(&info)
            }
            None => expect_absent(ctx, &object.key).await,
        }
    }

    async fn create_folder(&self, ctx: &CaseContext) -> Result<()> {
        let path = ctx.key("new-folder");
        let marker = folder_key(&path)?;

        let result = ctx.subject.create_folder(ctx.bucket_name(), &path).await;

        match self.judge(result)? {
            Some(created) => {
                check(created == marker, || {
                    format!("folder marker was created as '{created}' instead of '{marker}'")
                })?;

                expect_present(ctx, &marker, 0).await?;
                Ok(())
            }
            None => expect_absent(ctx, &marker).await,
        }
    }

    async fn download_file(&self, ctx: &CaseContext) -> Result<()> {
        let object = TestObject::random(ctx, "download.bin", SMALL_OBJECT_SIZE)
            .seed(ctx)
            .await?;

        let storage = if self.operation.is_anonymous() {
            &ctx.anonymous
        } else {
            &ctx.subject
        };

        let result = storage.download_file(ctx.bucket_name(), &object.key).await;

        if let Some(downloaded) = self.judge(result)? {
            object.verify_download(&downloaded)?;
        }

        Ok(())
    }

    async fn get_object_info(&self, ctx: &CaseContext) -> Result<()> {
        let object = TestObject::random(ctx, "info.bin", SMALL_OBJECT_SIZE)
            .seed(ctx)
            .await?;

        let result = ctx.subject.get_object_info(ctx.bucket_name(), &object.key).await;

        if let Some(info) = self.judge(result)? {
            object.verify_info(&info)?;
        }

        Ok(())
    }

    async fn list_objects(&self, ctx: &CaseContext) -> Result<()> {
        let top = TestObject::random(ctx, "listed.bin", SMALL_OBJECT_SIZE)
            .seed(ctx)
            .await?;
        TestObject::random(ctx, "listed-folder/nested.bin", SMALL_OBJECT_SIZE)
            .seed(ctx)
            .await?;
        let folder = ctx.key("listed-folder/");

        let storage = if self.operation.is_anonymous() {
            &ctx.anonymous
        } else {
            &ctx.subject
        };

        let result = storage
            .list_objects(ctx.bucket_name(), &ctx.prefix, Some("/"))
            .await;

        if let Some(listing) = self.judge(result)? {
            check(listing.contains_key(&top.key), || {
                format!(
                    "listing of '{}' does not contain '{}'; it has {:?}",
                    ctx.prefix,
                    top.key,
                    listing.keys().collect::<Vec<_>>()
                )
            })?;

            check(listing.folders.contains(&folder), || {
                format!(
                    "listing of '{}' does not contain folder '{folder}'; it has {:?}",
                    ctx.prefix, listing.folders
                )
            })?;

            // The nested object is behind the delimiter, so it must not be listed directly
            check(listing.objects.len() == 1, || {
                format!(
                    "listing of '{}' should have exactly one object but it has {:?}",
                    ctx.prefix,
                    listing.keys().collect::<Vec<_>>()
                )
            })?;
        }

        Ok(())
    }

    async fn delete_object(&self, ctx: &CaseContext) -> Result<()> {
        let object = TestObject::random(ctx, "delete-me.bin", SMALL_OBJECT_SIZE)
            .seed(ctx)
            .await?;

        let result = ctx.subject.delete_object(ctx.bucket_name(), &object.key).await;

        match self.judge(result)? {
            Some(()) => expect_absent(ctx, &object.key).await,
            None => {
                expect_present(ctx, &object.key, object.data.len() as u64).await?;
                Ok(())
            }
        }
    }

    async fn delete_objects(&self, ctx: &CaseContext) -> Result<()> {
        let mut objects = Vec::new();
        for name in ["batch-1.bin", "batch-2.bin", "batch-3.bin"] {
            objects.push(
                TestObject::random(ctx, name, SMALL_OBJECT_SIZE)
                    .seed(ctx)
                    .await?,
            );
        }

        let keys = objects
            .iter()
            .map(|object| object.key.clone())
            .collect::<Vec<_>>();

        let result = ctx.subject.delete_objects(ctx.bucket_name(), &keys).await;

        let allowed = self.judge_deletion(result)?.is_some();
        self.verify_deletion(ctx, &objects, allowed).await
    }

    async fn delete_folder(&self, ctx: &CaseContext) -> Result<()> {
        let path = ctx.key("doomed");
        let marker = folder_key(&path)?;

        ctx.fixture.create_folder(ctx.bucket_name(), &path).await?;

        let mut objects = Vec::new();
        for name in ["doomed/a.bin", "doomed/nested/b.bin"] {
            objects.push(
                TestObject::random(ctx, name, SMALL_OBJECT_SIZE)
                    .seed(ctx)
                    .await?,
            );
        }

        let result = ctx.subject.delete_folder(ctx.bucket_name(), &path).await;

        let allowed = self.judge_deletion(result)?.is_some();

        if allowed {
            expect_absent(ctx, &marker).await?;
        } else {
            expect_present(ctx, &marker, 0).await?;
        }

        self.verify_deletion(ctx, &objects, allowed).await
    }

    /// The objects are all gone if the deletion was allowed, and all still there if it wasn't
    async fn verify_deletion(
        &self,
        ctx: &CaseContext,
        objects: &[TestObject],
        allowed: bool,
    ) -> Result<()> {
        for object in objects {
            if allowed {
                expect_absent(ctx, &object.key).await?;
            } else {
                expect_present(ctx, &object.key, object.data.len() as u64).await?;
            }
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl Scenario for PermissionCheck {
    #[instrument(skip(ctx), fields(bucket = %ctx.bucket.name, prefix = %ctx.prefix))]
    async fn run(&self, ctx: &CaseContext) -> Result<String> {
        match self.operation {
            Operation::UploadFile => self.upload_file(ctx).await?,
            Operation::UploadLargeFile => self.upload_large_file(ctx).await?,
            Operation::CreateFolder => self.create_folder(ctx).await?,
            Operation::DownloadFile | Operation::AnonymousDownload => {
                self.download_file(ctx).await?
            }
            Operation::GetObjectInfo => self.get_object_info(ctx).await?,
            Operation::ListObjects | Operation::AnonymousList => self.list_objects(ctx).await?,
            Operation::DeleteObject => self.delete_object(ctx).await?,
            Operation::DeleteObjects => self.delete_objects(ctx).await?,
            Operation::DeleteFolder => self.delete_folder(ctx).await?,
        }

        Ok(match self.expectation {
            Expectation::Allow => format!("{} was allowed and verified", self.operation),
            Expectation::Deny => format!("{} was denied and had no effect", self.operation),
        })
    }
}
