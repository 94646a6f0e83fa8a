use super::{CaseContext, Registry, SdkStorageProvider, StorageProvider, Summary, TestCase};
use crate::permissions::{public_read_policy, BucketType};
use crate::{Config, Result, S3ProbeError};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, instrument, Instrument};

/// The result of executing one test case
#[derive(Clone, Debug, Serialize)]
pub struct TestResult {
    pub id: String,
    pub description: String,
    pub bucket: String,
    pub passed: bool,

    /// On success what was verified, on failure why the case failed
    pub message: String,

    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

pub(super) fn serialize_millis<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// A trait which callers can implement to get progress updates as a run proceeds.
#[allow(unused_variables)]
pub trait RunProgressCallback: Sync + Send {
    /// The run is about to start executing `total_cases` test cases
    fn run_starting(&self, total_cases: usize) {}

    fn case_started(&self, id: &str, description: &str) {}

    fn case_finished(&self, result: &TestResult) {}

    /// All cases have run.  Called exactly once per run.
    fn run_finished(&self, summary: &Summary) {}
}

/// Executes the cases in a [`Registry`] strictly one after another.
///
/// A failing case never stops the run; its failure is recorded and the next case starts.
pub struct Runner {
    config: Config,
    provider: Arc<dyn StorageProvider>,
    case_timeout: Duration,
}

impl Runner {
    pub fn new(config: Config) -> Self {
        let provider = Arc::new(SdkStorageProvider::new(config.clone()));

        Self::with_provider(config, provider)
    }

    /// Use a custom way of constructing the storage clients for each case
    pub fn with_provider(config: Config, provider: Arc<dyn StorageProvider>) -> Self {
        let case_timeout = config.case_timeout();

        Self {
            config,
            provider,
            case_timeout,
        }
    }

    /// Override the per-case time limit from the config
    pub fn case_timeout(mut self, case_timeout: Duration) -> Self {
        self.case_timeout = case_timeout;
        self
    }

    /// Alternative to [`Self::run`] for callers that do not care about progress information.
    pub async fn run_without_progress(&self, registry: Registry) -> Summary {
        struct NoProgress {}
        impl RunProgressCallback for NoProgress {}

        self.run(registry, NoProgress {}).await
    }

    /// Run every case in the registry, returning once all have finished.
    pub async fn run<Progress>(&self, registry: Registry, progress: Progress) -> Summary
    where
        Progress: RunProgressCallback,
    {
        let started_at = Utc::now();
        let started = Instant::now();
        let total_cases = registry.len();

        info!(total_cases, "Starting test run");
        progress.run_starting(total_cases);

        let mut provisioned = HashSet::new();
        let mut results = Vec::with_capacity(total_cases);

        for case in registry {
            progress.case_started(&case.id, &case.description);

            let span = info_span!("case", id = %case.id, bucket = %case.bucket.name);
            let result = self
                .run_case(&case, &mut provisioned)
                .instrument(span)
                .await;

            progress.case_finished(&result);
            results.push(result);
        }

        let summary = Summary::new(started_at, started.elapsed(), results);

        info!(
            passed = summary.passed(),
            failed = summary.failed(),
            "Test run finished"
        );
        progress.run_finished(&summary);

        summary
    }

    async fn run_case(&self, case: &TestCase, provisioned: &mut HashSet<String>) -> TestResult {
        let started = Instant::now();

        let ctx = CaseContext::new(&case.id, &case.bucket, &self.config, &*self.provider).await;

        let outcome = match self
            .with_timeout("provision", self.provision(&ctx, provisioned))
            .await
        {
            Ok(()) => self.with_timeout("run", case.scenario.run(&ctx)).await,
            Err(e) => Err(e),
        };

        let cleanup = if self.config.skip_cleanup {
            debug!(prefix = %ctx.prefix, "Skipping cleanup");
            Ok(())
        } else {
            self.with_timeout("cleanup", case.scenario.cleanup(&ctx))
                .await
        };

        let (passed, message) = match (outcome, cleanup) {
            (Ok(message), Ok(())) => (true, message),
            (Ok(_), Err(cleanup_err)) => {
                log_failure(&cleanup_err);
                (false, format!("cleanup failed: {}", describe(&cleanup_err)))
            }
            (Err(e), Ok(())) => {
                log_failure(&e);
                (false, describe(&e))
            }
            (Err(e), Err(cleanup_err)) => {
                log_failure(&e);
                log_failure(&cleanup_err);
                (
                    false,
                    format!(
                        "{}; cleanup also failed: {}",
                        describe(&e),
                        describe(&cleanup_err)
                    ),
                )
            }
        };

        let duration = started.elapsed();

        if passed {
            info!(?duration, %message, "Test case passed");
        } else {
            error!(?duration, %message, "Test case failed");
        }

        TestResult {
            id: case.id.clone(),
            description: case.description.clone(),
            bucket: case.bucket.name.clone(),
            passed,
            message,
            duration,
        }
    }

    async fn with_timeout<T>(
        &self,
        phase: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.case_timeout, fut).await {
            Ok(result) => result,
            Err(_) => crate::error::CheckFailedSnafu {
                message: format!("{phase} timed out after {:?}", self.case_timeout),
            }
            .fail(),
        }
    }

    /// Create the case's bucket, once per run, if the bucket config asks for it
    #[instrument(skip(self, ctx, provisioned), fields(bucket = %ctx.bucket.name))]
    async fn provision(&self, ctx: &CaseContext, provisioned: &mut HashSet<String>) -> Result<()> {
        let bucket = &ctx.bucket;

        if !bucket.create || provisioned.contains(&bucket.name) {
            return Ok(());
        }

        if ctx.fixture.bucket_exists(&bucket.name).await? {
            debug!("Bucket already exists");
        } else {
            ctx.fixture
                .create_bucket(&bucket.name, bucket.region.as_deref())
                .await?;
            info!("Created bucket");
        }

        if bucket.bucket_type == BucketType::Public {
            ctx.fixture
                .put_bucket_policy(
                    &bucket.name,
                    &public_read_policy(&bucket.name, bucket.public_list),
                )
                .await?;
            info!(public_list = bucket.public_list, "Applied public read policy");
        }

        provisioned.insert(bucket.name.clone());

        Ok(())
    }
}

/// The failure message for an error, with whatever the service said about it
fn describe(e: &S3ProbeError) -> String {
    match e.service_failure() {
        Some(failure) => format!("{e} ({failure})"),
        None => e.to_string(),
    }
}

fn log_failure(e: &S3ProbeError) {
    match e.service_failure() {
        Some(failure) => error!(
            status = ?failure.status,
            code = ?failure.code,
            service_message = ?failure.message,
            error = %e,
            "Service request failed"
        ),
        None => error!(error = %e, "Test case error"),
    }
}
