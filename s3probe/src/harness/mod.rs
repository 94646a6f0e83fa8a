//! The test harness: named test cases are registered into a [`Registry`], then a [`Runner`]
//! executes them one after another and aggregates the results into a [`Summary`].
use crate::buckets::BucketConfig;
use crate::Result;
use snafu::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

mod context;
mod runner;
mod summary;

pub use context::{CaseContext, SdkStorageProvider, StorageProvider};
pub use runner::{RunProgressCallback, Runner, TestResult};
pub use summary::Summary;

/// The setup, operations, and verification of one test case.
///
/// Implementations report failure by returning an error; the error's message becomes the
/// failure message of the test result.
#[async_trait::async_trait]
pub trait Scenario: std::fmt::Debug + Sync + Send + 'static {
    /// Run the scenario.  On success, the returned string says what was verified.
    async fn run(&self, ctx: &CaseContext) -> Result<String>;

    /// Remove whatever the scenario left behind.
    ///
    /// The default implementation deletes everything under the case's key prefix.
    async fn cleanup(&self, ctx: &CaseContext) -> Result<()> {
        ctx.clean_prefix().await
    }
}

/// A named test case, ready to execute
#[derive(Clone, Debug)]
pub struct TestCase {
    pub id: String,
    pub description: String,
    pub bucket: BucketConfig,
    pub scenario: Arc<dyn Scenario>,
}

impl TestCase {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        bucket: BucketConfig,
        scenario: impl Scenario,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            bucket,
            scenario: Arc::new(scenario),
        }
    }
}

/// An ordered collection of test cases with unique IDs
#[derive(Debug, Default)]
pub struct Registry {
    cases: Vec<TestCase>,
    ids: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a case to the end of the registry.  Fails if a case with the same ID is already there.
    pub fn register(&mut self, case: TestCase) -> Result<()> {
        ensure!(
            self.ids.insert(case.id.clone()),
            crate::error::DuplicateTestCaseSnafu { id: case.id }
        );

        self.cases.push(case);

        Ok(())
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

impl IntoIterator for Registry {
    type Item = TestCase;
    type IntoIter = std::vec::IntoIter<TestCase>;

    fn into_iter(self) -> Self::IntoIter {
        self.cases.into_iter()
    }
}
