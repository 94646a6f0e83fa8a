use super::runner::serialize_millis;
use super::TestResult;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use snafu::prelude::*;
use std::path::Path;
use std::time::Duration;

/// The aggregated results of a run, in the order the cases ran
#[derive(Clone, Debug, Serialize)]
pub struct Summary {
    pub started_at: DateTime<Utc>,

    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,

    passed: usize,
    failed: usize,
    pub results: Vec<TestResult>,
}

impl Summary {
    pub fn new(started_at: DateTime<Utc>, duration: Duration, results: Vec<TestResult>) -> Self {
        let passed = results.iter().filter(|result| result.passed).count();

        Self {
            started_at,
            duration,
            passed,
            failed: results.len() - passed,
            results,
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn passed(&self) -> usize {
        self.passed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// True if no case failed.  An empty run counts as a success.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|result| !result.passed)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .context(crate::error::SerializeJsonSnafu { what: "run summary" })
    }

    /// Write the JSON form of the summary to a file, replacing it if it exists
    pub async fn write_json(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;

        tokio::fs::write(path, json)
            .await
            .context(crate::error::WriteReportSnafu { path })
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} total in {:.1}s",
            self.passed,
            self.failed,
            self.total(),
            self.duration.as_secs_f64()
        )
    }
}
