//! The test scenarios, and the planning that turns bucket configurations into registered cases.
use crate::buckets::BucketConfig;
use crate::harness::{Registry, TestCase};
use crate::permissions::{Operation, PermissionMatrix};
use crate::Result;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

mod fixtures;
mod lifecycle;
mod permission;

pub use lifecycle::BucketLifecycle;
pub use permission::PermissionCheck;

/// A group of related test cases that can be selected as a unit
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::EnumIter,
    strum::Display,
    strum::EnumString,
)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Suite {
    /// Every selected operation against every configured bucket
    Permissions,

    /// Create, use and delete a fresh bucket
    Lifecycle,
}

/// Which cases to register
#[derive(Clone, Debug)]
pub struct Selection {
    pub suites: Vec<Suite>,

    /// Operations for the permissions suite.  Empty means all of them.
    pub operations: Vec<Operation>,

    /// Name prefix of the bucket the lifecycle suite creates
    pub lifecycle_bucket_prefix: String,

    /// Region of the bucket the lifecycle suite creates
    pub lifecycle_region: Option<String>,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            suites: Suite::iter().collect(),
            operations: vec![],
            lifecycle_bucket_prefix: "s3probe".to_string(),
            lifecycle_region: None,
        }
    }
}

/// Register the cases for `selection` against `buckets`.
///
/// Permission cases are named `<bucket>/<operation>` and ordered bucket by bucket; the lifecycle
/// case is named `lifecycle/<bucket>` and comes last.
pub fn plan(buckets: &[BucketConfig], selection: &Selection) -> Result<Registry> {
    let mut registry = Registry::new();

    if selection.suites.contains(&Suite::Permissions) {
        let operations = if selection.operations.is_empty() {
            Operation::iter().collect()
        } else {
            selection.operations.clone()
        };

        for entry in PermissionMatrix::for_operations(buckets, operations) {
            let description = format!(
                "{} on {} bucket with grants {}; expect {}",
                entry.operation.describe(),
                entry.bucket.bucket_type,
                entry.bucket.permissions,
                entry.expectation
            );

            registry.register(TestCase::new(
                format!("{}/{}", entry.bucket.name, entry.operation),
                description,
                entry.bucket,
                PermissionCheck::new(entry.operation, entry.expectation),
            ))?;
        }
    }

    if selection.suites.contains(&Suite::Lifecycle) {
        let bucket = BucketLifecycle::bucket(
            &selection.lifecycle_bucket_prefix,
            selection.lifecycle_region.as_deref(),
        );

        registry.register(TestCase::new(
            format!("lifecycle/{}", bucket.name),
            "create, list, use and delete a fresh bucket",
            bucket,
            BucketLifecycle,
        ))?;
    }

    Ok(registry)
}
