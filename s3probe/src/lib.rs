#![doc = include_str!("../README.md")]

mod buckets;
mod config;
mod error;
mod harness;
mod outcome;
mod permissions;
mod storage;
mod suites;

pub use buckets::{BucketConfig, BucketCredentials, BucketFile};
pub use config::Config;
pub use error::{Result, S3ProbeError, ServiceFailure};
pub use harness::{
    CaseContext, Registry, RunProgressCallback, Runner, Scenario, SdkStorageProvider,
    StorageProvider, Summary, TestCase, TestResult,
};
pub use outcome::{is_denial, is_denial_code, Outcome};
pub use permissions::{
    public_read_policy, BucketType, Expectation, MatrixEntry, Operation, Permission,
    PermissionGrants, PermissionMatrix,
};
pub use storage::{
    folder_key, BucketSummary, DeleteObjectFailure, DeleteObjectsReport, DownloadedObject,
    ObjectEntry, ObjectInfo, ObjectListing, Storage, UploadOptions, UploadReceipt,
};
pub use suites::{plan, BucketLifecycle, PermissionCheck, Selection, Suite};
