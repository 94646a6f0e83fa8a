//! The permission model: which grants a bucket configuration carries, which grants each probed
//! operation needs, and the matrix of expected outcomes that follows from the two.
use crate::buckets::BucketConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use strum::IntoEnumIterator;

/// A single capability that can be granted on a bucket
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::EnumIter,
    strum::Display,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    List,
    Delete,
}

impl Permission {
    /// The letter used for this permission in grant labels like `rw-d`
    fn letter(self) -> char {
        match self {
            Self::Read => 'r',
            Self::Write => 'w',
            Self::List => 'l',
            Self::Delete => 'd',
        }
    }
}

/// The set of permissions granted to the identity under test on a bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionGrants {
    pub read: bool,
    pub write: bool,
    pub list: bool,
    pub delete: bool,
}

impl PermissionGrants {
    pub const fn all() -> Self {
        Self {
            read: true,
            write: true,
            list: true,
            delete: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            read: false,
            write: false,
            list: false,
            delete: false,
        }
    }

    pub fn allows(&self, permission: Permission) -> bool {
        match permission {
            Permission::Read => self.read,
            Permission::Write => self.write,
            Permission::List => self.list,
            Permission::Delete => self.delete,
        }
    }

    /// True if every one of `permissions` is granted
    pub fn allows_all(&self, permissions: &[Permission]) -> bool {
        permissions.iter().all(|permission| self.allows(*permission))
    }

    /// Every possible combination of grants, from no grants at all to all of them.
    ///
    /// The order is stable: bit 0 is read, bit 1 write, bit 2 list, bit 3 delete.
    pub fn combinations() -> impl Iterator<Item = Self> {
        (0u8..16).map(|bits| Self {
            read: bits & 0b0001 != 0,
            write: bits & 0b0010 != 0,
            list: bits & 0b0100 != 0,
            delete: bits & 0b1000 != 0,
        })
    }

    /// Compact label like `rw-d`, with one position per permission in the order r, w, l, d
    pub fn label(&self) -> String {
        Permission::iter()
            .map(|permission| {
                if self.allows(permission) {
                    permission.letter()
                } else {
                    '-'
                }
            })
            .collect()
    }

    /// Parse a label produced by [`Self::label`]
    pub fn from_label(label: &str) -> Result<Self> {
        let chars = label.chars().collect::<Vec<_>>();

        snafu::ensure!(
            chars.len() == 4,
            crate::error::InvalidPermissionLabelSnafu { label }
        );

        let mut grants = Self::none();

        for (permission, c) in Permission::iter().zip(chars) {
            let granted = if c == permission.letter() {
                true
            } else if c == '-' {
                false
            } else {
                return crate::error::InvalidPermissionLabelSnafu { label }.fail();
            };

            match permission {
                Permission::Read => grants.read = granted,
                Permission::Write => grants.write = granted,
                Permission::List => grants.list = granted,
                Permission::Delete => grants.delete = granted,
            }
        }

        Ok(grants)
    }

    /// Build an IAM-style policy document that grants exactly these permissions on `bucket`.
    ///
    /// Attach this to the identity whose credentials are configured for the bucket.  A grant set
    /// with no permissions at all still yields a valid document with an empty statement list.
    pub fn policy_document(&self, bucket: &str) -> serde_json::Value {
        let mut object_actions = Vec::new();
        let mut bucket_actions = Vec::new();

        if self.read {
            object_actions.push("s3:GetObject");
        }
        if self.write {
            object_actions.extend([
                "s3:PutObject",
                "s3:AbortMultipartUpload",
                "s3:ListMultipartUploadParts",
            ]);
            bucket_actions.push("s3:ListBucketMultipartUploads");
        }
        if self.list {
            bucket_actions.push("s3:ListBucket");
        }
        if self.delete {
            object_actions.push("s3:DeleteObject");
        }

        let mut statements = Vec::new();

        if !bucket_actions.is_empty() {
            statements.push(json!({
                "Effect": "Allow",
                "Action": bucket_actions,
                "Resource": [format!("arn:aws:s3:::{bucket}")],
            }));
        }

        if !object_actions.is_empty() {
            statements.push(json!({
                "Effect": "Allow",
                "Action": object_actions,
                "Resource": [format!("arn:aws:s3:::{bucket}/*")],
            }));
        }

        json!({
            "Version": "2012-10-17",
            "Statement": statements,
        })
    }
}

impl std::fmt::Display for PermissionGrants {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// Who can reach a bucket without credentials
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::EnumIter,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BucketType {
    /// Anonymous clients can read objects
    Public,

    /// Only authenticated, authorized identities can do anything
    #[default]
    Private,
}

/// The bucket policy which lets anonymous clients read the objects in a public bucket, and also
/// list the bucket if `allow_list` is set.
pub fn public_read_policy(bucket: &str, allow_list: bool) -> serde_json::Value {
    let mut statements = vec![json!({
        "Effect": "Allow",
        "Principal": {"AWS": ["*"]},
        "Action": ["s3:GetObject"],
        "Resource": [format!("arn:aws:s3:::{bucket}/*")],
    })];

    if allow_list {
        statements.push(json!({
            "Effect": "Allow",
            "Principal": {"AWS": ["*"]},
            "Action": ["s3:ListBucket"],
            "Resource": [format!("arn:aws:s3:::{bucket}")],
        }));
    }

    json!({
        "Version": "2012-10-17",
        "Statement": statements,
    })
}

/// A façade operation probed against a bucket to see if it's allowed or denied
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
    strum::IntoStaticStr,
)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Operation {
    UploadFile,
    UploadLargeFile,
    CreateFolder,
    DownloadFile,
    GetObjectInfo,
    ListObjects,
    DeleteObject,
    DeleteObjects,
    DeleteFolder,
    AnonymousDownload,
    AnonymousList,
}

/// Whether an operation is supposed to succeed or be rejected by the service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Expectation {
    Allow,
    Deny,
}

impl Expectation {
    fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Self::Allow
        } else {
            Self::Deny
        }
    }
}

impl Operation {
    /// The grants the subject identity needs for this operation to be allowed.
    ///
    /// Anonymous operations don't depend on the subject's grants at all, so they need none.
    pub fn required(&self) -> &'static [Permission] {
        match self {
            Self::UploadFile | Self::UploadLargeFile | Self::CreateFolder => &[Permission::Write],
            Self::DownloadFile | Self::GetObjectInfo => &[Permission::Read],
            Self::ListObjects => &[Permission::List],
            Self::DeleteObject | Self::DeleteObjects => &[Permission::Delete],
            Self::DeleteFolder => &[Permission::List, Permission::Delete],
            Self::AnonymousDownload | Self::AnonymousList => &[],
        }
    }

    /// Operations performed without any credentials
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::AnonymousDownload | Self::AnonymousList)
    }

    /// The outcome this operation should have against `bucket`
    pub fn expectation(&self, bucket: &BucketConfig) -> Expectation {
        let allowed = match self {
            Self::AnonymousDownload => bucket.bucket_type == BucketType::Public,
            Self::AnonymousList => bucket.bucket_type == BucketType::Public && bucket.public_list,
            other => bucket.permissions.allows_all(other.required()),
        };

        Expectation::from_allowed(allowed)
    }

    /// One-line description used in test case descriptions
    pub fn describe(&self) -> &'static str {
        match self {
            Self::UploadFile => "upload a small object",
            Self::UploadLargeFile => "upload an object with the multipart API",
            Self::CreateFolder => "create a folder marker object",
            Self::DownloadFile => "download an object and verify its contents",
            Self::GetObjectInfo => "read object metadata and verify it",
            Self::ListObjects => "list objects and folders under a prefix",
            Self::DeleteObject => "delete a single object",
            Self::DeleteObjects => "delete several objects in one request",
            Self::DeleteFolder => "delete a folder and everything in it",
            Self::AnonymousDownload => "download an object without credentials",
            Self::AnonymousList => "list objects without credentials",
        }
    }
}

/// One cell of the permission matrix
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatrixEntry {
    pub bucket: BucketConfig,
    pub operation: Operation,
    pub expectation: Expectation,
}

/// The cross product of bucket configurations and probed operations, with the expected outcome of
/// each combination.
#[derive(Clone, Debug, Default)]
pub struct PermissionMatrix {
    entries: Vec<MatrixEntry>,
}

impl PermissionMatrix {
    /// Build the matrix for every operation against every bucket
    pub fn new(buckets: &[BucketConfig]) -> Self {
        Self::for_operations(buckets, Operation::iter())
    }

    /// Build the matrix restricted to some operations.
    ///
    /// Entries are ordered bucket by bucket, and within a bucket in the order of `operations`.
    pub fn for_operations(
        buckets: &[BucketConfig],
        operations: impl IntoIterator<Item = Operation>,
    ) -> Self {
        let operations = operations.into_iter().collect::<Vec<_>>();

        let entries = buckets
            .iter()
            .flat_map(|bucket| {
                operations.iter().map(move |operation| MatrixEntry {
                    bucket: bucket.clone(),
                    operation: *operation,
                    expectation: operation.expectation(bucket),
                })
            })
            .collect();

        Self { entries }
    }

    /// Generate bucket configuration templates covering every bucket type and grant combination.
    ///
    /// The bucket names are `<prefix>-<type>-<grants>`, where the grant label's `-` characters are
    /// replaced by `x` so the name is a valid bucket name.  Credentials are left empty for the
    /// operator to fill in.
    pub fn template(prefix: &str) -> Vec<BucketConfig> {
        BucketType::iter()
            .flat_map(|bucket_type| {
                PermissionGrants::combinations().map(move |permissions| {
                    let name = format!(
                        "{prefix}-{bucket_type}-{}",
                        permissions.label().replace('-', "x")
                    );

                    BucketConfig {
                        permissions,
                        bucket_type,
                        ..BucketConfig::new(name)
                    }
                })
            })
            .collect()
    }

    pub fn entries(&self) -> &[MatrixEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries expected to be allowed and denied, in that order
    pub fn tally(&self) -> (usize, usize) {
        let allowed = self
            .entries
            .iter()
            .filter(|entry| entry.expectation == Expectation::Allow)
            .count();

        (allowed, self.entries.len() - allowed)
    }
}

impl IntoIterator for PermissionMatrix {
    type Item = MatrixEntry;
    type IntoIter = std::vec::IntoIter<MatrixEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
