//! Bucket configurations: which buckets to probe, what the identity under test is allowed to do
//! with each of them, and how to authenticate as that identity.
//!
//! Bucket configurations are read from a JSON file of the form:
//!
//! ```json
//! {
//!   "buckets": [
//!     {
//!       "name": "probe-private-read-only",
//!       "type": "private",
//!       "permissions": { "read": true },
//!       "credentials": { "access_key_id": "...", "secret_access_key": "..." }
//!     }
//!   ]
//! }
//! ```
use crate::permissions::{BucketType, PermissionGrants};
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashSet;
use std::path::Path;

/// Access keys of the identity whose permissions are being probed
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for BucketCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// A bucket to probe and the permissions the identity under test holds on it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketConfig {
    pub name: String,

    /// Region the bucket lives in, if different from the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default, rename = "type")]
    pub bucket_type: BucketType,

    #[serde(default)]
    pub permissions: PermissionGrants,

    /// Credentials of the identity holding `permissions`.
    ///
    /// If not set, the privileged credentials from the config are used, in which case
    /// `permissions` had better grant everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<BucketCredentials>,

    /// Public buckets let anonymous clients list their contents too
    #[serde(default)]
    pub public_list: bool,

    /// Create the bucket if it doesn't exist, and apply the public read policy if it's public
    #[serde(default)]
    pub create: bool,
}

impl BucketConfig {
    /// A private bucket with no grants
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: None,
            bucket_type: BucketType::Private,
            permissions: PermissionGrants::none(),
            credentials: None,
            public_list: false,
            create: false,
        }
    }

    /// Check that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        // Bucket names are 3 to 63 characters of lowercase letters, digits, `.` and `-`, and
        // must start and end with a letter or digit.
        static BUCKET_NAME: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9.\-]{1,61}[a-z0-9]$").unwrap());

        ensure!(
            BUCKET_NAME.is_match(&self.name) && !self.name.contains(".."),
            crate::error::InvalidBucketConfigSnafu {
                bucket: self.name.clone(),
                reason: "not a valid S3 bucket name",
            }
        );

        if let Some(credentials) = &self.credentials {
            ensure!(
                !credentials.access_key_id.is_empty() && !credentials.secret_access_key.is_empty(),
                crate::error::InvalidBucketConfigSnafu {
                    bucket: self.name.clone(),
                    reason: "credentials need both an access key ID and a secret access key",
                }
            );
        }

        ensure!(
            !self.public_list || self.bucket_type == BucketType::Public,
            crate::error::InvalidBucketConfigSnafu {
                bucket: self.name.clone(),
                reason: "`public_list` only makes sense for public buckets",
            }
        );

        Ok(())
    }
}

/// The contents of a bucket configuration file
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketFile {
    pub buckets: Vec<BucketConfig>,
}

impl BucketFile {
    /// Read and validate a bucket configuration file
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|_| crate::error::ReadBucketFileSnafu { path })?;

        let file: Self = serde_json::from_str(&text)
            .with_context(|_| crate::error::ParseBucketFileSnafu { path })?;

        file.validate()?;

        Ok(file)
    }

    /// Validate every bucket, and make sure no bucket is listed twice
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();

        for bucket in &self.buckets {
            bucket.validate()?;

            ensure!(
                names.insert(bucket.name.as_str()),
                crate::error::InvalidBucketConfigSnafu {
                    bucket: bucket.name.clone(),
                    reason: "the bucket is listed more than once",
                }
            );
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context(crate::error::SerializeJsonSnafu {
            what: "bucket configuration",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::S3ProbeError;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn parse_with_defaults() {
        let json = r#"{
            "buckets": [
                { "name": "probe-minimal" },
                {
                    "name": "probe-public",
                    "region": "eu-west-1",
                    "type": "public",
                    "permissions": { "read": true, "list": true },
                    "credentials": { "access_key_id": "AKID", "secret_access_key": "SECRET" },
                    "public_list": true,
                    "create": true
                }
            ]
        }"#;

        let file: BucketFile = serde_json::from_str(json).unwrap();
        file.validate().unwrap();

        let minimal = &file.buckets[0];
        assert_eq!(BucketConfig::new("probe-minimal"), *minimal);

        let public = &file.buckets[1];
        assert_eq!(Some("eu-west-1"), public.region.as_deref());
        assert_eq!(BucketType::Public, public.bucket_type);
        assert_eq!("r-l-", public.permissions.label());
        assert_eq!("AKID", public.credentials.as_ref().unwrap().access_key_id);
        assert!(public.public_list);
        assert!(public.create);
    }

    #[test]
    fn invalid_names_are_rejected() {
        for name in [
            "",
            "ab",
            "Upper-Case",
            "under_score",
            "-leading-dash",
            "double..dot",
            &"x".repeat(64),
        ] {
            assert_matches!(
                BucketConfig::new(name).validate(),
                Err(S3ProbeError::InvalidBucketConfig { .. }),
                "bucket name '{name}' should be invalid"
            );
        }

        BucketConfig::new("a.valid-bucket-123").validate().unwrap();
    }

    #[test]
    fn incomplete_credentials_are_rejected() {
        let bucket = BucketConfig {
            credentials: Some(BucketCredentials {
                access_key_id: "AKID".to_string(),
                secret_access_key: String::new(),
            }),
            ..BucketConfig::new("probe-bucket")
        };

        assert_matches!(
            bucket.validate(),
            Err(S3ProbeError::InvalidBucketConfig { .. })
        );
    }

    #[test]
    fn public_list_requires_a_public_bucket() {
        let bucket = BucketConfig {
            public_list: true,
            ..BucketConfig::new("probe-bucket")
        };

        assert_matches!(
            bucket.validate(),
            Err(S3ProbeError::InvalidBucketConfig { .. })
        );
    }

    #[test]
    fn duplicate_buckets_are_rejected() {
        let file = BucketFile {
            buckets: vec![
                BucketConfig::new("probe-bucket"),
                BucketConfig::new("probe-bucket"),
            ],
        };

        assert_matches!(
            file.validate(),
            Err(S3ProbeError::InvalidBucketConfig { bucket, .. }) if bucket == "probe-bucket"
        );
    }

    #[test]
    fn secrets_are_not_debug_printed() {
        let credentials = BucketCredentials {
            access_key_id: "AKID".to_string(),
            secret_access_key: "very-secret".to_string(),
        };

        let debug = format!("{credentials:?}");
        assert!(debug.contains("AKID"));
        assert!(!debug.contains("very-secret"));
    }

    #[tokio::test]
    async fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let buckets = BucketFile {
            buckets: crate::PermissionMatrix::template("probe"),
        };
        file.write_all(buckets.to_json().unwrap().as_bytes())
            .unwrap();

        let loaded = BucketFile::load(file.path()).await.unwrap();
        assert_eq!(buckets, loaded);
    }

    #[tokio::test]
    async fn load_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ \"buckets\": [ { } ] }").unwrap();

        assert_matches!(
            BucketFile::load(file.path()).await,
            Err(S3ProbeError::ParseBucketFile { .. })
        );

        assert_matches!(
            BucketFile::load(Path::new("/nonexistent/buckets.json")).await,
            Err(S3ProbeError::ReadBucketFile { .. })
        );
    }
}
