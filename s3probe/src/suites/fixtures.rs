//! Test objects seeded with the fixture identity, and the checks that compare what the service
//! returns against them.
use crate::harness::CaseContext;
use crate::storage::{DownloadedObject, ObjectInfo, UploadOptions};
use crate::Result;
use bytes::Bytes;
use rand::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Size of the objects used by every operation except the large upload
pub(crate) const SMALL_OBJECT_SIZE: usize = 4 * 1024;

pub(crate) const CONTENT_TYPE: &str = "application/x-s3probe";

/// User metadata key holding the SHA-256 of the object's data
pub(crate) const SHA256_METADATA_KEY: &str = "s3probe-sha256";

/// User metadata key holding the ID of the case that wrote the object
pub(crate) const CASE_METADATA_KEY: &str = "s3probe-case";

/// An object written by a test case, along with what it should look like when read back
#[derive(Clone, Debug)]
pub(crate) struct TestObject {
    pub key: String,
    pub data: Bytes,
    pub sha256: String,
    pub options: UploadOptions,
}

impl TestObject {
    /// Random contents of `size` bytes, to be stored under `name` in the case's prefix
    pub fn random(ctx: &CaseContext, name: &str, size: usize) -> Self {
        let mut data = vec![0u8; size];
        rand::thread_rng().fill_bytes(&mut data);

        let data = Bytes::from(data);
        let sha256 = sha256_hex(&data);

        let metadata = HashMap::from([
            (SHA256_METADATA_KEY.to_string(), sha256.clone()),
            (CASE_METADATA_KEY.to_string(), ctx.case_id.clone()),
        ]);

        Self {
            key: ctx.key(name),
            data,
            sha256,
            options: UploadOptions {
                content_type: Some(CONTENT_TYPE.to_string()),
                metadata,
            },
        }
    }

    /// Write this object with the fixture identity
    pub async fn seed(self, ctx: &CaseContext) -> Result<Self> {
        ctx.fixture
            .upload_file(ctx.bucket_name(), &self.key, self.data.clone(), &self.options)
            .await?;

        Ok(self)
    }

    /// The downloaded object has exactly this object's data, content type, and metadata
    pub fn verify_download(&self, downloaded: &DownloadedObject) -> Result<()> {
        check(
            downloaded.data.len() == self.data.len(),
            || {
                format!(
                    "downloaded {} bytes from '{}' but {} were written",
                    downloaded.data.len(),
                    self.key,
                    self.data.len()
                )
            },
        )?;

        let actual = sha256_hex(&downloaded.data);
        check(actual == self.sha256, || {
            format!(
                "downloaded data of '{}' has SHA-256 {actual} but {} was written",
                self.key, self.sha256
            )
        })?;

        self.verify_attributes(
            downloaded.content_type.as_deref(),
            &downloaded.metadata,
        )
    }

    /// The object info matches this object's size, content type, and metadata
    pub fn verify_info(&self, info: &ObjectInfo) -> Result<()> {
        check(info.size == self.data.len() as u64, || {
            format!(
                "'{}' is reported as {} bytes but {} were written",
                self.key,
                info.size,
                self.data.len()
            )
        })?;

        self.verify_attributes(info.content_type.as_deref(), &info.metadata)
    }

    fn verify_attributes(
        &self,
        content_type: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        check(content_type == self.options.content_type.as_deref(), || {
            format!(
                "'{}' has content type {content_type:?} but {:?} was written",
                self.key, self.options.content_type
            )
        })?;

        for (key, expected) in &self.options.metadata {
            let actual = metadata.get(key);

            check(actual == Some(expected), || {
                format!(
                    "'{}' has metadata {key}={actual:?} but {expected} was written",
                    self.key
                )
            })?;
        }

        Ok(())
    }
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Fail the case with a message unless `condition` holds
pub(crate) fn check(condition: bool, message: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        crate::error::CheckFailedSnafu { message: message() }.fail()
    }
}

/// Verify with the fixture identity that `key` exists and is `size` bytes
pub(crate) async fn expect_present(ctx: &CaseContext, key: &str, size: u64) -> Result<ObjectInfo> {
    let info = ctx
        .fixture
        .get_object_info(ctx.bucket_name(), key)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                crate::error::CheckFailedSnafu {
                    message: format!("'{key}' should exist but it was not found"),
                }
                .build()
            } else {
                e
            }
        })?;

    check(info.size == size, || {
        format!(
            "'{key}' should be {size} bytes but it is {} bytes",
            info.size
        )
    })?;

    Ok(info)
}

/// Verify with the fixture identity that `key` does not exist
pub(crate) async fn expect_absent(ctx: &CaseContext, key: &str) -> Result<()> {
    match ctx.fixture.get_object_info(ctx.bucket_name(), key).await {
        Ok(info) => crate::error::CheckFailedSnafu {
            message: format!(
                "'{key}' should not exist but it is there with {} bytes",
                info.size
            ),
        }
        .fail(),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}
