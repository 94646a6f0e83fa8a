use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::{
    abort_multipart_upload::AbortMultipartUploadError,
    complete_multipart_upload::CompleteMultipartUploadError, create_bucket::CreateBucketError,
    create_multipart_upload::CreateMultipartUploadError, delete_bucket::DeleteBucketError,
    delete_object::DeleteObjectError, delete_objects::DeleteObjectsError,
    get_object::GetObjectError, head_bucket::HeadBucketError, head_object::HeadObjectError,
    list_buckets::ListBucketsError, list_multipart_uploads::ListMultipartUploadsError,
    list_objects_v2::ListObjectsV2Error,
    put_bucket_policy::PutBucketPolicyError, put_object::PutObjectError,
    upload_part::UploadPartError,
};
use snafu::prelude::*;
use std::path::PathBuf;

pub type Result<T, E = S3ProbeError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum S3ProbeError {
    #[snafu(display("Error creating S3 bucket '{bucket}'"))]
    CreateBucket {
        bucket: String,
        source: SdkError<CreateBucketError>,
    },

    #[snafu(display("Error deleting S3 bucket '{bucket}'"))]
    DeleteBucket {
        bucket: String,
        source: SdkError<DeleteBucketError>,
    },

    #[snafu(display(
        "The S3 bucket '{bucket}' either doesn't exist, or the identity in use is not granted access"
    ))]
    BucketInvalidOrNotAccessible {
        bucket: String,
        source: SdkError<HeadBucketError>,
    },

    #[snafu(display("Error listing S3 buckets"))]
    ListBuckets { source: SdkError<ListBucketsError> },

    #[snafu(display("Error setting the bucket policy on S3 bucket '{bucket}'"))]
    PutBucketPolicy {
        bucket: String,
        source: SdkError<PutBucketPolicyError>,
    },

    #[snafu(display("Error uploading object '{key}' to S3 bucket '{bucket}'"))]
    PutObject {
        bucket: String,
        key: String,
        source: SdkError<PutObjectError>,
    },

    #[snafu(display("Error starting multi-part upload of object '{key}' in S3 bucket '{bucket}'"))]
    CreateMultipartUpload {
        bucket: String,
        key: String,
        source: SdkError<CreateMultipartUploadError>,
    },

    #[snafu(display(
        "Error uploading part {part_number} of object '{key}' in S3 bucket '{bucket}'"
    ))]
    UploadPart {
        bucket: String,
        key: String,
        part_number: usize,
        source: SdkError<UploadPartError>,
    },

    #[snafu(display(
        "Error completing multi-part upload of object '{key}' in S3 bucket '{bucket}'"
    ))]
    CompleteMultipartUpload {
        bucket: String,
        key: String,
        source: SdkError<CompleteMultipartUploadError>,
    },

    #[snafu(display("Error aborting multi-part upload of object '{key}' in S3 bucket '{bucket}'"))]
    AbortMultipartUpload {
        bucket: String,
        key: String,
        source: SdkError<AbortMultipartUploadError>,
    },

    #[snafu(display("Error listing multi-part uploads under '{prefix}' in S3 bucket '{bucket}'"))]
    ListMultipartUploads {
        bucket: String,
        prefix: String,
        source: SdkError<ListMultipartUploadsError>,
    },

    #[snafu(display("The service did not return an upload ID for object '{key}' in bucket '{bucket}'"))]
    MissingUploadId { bucket: String, key: String },

    #[snafu(display("Error downloading object '{key}' from S3 bucket '{bucket}'"))]
    GetObject {
        bucket: String,
        key: String,
        source: SdkError<GetObjectError>,
    },

    #[snafu(display("Error reading the body of object '{key}' in S3 bucket '{bucket}'"))]
    ReadByteStream {
        bucket: String,
        key: String,
        source: aws_smithy_types::byte_stream::error::Error,
    },

    #[snafu(display("Error getting metadata about object '{key}' on S3 bucket '{bucket}'"))]
    HeadObject {
        bucket: String,
        key: String,
        source: SdkError<HeadObjectError>,
    },

    #[snafu(display("Error deleting object '{key}' from S3 bucket '{bucket}'"))]
    DeleteObject {
        bucket: String,
        key: String,
        source: SdkError<DeleteObjectError>,
    },

    #[snafu(display("Error deleting {count} objects from S3 bucket '{bucket}'"))]
    DeleteObjects {
        bucket: String,
        count: usize,
        source: SdkError<DeleteObjectsError>,
    },

    #[snafu(display("Error building the request to delete objects from S3 bucket '{bucket}'"))]
    BuildDeleteRequest {
        bucket: String,
        source: aws_sdk_s3::error::BuildError,
    },

    #[snafu(display("'{path}' is not a usable folder path; folders need a non-empty name"))]
    InvalidFolderPath { path: String },

    #[snafu(display("Error listing objects in S3 bucket '{bucket}' with prefix '{prefix}'"))]
    ListObjects {
        bucket: String,
        prefix: String,
        source: SdkError<ListObjectsV2Error>,
    },

    #[snafu(display("Error reading bucket configuration file '{}'", path.display()))]
    ReadBucketFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Error parsing bucket configuration file '{}'", path.display()))]
    ParseBucketFile {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Error serializing {what} as JSON"))]
    SerializeJson {
        what: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("Error writing report to '{}'", path.display()))]
    WriteReport {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Invalid bucket configuration for '{bucket}': {reason}"))]
    InvalidBucketConfig { bucket: String, reason: String },

    #[snafu(display("The permission label '{label}' is invalid; expected four characters like 'rwld' or 'r-l-'"))]
    InvalidPermissionLabel { label: String },

    #[snafu(display("A test case with the ID '{id}' is already registered"))]
    DuplicateTestCase { id: String },

    #[snafu(display("{message}"))]
    CheckFailed { message: String },

    #[snafu(display("Cleanup of prefix '{prefix}' in bucket '{bucket}' left {remaining} objects behind"))]
    CleanupIncomplete {
        bucket: String,
        prefix: String,
        remaining: usize,
    },
}

/// The details the service reported along with a failed request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceFailure {
    /// HTTP status code of the response, if a response was received at all
    pub status: Option<u16>,

    /// The S3 error code, like `AccessDenied` or `NoSuchKey`.
    ///
    /// Responses to `HEAD` requests have no body so they never carry a code.
    pub code: Option<String>,

    pub message: Option<String>,
}

impl ServiceFailure {
    fn from_sdk_error<E>(err: &SdkError<E>) -> Self
    where
        E: ProvideErrorMetadata,
    {
        Self {
            status: err.raw_response().map(|response| response.status().as_u16()),
            code: err.code().map(str::to_string),
            message: err.message().map(str::to_string),
        }
    }
}

impl std::fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {status}")?,
            None => write!(f, "no HTTP response")?,
        }

        if let Some(code) = &self.code {
            write!(f, " {code}")?;
        }

        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }

        Ok(())
    }
}

impl S3ProbeError {
    /// If this error came from a request that was sent to the service, extract the status code and
    /// error code the service answered with.
    ///
    /// Returns `None` for errors that never involved the service, like a malformed bucket file.
    pub fn service_failure(&self) -> Option<ServiceFailure> {
        match self {
            Self::CreateBucket { source, .. } => Some(ServiceFailure::from_sdk_error(source)),
            Self::DeleteBucket { source, .. } => Some(ServiceFailure::from_sdk_error(source)),
            Self::BucketInvalidOrNotAccessible { source, .. } => {
                Some(ServiceFailure::from_sdk_error(source))
            }
            Self::ListBuckets { source } => Some(ServiceFailure::from_sdk_error(source)),
            Self::PutBucketPolicy { source, .. } => Some(ServiceFailure::from_sdk_error(source)),
            Self::PutObject { source, .. } => Some(ServiceFailure::from_sdk_error(source)),
            Self::CreateMultipartUpload { source, .. } => {
                Some(ServiceFailure::from_sdk_error(source))
            }
            Self::UploadPart { source, .. } => Some(ServiceFailure::from_sdk_error(source)),
            Self::CompleteMultipartUpload { source, .. } => {
                Some(ServiceFailure::from_sdk_error(source))
            }
            Self::AbortMultipartUpload { source, .. } => {
                Some(ServiceFailure::from_sdk_error(source))
            }
            Self::ListMultipartUploads { source, .. } => {
                Some(ServiceFailure::from_sdk_error(source))
            }
            Self::GetObject { source, .. } => Some(ServiceFailure::from_sdk_error(source)),
            Self::HeadObject { source, .. } => Some(ServiceFailure::from_sdk_error(source)),
            Self::DeleteObject { source, .. } => Some(ServiceFailure::from_sdk_error(source)),
            Self::DeleteObjects { source, .. } => Some(ServiceFailure::from_sdk_error(source)),
            Self::ListObjects { source, .. } => Some(ServiceFailure::from_sdk_error(source)),
            _ => None,
        }
    }

    /// True if the service answered that the object or bucket doesn't exist
    pub fn is_not_found(&self) -> bool {
        match self.service_failure() {
            Some(failure) => {
                failure.status == Some(404)
                    || matches!(
                        failure.code.as_deref(),
                        Some("NoSuchKey" | "NoSuchBucket" | "NotFound")
                    )
            }
            None => false,
        }
    }
}
