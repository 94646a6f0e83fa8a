//! Multipart uploads.
//!
//! The object is split into chunks up front, and the chunks are uploaded in parallel up to the
//! configured maximum concurrency.  If anything fails, the upload is aborted on the server side so
//! that no orphaned parts are left behind.  Uploads that never got the chance to abort themselves
//! are found and aborted by [`Storage::abort_incomplete_uploads`].
use super::{Storage, UploadOptions, UploadReceipt};
use crate::Result;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use futures::StreamExt;
use snafu::prelude::*;
use std::ops::Range;
use tracing::{debug, error, instrument, warn, Instrument};

/// S3 rejects parts smaller than this, except for the last part of an upload
pub(crate) const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3 rejects uploads with more parts than this
pub(crate) const MAX_PARTS: usize = 10_000;

/// Work out the chunk size for an object of `object_size` bytes.
///
/// The configured size is raised to the S3 minimum part size, and raised further if the object is so
/// large the configured size would produce more than the maximum number of parts.
pub(crate) fn chunk_size(object_size: usize, configured_chunk_size: usize) -> usize {
    let chunk_size = configured_chunk_size.max(MIN_PART_SIZE);

    if (object_size + chunk_size - 1) / chunk_size <= MAX_PARTS {
        chunk_size
    } else {
        let new_chunk_size = (object_size + MAX_PARTS - 1) / MAX_PARTS;

        warn!(
            object_size,
            chunk_size,
            new_chunk_size,
            "Object is so large that the requested chunk size will be overridden to keep the total part count under 10K"
        );

        new_chunk_size
    }
}

/// The byte range of every part.  An empty object still needs one (empty) part.
pub(crate) fn part_ranges(object_size: usize, chunk_size: usize) -> Vec<Range<usize>> {
    if object_size == 0 {
        return vec![0..0];
    }

    (0..object_size)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(object_size))
        .collect()
}

impl Storage {
    /// Upload an object with the S3 multipart upload APIs, regardless of its size
    #[instrument(skip(self, data, options), fields(identity = %self.inner.identity, size = data.len()))]
    pub async fn upload_large_file(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &UploadOptions,
    ) -> Result<UploadReceipt> {
        let config = &self.inner.config;
        let chunk_size = chunk_size(
            data.len(),
            config.multipart_chunk_size.get_bytes() as usize,
        );

        let response = self
            .inner
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_content_type(options.content_type.clone())
            .set_metadata((!options.metadata.is_empty()).then(|| options.metadata.clone()))
            .send()
            .await
            .with_context(|_| crate::error::CreateMultipartUploadSnafu { bucket, key })?;

        let upload_id = response
            .upload_id()
            .context(crate::error::MissingUploadIdSnafu { bucket, key })?
            .to_string();

        let result = self
            .upload_parts(bucket, key, &upload_id, data, chunk_size)
            .await;

        if let Err(e) = &result {
            // Before reporting this error, clean up the remains of the multi-part upload
            error!(%e, %upload_id,
                "Multi-part upload failed; aborting multi-part upload on server side");

            if let Err(e) = self
                .inner
                .client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                error!(?e, %upload_id,
                    "Error aborting multi-part upload.  This will remain on the server forever unless there's a lifecycle policy configured");
            }
        }

        result
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        data: Bytes,
        chunk_size: usize,
    ) -> Result<UploadReceipt> {
        let total_bytes = data.len() as u64;
        let ranges = part_ranges(data.len(), chunk_size);

        let part_futs = ranges.into_iter().enumerate().map(|(index, range)| {
            // S3 numbers parts from 1
            let part_number = index + 1;
            let chunk = data.slice(range);
            let chunk_size = chunk.len();

            let span = tracing::debug_span!("upload part", part_number, chunk_size);

            async move {
                debug!("Uploading multi-part chunk");

                let response = self
                    .inner
                    .client
                    .upload_part()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number as i32)
                    .body(ByteStream::from(chunk))
                    .send()
                    .await
                    .with_context(|_| crate::error::UploadPartSnafu {
                        bucket,
                        key,
                        part_number,
                    })?;

                debug!(e_tag = ?response.e_tag(), "Uploaded multi-part chunk");

                // Once all of the uploads are done we must provide the information about each part
                // to the CompleteMultipartUpload call, so retain the key bits here
                Ok(CompletedPart::builder()
                    .set_e_tag(response.e_tag().map(str::to_string))
                    .part_number(part_number as i32)
                    .build())
            }
            .instrument(span)
        });

        // Poll these chunk uploading futures up to a maximum concurrency level to honor the
        // configured max parallel requests
        let mut uploaded_parts = futures::stream::iter(part_futs)
            .buffer_unordered(self.inner.config.max_concurrent_requests.max(1));

        let mut completed_parts = Vec::new();

        while let Some(result) = uploaded_parts.next().await {
            let completed_part: CompletedPart = result?;
            completed_parts.push(completed_part);
        }

        let parts = completed_parts.len();

        debug!(
            parts,
            total_bytes, "All parts uploaded; completing multi-part upload"
        );

        // S3 requires the parts to be listed in order of part number
        completed_parts.sort_unstable_by_key(|part| part.part_number());

        let response = self
            .inner
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .with_context(|_| crate::error::CompleteMultipartUploadSnafu { bucket, key })?;

        Ok(UploadReceipt {
            key: key.to_string(),
            e_tag: response.e_tag().map(str::to_string),
            size: total_bytes,
            parts,
        })
    }

    /// Abort every multi-part upload still in progress under `prefix`, returning how many there
    /// were.
    ///
    /// An upload that was dropped before it could abort itself, such as by a case timeout, doesn't
    /// appear in object listings but keeps its parts on the server until it is aborted.
    #[instrument(skip(self), fields(identity = %self.inner.identity))]
    pub async fn abort_incomplete_uploads(&self, bucket: &str, prefix: &str) -> Result<usize> {
        let mut aborted = 0;
        let mut key_marker = None;
        let mut upload_id_marker = None;

        loop {
            let page = self
                .inner
                .client
                .list_multipart_uploads()
                .bucket(bucket)
                .prefix(prefix)
                .set_key_marker(key_marker.take())
                .set_upload_id_marker(upload_id_marker.take())
                .send()
                .await
                .with_context(|_| crate::error::ListMultipartUploadsSnafu { bucket, prefix })?;

            for upload in page.uploads() {
                let (Some(key), Some(upload_id)) = (upload.key(), upload.upload_id()) else {
                    continue;
                };

                warn!(%key, %upload_id, "Aborting incomplete multi-part upload");

                self.inner
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .send()
                    .await
                    .with_context(|_| crate::error::AbortMultipartUploadSnafu { bucket, key })?;

                aborted += 1;
            }

            key_marker = page.next_key_marker().map(str::to_string);
            upload_id_marker = page.next_upload_id_marker().map(str::to_string);

            if page.is_truncated() != Some(true) || key_marker.is_none() {
                break;
            }
        }

        Ok(aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: usize = 1024 * 1024;

    #[test]
    fn chunk_size_is_raised_to_the_s3_minimum() {
        assert_eq!(MIN_PART_SIZE, chunk_size(100 * MIB, MIB));
        assert_eq!(8 * MIB, chunk_size(100 * MIB, 8 * MIB));
    }

    #[test]
    fn chunk_size_keeps_part_count_under_the_limit() {
        let object_size = 100_000 * MIB;
        let chunk = chunk_size(object_size, 8 * MIB);

        assert!(chunk > 8 * MIB);
        assert!(part_ranges(object_size, chunk).len() <= MAX_PARTS);
    }

    #[test]
    fn ranges_cover_the_object_exactly() {
        let ranges = part_ranges(12 * MIB, 5 * MIB);

        assert_eq!(
            vec![0..5 * MIB, 5 * MIB..10 * MIB, 10 * MIB..12 * MIB],
            ranges
        );

        // Exact multiples don't produce a trailing empty part
        assert_eq!(2, part_ranges(10 * MIB, 5 * MIB).len());
    }

    #[test]
    fn empty_object_has_one_empty_part() {
        assert_eq!(vec![0..0], part_ranges(0, 5 * MIB));
    }
}
