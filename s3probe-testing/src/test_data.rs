//! Create and inspect test data in S3-compatible object storage.
//!
//! Everything here talks to the service with a plain AWS SDK client, independently of the code
//! under test.
use crate::Result;
use aws_sdk_s3::{primitives::ByteStream, Client};
use bytes::Bytes;
use futures::StreamExt;
use rand::prelude::*;
use sha2::Digest;
use std::collections::HashMap;

/// Max concurrent S3 operations when dealing with test data
const MAX_CONCURRENCY: usize = 10;

#[derive(Clone, Debug)]
pub struct TestObject {
    pub key: String,
    pub size: usize,
}

impl TestObject {
    /// Make a new test object spec with the size specified as a string so we can use
    /// human-friendly units like "10 KB" or "20 MiB"
    pub fn new(key: impl Into<String>, size: impl AsRef<str>) -> Self {
        let key = key.into();

        let size = byte_unit::Byte::from_str(size).unwrap();

        Self {
            key,
            size: size.get_bytes() as usize,
        }
    }
}

/// The same test object spec as in [`TestObject`], but with the data that is written to the object
/// as well
#[derive(Clone, Debug)]
pub struct TestObjectWithData {
    pub key: String,
    pub data: Bytes,
    pub hash: [u8; 32],
}

/// Random data of `size` bytes
pub fn random_data(size: usize) -> Bytes {
    let mut data = vec![0u8; size];
    rand::thread_rng().fill(&mut data[..]);

    Bytes::from(data)
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&sha2::Sha256::digest(data));

    hash
}

/// Generate a unique prefix ending in a `/` character, and prepend it to the `key` in a collection
/// of [`TestObject`]s.
///
/// Returns the unique prefix and an iterator that yields the modified test objects.
pub fn prepend_unique_prefix(
    objects: impl IntoIterator<Item = TestObject>,
) -> (String, impl IntoIterator<Item = TestObject>) {
    let prefix = format!("{:08x}/", rand::thread_rng().next_u32());

    let objects = {
        let prefix = prefix.clone();

        objects.into_iter().map(move |mut object| {
            object.key = format!("{}{}", prefix, object.key);

            object
        })
    };

    (prefix, objects)
}

/// Generate one or more test objects in a bucket, with random data of the specified sizes.
///
/// The key to the returned hash table is the object key.
pub async fn make_test_data(
    client: &Client,
    bucket: &str,
    objects: impl IntoIterator<Item = TestObject>,
) -> Result<HashMap<String, TestObjectWithData>> {
    let create_futs = objects.into_iter().map(|test_object| async move {
        let data = random_data(test_object.size);

        client
            .put_object()
            .bucket(bucket)
            .key(&test_object.key)
            .body(ByteStream::from(data.clone()))
            .send()
            .await?;

        Result::<_>::Ok(TestObjectWithData {
            hash: sha256(&data),
            key: test_object.key,
            data,
        })
    });

    // Run these futures in parallel as part of a stream
    let mut test_data_stream = futures::stream::iter(create_futs).buffer_unordered(MAX_CONCURRENCY);

    let mut test_objects = HashMap::new();

    while let Some(result) = test_data_stream.next().await {
        let object = result?;
        let key = object.key.clone();

        assert!(
            test_objects.insert(key.clone(), object).is_none(),
            "BUG: test data contains the same key '{}' more than once",
            key
        );
    }

    Ok(test_objects)
}

/// List every key under `prefix`, sorted
pub async fn list_keys(client: &Client, bucket: &str, prefix: &str) -> Result<Vec<String>> {
    let mut pages = client
        .list_objects_v2()
        .bucket(bucket)
        .prefix(prefix)
        .into_paginator()
        .send();

    let mut keys = Vec::new();

    while let Some(page) = pages.next().await {
        keys.extend(
            page?
                .contents()
                .iter()
                .filter_map(|object| object.key().map(str::to_string)),
        );
    }

    keys.sort();

    Ok(keys)
}

/// Download an object and compute the SHA-256 hash of its contents
pub async fn object_hash(client: &Client, bucket: &str, key: &str) -> Result<[u8; 32]> {
    let response = client.get_object().bucket(bucket).key(key).send().await?;

    let data = response.body.collect().await?.into_bytes();

    Ok(sha256(&data))
}

/// Whether an object exists, according to `HeadObject`
pub async fn object_exists(client: &Client, bucket: &str, key: &str) -> Result<bool> {
    match client.head_object().bucket(bucket).key(key).send().await {
        Ok(_) => Ok(true),
        Err(e) if e.raw_response().map(|r| r.status().as_u16()) == Some(404) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Validate that the objects under `prefix` in the bucket are exactly the expected test objects,
/// with exactly the expected contents.
pub async fn validate_test_data_in_s3(
    client: &Client,
    test_data: &HashMap<String, TestObjectWithData>,
    bucket: &str,
    prefix: &str,
) -> Result<()> {
    let keys = list_keys(client, bucket, prefix).await?;

    let mut expected_keys = test_data.keys().cloned().collect::<Vec<_>>();
    expected_keys.sort();

    assert_eq!(
        expected_keys, keys,
        "Objects under '{prefix}' don't match the expected test data"
    );

    for (key, object) in test_data {
        let hash = object_hash(client, bucket, key).await?;

        assert_eq!(
            hash, object.hash,
            "S3 object '{key}' hash doesn't match expected value"
        );
    }

    Ok(())
}
