//! All integration tests are located in this single logical test fixture, because Rust must
//! compile and link each integration test separately which can get slow once the code base passes
//! a certain size.
//!
//! For all practical purposes each submodule here is a separate logical integration test fixture.
//! See mod-level comments in those modules for more details.

/// Test code that reports errors can just cheat and use `eyre`
type Result<T> = color_eyre::Result<T>;

mod harness;
mod progress;
mod storage;

use s3probe_testing::minio;

/// Set up the probe config to use the specified Minio server as the fixture identity
fn config_for_minio(server: &minio::MinioServer) -> s3probe::Config {
    s3probe::Config {
        s3_endpoint: Some(server.endpoint_url()),
        region: Some("us-east-1".to_string()),
        access_key_id: Some(minio::ROOT_USER.to_string()),
        secret_access_key: Some(minio::ROOT_PASSWORD.to_string()),
        force_path_style: true,
        // Keep multipart uploads as small as S3 allows, so the tests stay quick
        multipart_threshold: byte_unit::Byte::from_bytes(5 * 1024 * 1024),
        multipart_chunk_size: byte_unit::Byte::from_bytes(5 * 1024 * 1024),
        large_object_size: byte_unit::Byte::from_bytes(11 * 1024 * 1024),
        case_timeout_secs: 60,
        ..Default::default()
    }
}
