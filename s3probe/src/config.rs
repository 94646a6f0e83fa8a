use url::Url;

/// The configuration settings that control how the probe talks to object storage and how each test
/// case is run.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
pub struct Config {
    /// Use a custom S3 endpoint instead of AWS.
    ///
    /// Use this to probe a non-Amazon S3-compatible service.
    #[cfg_attr(
        feature = "clap",
        clap(long, global = true, value_name = "URL", env = "S3PROBE_ENDPOINT")
    )]
    pub s3_endpoint: Option<Url>,

    /// The region to use for requests and for buckets created by the probe.
    ///
    /// If not set, the region is taken from the environment, and failing that `us-east-1` is used.
    #[cfg_attr(
        feature = "clap",
        clap(long, global = true, value_name = "REGION", env = "S3PROBE_REGION")
    )]
    pub region: Option<String>,

    /// Access key ID of the privileged identity used for test setup and cleanup.
    ///
    /// If not set, the default AWS credentials chain is used.
    #[cfg_attr(
        feature = "clap",
        clap(long, global = true, env = "S3PROBE_ACCESS_KEY_ID", requires = "secret_access_key")
    )]
    pub access_key_id: Option<String>,

    /// Secret access key of the privileged identity used for test setup and cleanup.
    #[cfg_attr(
        feature = "clap",
        clap(
            long,
            global = true,
            env = "S3PROBE_SECRET_ACCESS_KEY",
            hide_env_values = true,
            requires = "access_key_id"
        )
    )]
    pub secret_access_key: Option<String>,

    /// Address buckets as a path component of the endpoint URL instead of as a subdomain.
    ///
    /// Most self-hosted S3-compatible services need this.
    #[cfg_attr(feature = "clap", clap(long, global = true))]
    pub force_path_style: bool,

    /// The size threshold at or above which uploads switch to the multipart API.
    ///
    /// Can be specified as an integer, ie "1000000", or with a suffix ie "10MB"
    #[cfg_attr(feature = "clap", clap(long, default_value = "8MiB", global = true))]
    pub multipart_threshold: byte_unit::Byte,

    /// The chunk size used for the parts of multipart uploads.
    ///
    /// Note that the maximum number of parts in an upload is 10,000, so for very large objects
    /// this chunk size may be overridden if it's smaller than 1/10,000th of the size of the
    /// object.
    #[cfg_attr(feature = "clap", clap(long, default_value = "8MiB", global = true))]
    pub multipart_chunk_size: byte_unit::Byte,

    /// The maximum number of parts of a multipart upload that are uploaded concurrently.
    #[cfg_attr(feature = "clap", clap(long, default_value = "10", global = true))]
    pub max_concurrent_requests: usize,

    /// The size of the object used to probe multipart uploads.
    #[cfg_attr(feature = "clap", clap(long, default_value = "12MiB", global = true))]
    pub large_object_size: byte_unit::Byte,

    /// Fail a test case if it hasn't finished after this many seconds.
    #[cfg_attr(feature = "clap", clap(long, default_value = "120", global = true))]
    pub case_timeout_secs: u64,

    /// Leave the objects created by each test case in place instead of deleting them.
    #[cfg_attr(feature = "clap", clap(long, global = true))]
    pub skip_cleanup: bool,
}

impl Config {
    pub fn case_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.case_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        // XXX: This is duplicated here and in the `clap` attributes, unfortunately I can't find a
        // better way unless we unconditionally take a clap dependency in the lib crate
        Self {
            s3_endpoint: None,
            region: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
            multipart_threshold: byte_unit::Byte::from_bytes(8 * 1024 * 1024),
            multipart_chunk_size: byte_unit::Byte::from_bytes(8 * 1024 * 1024),
            max_concurrent_requests: 10,
            large_object_size: byte_unit::Byte::from_bytes(12 * 1024 * 1024),
            case_timeout_secs: 120,
            skip_cleanup: false,
        }
    }
}
