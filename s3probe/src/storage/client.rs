use crate::buckets::BucketCredentials;
use crate::Config;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_types::region::Region;

/// Who a client authenticates as
#[derive(Clone, Copy)]
pub(crate) enum Identity<'a> {
    /// The privileged identity from the config, or the default credentials chain if the config
    /// doesn't name one.  Used for setup and cleanup.
    Fixture,

    /// The identity whose grants on a bucket are under test
    Scoped(&'a BucketCredentials),

    /// No credentials at all; requests are sent unsigned
    Anonymous,
}

impl std::fmt::Display for Identity<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixture => write!(f, "fixture"),
            Self::Scoped(credentials) => write!(f, "scoped:{}", credentials.access_key_id),
            Self::Anonymous => write!(f, "anonymous"),
        }
    }
}

/// Create a new AWS SDK S3 client for `identity`, using either an explicit region or the default
/// configuration deduced from the environment
pub(super) async fn make_s3_client(
    config: &Config,
    identity: Identity<'_>,
    region: Option<&str>,
) -> aws_sdk_s3::Client {
    let region_provider = match region.or(config.region.as_deref()) {
        Some(region) => RegionProviderChain::first_try(Region::new(region.to_string())),
        None => {
            // No explicit region; use the environment
            RegionProviderChain::default_provider().or_else("us-east-1")
        }
    };

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);

    loader = match identity {
        Identity::Fixture => match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => {
                loader.credentials_provider(Credentials::new(
                    access_key_id,
                    secret_access_key,
                    None,
                    None,
                    "s3probe-config",
                ))
            }
            _ => loader,
        },
        Identity::Scoped(credentials) => loader.credentials_provider(Credentials::new(
            &credentials.access_key_id,
            &credentials.secret_access_key,
            None,
            None,
            "s3probe-bucket-config",
        )),
        Identity::Anonymous => loader.no_credentials(),
    };

    let aws_config = loader.load().await;

    let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(config.force_path_style);

    if let Some(s3_endpoint) = &config.s3_endpoint {
        s3_config_builder =
            s3_config_builder.endpoint_url(s3_endpoint.as_str().trim_end_matches('/'));
    }

    aws_sdk_s3::Client::from_conf(s3_config_builder.build())
}
