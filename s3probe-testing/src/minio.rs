//! Wrapper around the `minio` server binary to run ephemeral instances of S3-compatible object
//! storage for testing, and around the `mc` client to manage the users whose permissions are
//! probed.

use crate::Result;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use color_eyre::eyre::eyre;
use duct::Handle;
use once_cell::sync::Lazy;
use rand::prelude::*;
use regex::Regex;
use std::{
    net::{SocketAddr, TcpListener},
    path::PathBuf,
    sync::{Arc, Weak},
    time::Duration,
};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::debug;
use which::which;

/// Credentials of the root user minio starts with when none are configured
pub const ROOT_USER: &str = "minioadmin";
pub const ROOT_PASSWORD: &str = "minioadmin";

/// The alias `mc` commands use to refer to the server
const MC_ALIAS: &str = "probe";

/// A user created on the server with a policy attached
#[derive(Clone, Debug)]
pub struct ScopedUser {
    pub access_key_id: String,
    pub secret_access_key: String,
}

pub struct MinioServer {
    #[allow(dead_code)] // Never used, but needs to stay in scope so the temp dir isn't deleted
    temp_dir: TempDir,
    handle: Handle,
    endpoint: SocketAddr,

    /// Config directory for `mc`, created with the alias for this server the first time a user is
    /// created
    mc_config: Mutex<Option<TempDir>>,
}

impl MinioServer {
    /// Try to re-use an existing instance that other tests might also be using, but if there isn't
    /// one then start a new one.
    ///
    /// Starting minio takes a while, so sharing one server amortizes that over many tests.
    pub async fn get() -> Result<Arc<Self>> {
        // A tokio mutex because the lock is held across await points
        static INSTANCE: Lazy<Mutex<Option<Weak<MinioServer>>>> = Lazy::new(|| Mutex::new(None));

        let mut instance = INSTANCE.lock().await;

        let server = match instance.as_ref().and_then(Weak::upgrade) {
            Some(strong) => strong,
            None => {
                // Either the first call, or every test that used the previous server has finished
                // and it was dropped
                let strong = Arc::new(Self::start().await?);
                *instance = Some(Arc::downgrade(&strong));

                strong
            }
        };

        debug!(endpoint = %server.endpoint, "get() found minio server");

        // Make sure the server is still working
        server.wait_for_service_start().await?;

        Ok(server)
    }

    /// Start a new minio server on a random high port.
    ///
    /// The `minio` executable is taken from the `MINIO_PATH` env var if set, otherwise it must be
    /// in the `PATH`.
    pub async fn start() -> Result<Self> {
        let path = find_executable("MINIO_PATH", "minio")?;

        let endpoint = Self::random_endpoint()?;

        let temp_dir = Self::temp_data_dir()?;

        let handle = duct::cmd!(
            path,
            "server",
            temp_dir.path(),
            "--address",
            endpoint.to_string(),
            "--quiet"
        )
        .start()?;

        let minio_server = Self {
            temp_dir,
            handle,
            endpoint,
            mc_config: Mutex::new(None),
        };

        debug!(endpoint = %minio_server.endpoint, "Waiting for minio service to start");

        minio_server.wait_for_service_start().await?;

        debug!(endpoint = %minio_server.endpoint, "Minio started");

        Ok(minio_server)
    }

    /// The S3 API endpoint URL where the server is listening
    pub fn endpoint_url(&self) -> url::Url {
        format!("http://{}/", self.endpoint)
            .parse()
            .expect("socket addresses are valid URL hosts")
    }

    /// Get a client authenticated as the root user of this server
    pub async fn aws_client(&self) -> Result<aws_sdk_s3::Client> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(RegionProviderChain::first_try(aws_types::region::Region::new(
                "us-east-1",
            )))
            .credentials_provider(Credentials::from_keys(ROOT_USER, ROOT_PASSWORD, None))
            .load()
            .await;

        let s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config)
            .force_path_style(true)
            .endpoint_url(format!("http://{}", self.endpoint));

        Ok(aws_sdk_s3::Client::from_conf(s3_config_builder.build()))
    }

    /// Make a new bucket on this Minio instance for testing purposes.
    ///
    /// The actual bucket name will have a random prefix, because many tests share the same minio
    /// server and must not conflict with one another.
    pub async fn create_bucket(&self, bucket: impl AsRef<str>) -> Result<String> {
        let bucket = unique_bucket_name(bucket.as_ref());

        debug!(%bucket, "Creating bucket");

        let client = self.aws_client().await?;

        client.create_bucket().bucket(&bucket).send().await?;

        // Operations on a just-created bucket sometimes fail as if it didn't exist yet, so wait
        // until it's really there
        let policy = again::RetryPolicy::exponential(Duration::from_millis(100))
            .with_max_retries(10)
            .with_max_delay(Duration::from_secs(1));

        if let Err(e) = policy
            .retry(|| client.head_bucket().bucket(&bucket).send())
            .await
        {
            return Err(
                eyre!("The bucket {bucket} is not accessible even after it was explicitly created.  Last error was: \n{e}")
            );
        };

        debug!(%bucket, "Bucket created");

        Ok(bucket)
    }

    /// Create a user with a random access key, and attach `policy` to it.
    ///
    /// This shells out to the minio client `mc`, taken from the `MC_PATH` env var if set, otherwise
    /// from the `PATH`.
    pub async fn create_user(&self, policy: &serde_json::Value) -> Result<ScopedUser> {
        let mc = find_executable("MC_PATH", "mc")?;
        let mut mc_config = self.mc_config.lock().await;

        if mc_config.is_none() {
            let dir = tempfile::tempdir()?;

            duct::cmd!(
                &mc,
                "--config-dir",
                dir.path(),
                "alias",
                "set",
                MC_ALIAS,
                format!("http://{}", self.endpoint),
                ROOT_USER,
                ROOT_PASSWORD
            )
            .stdout_null()
            .run()?;

            *mc_config = Some(dir);
        }

        let config_dir = mc_config
            .as_ref()
            .ok_or_else(|| eyre!("BUG: mc config dir missing after it was created"))?
            .path()
            .to_owned();

        let id = rand::thread_rng().next_u32();
        let user = ScopedUser {
            access_key_id: format!("probe{id:08x}"),
            secret_access_key: format!("secret-{:016x}", rand::thread_rng().next_u64()),
        };
        let policy_name = format!("probe-policy-{id:08x}");

        let policy_file = tempfile::NamedTempFile::new()?;
        tokio::fs::write(policy_file.path(), serde_json::to_vec_pretty(policy)?).await?;

        let mc_cmd = |args: Vec<String>| {
            let mut full_args = vec![
                "--config-dir".to_string(),
                config_dir.to_string_lossy().into_owned(),
            ];
            full_args.extend(args);

            debug!(?full_args, "Running mc");

            duct::cmd(&mc, full_args).stdout_null().run()
        };

        mc_cmd(vec![
            "admin".into(),
            "user".into(),
            "add".into(),
            MC_ALIAS.into(),
            user.access_key_id.clone(),
            user.secret_access_key.clone(),
        ])?;

        mc_cmd(vec![
            "admin".into(),
            "policy".into(),
            "create".into(),
            MC_ALIAS.into(),
            policy_name.clone(),
            policy_file.path().to_string_lossy().into_owned(),
        ])?;

        mc_cmd(vec![
            "admin".into(),
            "policy".into(),
            "attach".into(),
            MC_ALIAS.into(),
            policy_name,
            "--user".into(),
            user.access_key_id.clone(),
        ])?;

        debug!(access_key_id = %user.access_key_id, "Created scoped user");

        Ok(user)
    }

    /// Block until able to successfully connect to the minio server or a timeout occurs
    async fn wait_for_service_start(&self) -> Result<()> {
        // There's a startup period after the process starts, and on slow CI boxes it can be long
        let policy = again::RetryPolicy::exponential(Duration::from_millis(100))
            .with_max_retries(10)
            .with_max_delay(Duration::from_secs(1));

        let client = self.aws_client().await?;

        if let Err(e) = policy.retry(|| client.list_buckets().send()).await {
            Err(
                eyre!("The minio server didn't come online in the allowed time.  The last error reported by ListBuckets against the server was:\n{}",
                    e)
            )
        } else {
            Ok(())
        }
    }

    /// Find a socket address on localhost that is free for minio to listen on
    fn random_endpoint() -> Result<SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);

        Ok(addr)
    }

    /// Get a temporary directory for Minio data.
    ///
    /// Minio refuses data directories on `tmpfs` filesystems like `/tmp` on most Linux distros,
    /// because it needs `O_DIRECT`, so the directory goes in the home directory instead.
    fn temp_data_dir() -> Result<TempDir> {
        let home = dirs::home_dir().ok_or_else(|| eyre!("Unable to determine home directory"))?;

        Ok(tempfile::tempdir_in(home)?)
    }
}

impl Drop for MinioServer {
    fn drop(&mut self) {
        debug!(pids = ?self.handle.pids(), "Killing minio process(es)");

        if let Err(e) = self.handle.kill() {
            eprintln!("Error killing minio process: {}", e);
        }
    }
}

/// Turn `name` into a valid bucket name that is unique across tests
fn unique_bucket_name(name: &str) -> String {
    // Bucket names are lowercase letters, digits, `.` and `-`, at most 63 characters
    static REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9a-z\-]+").unwrap());

    let name = name.to_lowercase();
    let name = REGEX.replace_all(&name, "-");

    // Leave room for the 9 character unique prefix
    let name = name[..name.len().min(63 - 9)].trim_end_matches('-');

    format!("{:08x}-{name}", rand::thread_rng().next_u32())
}

fn find_executable(env_var: &str, name: &str) -> Result<PathBuf> {
    std::env::var_os(env_var)
        .map(PathBuf::from)
        .or_else(|| which(name).ok())
        .ok_or_else(|| {
            eyre!("Unable to find `{name}`, either set the {env_var} env var or place the executable in your PATH")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names_are_valid_and_unique() {
        let name = unique_bucket_name("Storage::Upload_Large_File/denied");

        assert!(name.len() <= 63, "{name}");
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        assert!(name.ends_with("-storage-upload-large-file-denied"), "{name}");

        assert_ne!(name, unique_bucket_name("Storage::Upload_Large_File/denied"));
    }
}
