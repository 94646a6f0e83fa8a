use clap::{Parser, Subcommand};
use color_eyre::eyre::WrapErr;
use s3probe::{BucketConfig, BucketFile, Operation, PermissionMatrix, Selection, Suite};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod progress;

/// Version string with build details, for `--version`
const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nbuilt:  ",
    env!("VERGEN_BUILD_TIMESTAMP"),
    "\ntarget: ",
    env!("VERGEN_CARGO_TARGET_TRIPLE"),
    "\ndebug:  ",
    env!("VERGEN_CARGO_DEBUG"),
);

/// Check that an S3-compatible service enforces bucket permissions as configured
#[derive(Parser, Debug)]
#[clap(author, version, long_version = LONG_VERSION, about, long_about = None)]
struct Args {
    /// Operation to perform
    #[clap(subcommand)]
    command: Command,

    #[clap(flatten)]
    globals: Globals,
}

/// Arguments that apply regardless of command
#[derive(Parser, Debug)]
struct Globals {
    /// Enable verbose log output
    #[clap(short = 'v', long, conflicts_with = "quiet", global = true)]
    verbose: bool,

    /// Be quiet, suppress almost all output (except errors and failed test cases)
    #[clap(short = 'q', long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[clap(flatten)]
    config: s3probe::Config,
}

/// Which buckets and cases to work with
#[derive(clap::Args, Debug)]
struct CaseArgs {
    /// JSON file describing the buckets under test.
    ///
    /// Use the `matrix` command to generate a template.
    #[clap(short = 'b', long, value_name = "FILE", env = "S3PROBE_BUCKETS")]
    buckets: PathBuf,

    /// Run only this suite.  Can be given more than once.  By default all suites run.
    #[clap(long = "suite", value_enum, value_name = "SUITE")]
    suites: Vec<Suite>,

    /// Probe only this operation in the permissions suite.  Can be given more than once.  By
    /// default all operations are probed.
    #[clap(long = "operation", value_enum, value_name = "OPERATION")]
    operations: Vec<Operation>,

    /// Name prefix of the bucket created by the lifecycle suite
    #[clap(long, default_value = "s3probe", value_name = "PREFIX")]
    lifecycle_prefix: String,
}

impl CaseArgs {
    async fn load(&self, config: &s3probe::Config) -> color_eyre::Result<s3probe::Registry> {
        let file = BucketFile::load(&self.buckets)
            .await
            .wrap_err_with(|| format!("Unable to load buckets from {}", self.buckets.display()))?;

        let selection = Selection {
            suites: if self.suites.is_empty() {
                Selection::default().suites
            } else {
                self.suites.clone()
            },
            operations: self.operations.clone(),
            lifecycle_bucket_prefix: self.lifecycle_prefix.clone(),
            lifecycle_region: config.region.clone(),
        };

        Ok(s3probe::plan(&file.buckets, &selection)?)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the test cases against the configured buckets and report the results.
    ///
    /// Exits with status 1 if any case failed.
    Run {
        #[clap(flatten)]
        cases: CaseArgs,

        /// Also write the results as JSON to this file
        #[clap(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// List the test cases `run` would execute, without running them
    List {
        #[clap(flatten)]
        cases: CaseArgs,
    },

    /// Generate a bucket file template covering every bucket type and grant combination.
    ///
    /// Fill in the credentials of each bucket before using it with `run`.
    Matrix {
        /// Prefix of the generated bucket names
        #[clap(long, default_value = "s3probe", value_name = "PREFIX")]
        prefix: String,

        /// Write to this file instead of stdout
        #[clap(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Instead of the bucket file, generate the access policy document each bucket's scoped
        /// user needs, keyed by bucket name
        #[clap(long)]
        policies: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Settings from a `.env` file are as good as environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    if let Err(e) = color_eyre::install() {
        eprintln!("Unable to install error handler: {e}");
    }

    init_logging(&args.globals);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> color_eyre::Result<ExitCode> {
    let Args { command, globals } = args;

    match command {
        Command::Run { cases, report } => {
            let registry = cases.load(&globals.config).await?;
            tracing::info!(cases = registry.len(), "Planned test run");

            let runner = s3probe::Runner::new(globals.config.clone());
            let summary = progress::run_with_progress(&globals, &runner, registry).await;

            if let Some(report) = report {
                summary
                    .write_json(&report)
                    .await
                    .wrap_err_with(|| format!("Unable to write report to {}", report.display()))?;
            }

            progress::print_summary(&globals, &summary);

            Ok(if summary.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Command::List { cases } => {
            let registry = cases.load(&globals.config).await?;

            for case in registry.cases() {
                println!("{:<48} {}", case.id, case.description);
            }

            if !globals.quiet {
                println!("\n{} test cases", registry.len());
            }

            Ok(ExitCode::SUCCESS)
        }
        Command::Matrix {
            prefix,
            output,
            policies,
        } => {
            let buckets = matrix_template(&prefix)?;

            let json = if policies {
                serde_json::to_string_pretty(&policy_documents(&buckets))?
            } else {
                BucketFile { buckets }.to_json()?
            };

            match output {
                Some(path) => write_output(&path, json).await?,
                None => println!("{json}"),
            }

            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Bucket configs for the whole matrix, checked the same way `run` will check them once loaded
fn matrix_template(prefix: &str) -> color_eyre::Result<Vec<BucketConfig>> {
    let file = BucketFile {
        buckets: PermissionMatrix::template(prefix),
    };

    file.validate()
        .wrap_err_with(|| format!("The prefix '{prefix}' doesn't make valid bucket names"))?;

    Ok(file.buckets)
}

/// The scoped user policy of every bucket, plus the bucket policy of public buckets
fn policy_documents(buckets: &[BucketConfig]) -> serde_json::Value {
    let documents = buckets
        .iter()
        .map(|bucket| {
            let mut entry = serde_json::json!({
                "user_policy": bucket.permissions.policy_document(&bucket.name),
            });

            if bucket.bucket_type == s3probe::BucketType::Public {
                entry["bucket_policy"] =
                    s3probe::public_read_policy(&bucket.name, bucket.public_list);
            }

            (bucket.name.clone(), entry)
        })
        .collect::<serde_json::Map<_, _>>();

    serde_json::Value::Object(documents)
}

async fn write_output(path: &Path, json: String) -> color_eyre::Result<()> {
    tokio::fs::write(path, json)
        .await
        .wrap_err_with(|| format!("Unable to write {}", path.display()))
}

/// Log to stderr.  `RUST_LOG` takes precedence over the verbosity flags.
///
/// Unless verbose, only warnings are logged so they don't fight with the progress bar.
fn init_logging(globals: &Globals) {
    use tracing_subscriber::EnvFilter;

    let default_filter = if globals.verbose {
        "s3probe=debug,info"
    } else if globals.quiet {
        "error"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(globals.verbose)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn parse_run() {
        let args = Args::try_parse_from([
            "s3probe",
            "--s3-endpoint",
            "http://localhost:9000",
            "-v",
            "run",
            "--buckets",
            "buckets.json",
            "--suite",
            "permissions",
            "--operation",
            "upload-large-file",
            "--operation",
            "anonymous-list",
            "--report",
            "report.json",
        ])
        .unwrap();

        assert!(args.globals.verbose);
        assert_eq!(
            Some("http://localhost:9000/"),
            args.globals.config.s3_endpoint.as_ref().map(|url| url.as_str())
        );

        match args.command {
            Command::Run { cases, report } => {
                assert_eq!(PathBuf::from("buckets.json"), cases.buckets);
                assert_eq!(vec![Suite::Permissions], cases.suites);
                assert_eq!(
                    vec![Operation::UploadLargeFile, Operation::AnonymousList],
                    cases.operations
                );
                assert_eq!(Some(PathBuf::from("report.json")), report);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Args::try_parse_from(["s3probe", "-v", "-q", "matrix"]).is_err());
    }

    #[test]
    fn matrix_prefix_must_make_valid_bucket_names() {
        assert_eq!(32, matrix_template("s3probe").unwrap().len());

        assert!(matrix_template("UPPER").is_err());
        assert!(matrix_template(&"x".repeat(60)).is_err());
        assert!(matrix_template("under_score").is_err());
    }

    #[test]
    fn policies_for_every_template_bucket() {
        let buckets = PermissionMatrix::template("t");
        let documents = policy_documents(&buckets);
        let documents = documents.as_object().unwrap();

        assert_eq!(buckets.len(), documents.len());

        let public = documents
            .values()
            .filter(|entry| entry.get("bucket_policy").is_some())
            .count();
        assert_eq!(buckets.len() / 2, public);
    }
}
