//! Rendering of test run progress and results on the terminal
use s3probe::{Registry, RunProgressCallback, Runner, Summary, TestResult};

/// Run all cases in the registry, with a progress bar for extra pretty-ness
pub(crate) async fn run_with_progress(
    globals: &super::Globals,
    runner: &Runner,
    registry: Registry,
) -> Summary {
    let progress = RunProgressReport::new(hide_progress(globals), globals.quiet);

    runner.run(registry, progress).await
}

/// Print the one-line tally, preceded by the failures unless they were already printed as they
/// happened
pub(crate) fn print_summary(globals: &super::Globals, summary: &Summary) {
    if hide_progress(globals) && !globals.quiet {
        for failure in summary.failures() {
            println!("{}", describe_failure(failure));
        }
    }

    if !globals.quiet || !summary.is_success() {
        println!("{summary}");
    }
}

/// Progress should be hidden for either of verbose mode (because there will be a flurry of log
/// messages and the progress bar rendering will be all messed up), or quiet mode (because
/// progress bars are not quiet).
fn hide_progress(globals: &super::Globals) -> bool {
    globals.verbose || globals.quiet
}

fn describe_failure(result: &TestResult) -> String {
    format!("FAIL {}: {}", result.id, result.message)
}

/// Receives progress updates from the runner and renders a progress bar of completed cases, with
/// each failure printed above the bar as soon as it happens.
struct RunProgressReport {
    bar: indicatif::ProgressBar,
    hidden: bool,
    quiet: bool,
}

impl RunProgressReport {
    fn new(hidden: bool, quiet: bool) -> Self {
        let bar = if hidden {
            indicatif::ProgressBar::hidden()
        } else {
            indicatif::ProgressBar::new(0)
        };

        bar.set_style(
            indicatif::ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
        );

        Self { bar, hidden, quiet }
    }
}

impl RunProgressCallback for RunProgressReport {
    fn run_starting(&self, total_cases: usize) {
        self.bar.set_length(total_cases as u64);
    }

    fn case_started(&self, id: &str, _description: &str) {
        self.bar.set_message(id.to_string());
    }

    fn case_finished(&self, result: &TestResult) {
        if !result.passed && !self.hidden {
            self.bar.println(describe_failure(result));
        } else if !result.passed && self.quiet {
            // Quiet mode still reports failures, just without a progress bar
            eprintln!("{}", describe_failure(result));
        }

        self.bar.inc(1);
    }

    fn run_finished(&self, _summary: &Summary) {
        self.bar.finish_and_clear();
    }
}
