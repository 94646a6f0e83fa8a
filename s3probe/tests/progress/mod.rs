//! Progress callback that records every event, so tests can check the runner reports progress in
//! a sensible order.
use more_asserts::*;
use s3probe::{RunProgressCallback, Summary, TestResult};
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RunEvent {
    RunStarting { total_cases: usize },
    CaseStarted { id: String },
    CaseFinished { id: String, passed: bool },
    RunFinished { passed: usize, failed: usize },
}

#[derive(Debug, Default)]
pub(crate) struct TestRunProgressCallback {
    events: Mutex<Vec<RunEvent>>,
}

impl TestRunProgressCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: RunEvent) {
        self.events.lock().unwrap().push(event);
    }

    /// Check that the recorded events make sense for a run with `summary` as its result
    pub fn sanity_check_updates(&self, summary: &Summary) {
        let events = self.events();

        assert_ge!(events.len(), 2, "at least start and finish must be reported");
        assert_eq!(
            RunEvent::RunStarting {
                total_cases: summary.total()
            },
            events[0]
        );
        assert_eq!(
            &RunEvent::RunFinished {
                passed: summary.passed(),
                failed: summary.failed()
            },
            events.last().unwrap()
        );

        // Between start and finish every case is started and then finished before the next one
        // starts, in the order of the results
        let case_events = &events[1..events.len() - 1];
        assert_eq!(summary.total() * 2, case_events.len());

        for (pair, result) in case_events.chunks(2).zip(&summary.results) {
            assert_eq!(
                RunEvent::CaseStarted {
                    id: result.id.clone()
                },
                pair[0]
            );
            assert_eq!(
                RunEvent::CaseFinished {
                    id: result.id.clone(),
                    passed: result.passed
                },
                pair[1]
            );
        }
    }
}

impl RunProgressCallback for &TestRunProgressCallback {
    fn run_starting(&self, total_cases: usize) {
        self.record(RunEvent::RunStarting { total_cases });
    }

    fn case_started(&self, id: &str, _description: &str) {
        self.record(RunEvent::CaseStarted { id: id.to_string() });
    }

    fn case_finished(&self, result: &TestResult) {
        self.record(RunEvent::CaseFinished {
            id: result.id.clone(),
            passed: result.passed,
        });
    }

    fn run_finished(&self, summary: &Summary) {
        self.record(RunEvent::RunFinished {
            passed: summary.passed(),
            failed: summary.failed(),
        });
    }
}
