//! Per-test log capture.
//!
//! Tests run in parallel, so log events from a global subscriber would be interleaved across
//! tests.  Instead each test gets its own `tracing` dispatcher and its own tokio runtime whose
//! worker threads all use that dispatcher, and the captured events are printed when the test ends.
use crate::Result;
use std::{
    cell::RefCell,
    future::Future,
    io::Write,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing_subscriber::fmt::MakeWriter;

/// Default filter when `RUST_LOG` isn't set: everything from the probe, and only the interesting
/// parts of the HTTP and AWS stacks
const DEFAULT_FILTER: &str = "s3probe=trace,aws_smithy_runtime=info,aws=info,hyper=info,h2=warn,rustls=info,debug";

/// A `MakeWriter` that appends every log event to an in-memory buffer
#[derive(Clone, Default)]
struct CapturedLog {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLog {
    /// Take everything captured so far, leaving the buffer empty
    fn take(&self) -> String {
        let buffer = std::mem::take(&mut *self.buffer.lock().unwrap());

        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl<'a> Write for &'a CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLog {
    type Writer = &'a Self;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

fn test_dispatch(log: &CapturedLog) -> tracing::Dispatch {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let format = fmt::layer()
        .with_level(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(false)
        .with_writer(log.clone());

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .unwrap();

    tracing::Dispatch::new(tracing_subscriber::registry().with(filter).with(format))
}

/// Run an async test with log capture.
///
/// Use this in place of `#[tokio::test]`: it builds the tokio runtime itself so that every worker
/// thread logs to this test's dispatcher.  The captured log is printed when the test finishes,
/// whether it passed, failed, or panicked.
pub fn test_with_logging(test: impl Future<Output = Result<()>>) -> Result<()> {
    let log = CapturedLog::default();
    let dispatch = Arc::new(test_dispatch(&log));

    tracing::dispatcher::with_default(&dispatch, || {
        std::thread_local! {
            static THREAD_DISPATCHER_GUARD: RefCell<Option<tracing::subscriber::DefaultGuard>> = RefCell::new(None);
        }

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all();
        {
            let dispatch = dispatch.clone();
            builder.on_thread_start(move || {
                THREAD_DISPATCHER_GUARD.with(|cell| {
                    cell.replace(Some(tracing::dispatcher::set_default(&dispatch)));
                })
            });
        }

        builder.on_thread_stop(|| {
            THREAD_DISPATCHER_GUARD.with(|cell| cell.replace(None));
        });

        let runtime = builder.build()?;

        // Test futures can't all be required to be unwind safe, and a panic only ever resumes
        // below after the log is printed
        let result = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let result = runtime.block_on(test);
            runtime.shutdown_timeout(Duration::from_secs(10));

            result
        }));

        println!("Log events from this test: \n{}", log.take());

        match result {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}
