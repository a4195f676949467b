//! Failure reporting for job bodies.
//!
//! Workers never let a job error or panic escape their loop. Each failure is
//! turned into a [`JobFailure`], counted in [`Telemetry`], and handed to an
//! [`ErrorSink`].

use crate::queue::job::Job;
use crate::runtime::telemetry::Telemetry;
use anyhow::Error as AnyError;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a job failed.
#[derive(Debug)]
pub enum FailureKind {
    /// The job returned `Err`.
    Error(AnyError),
    /// The job panicked; holds the panic message when it was a string.
    Panic(String),
}

/// A job that returned an error or panicked on a worker.
#[derive(Debug)]
pub struct JobFailure {
    worker: String,
    label: Option<Cow<'static, str>>,
    kind: FailureKind,
}

impl JobFailure {
    pub fn new(
        worker: impl Into<String>,
        label: Option<Cow<'static, str>>,
        kind: FailureKind,
    ) -> Self {
        Self {
            worker: worker.into(),
            label,
            kind,
        }
    }

    /// Name of the worker thread that ran the job.
    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn kind(&self) -> &FailureKind {
        &self.kind
    }

    pub fn is_panic(&self) -> bool {
        matches!(self.kind, FailureKind::Panic(_))
    }

    pub fn into_kind(self) -> FailureKind {
        self.kind
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.label().unwrap_or("unlabelled");
        match &self.kind {
            FailureKind::Error(err) => {
                write!(f, "job {label} failed on {}: {err:#}", self.worker)
            }
            FailureKind::Panic(message) => {
                write!(f, "job {label} panicked on {}: {message}", self.worker)
            }
        }
    }
}

impl std::error::Error for JobFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            FailureKind::Error(err) => Some(err.as_ref()),
            FailureKind::Panic(_) => None,
        }
    }
}

/// Destination for job failures.
///
/// Implemented for any `Fn(JobFailure)` closure, so a callback can be passed
/// wherever a sink is expected.
pub trait ErrorSink: Send + Sync + 'static {
    fn report(&self, failure: JobFailure);
}

impl<F> ErrorSink for F
where
    F: Fn(JobFailure) + Send + Sync + 'static,
{
    fn report(&self, failure: JobFailure) {
        self(failure)
    }
}

/// Default sink: logs every failure at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, failure: JobFailure) {
        tracing::error!(
            worker = failure.worker(),
            job = failure.label().unwrap_or("unlabelled"),
            panic = failure.is_panic(),
            error = %failure,
            "job failed"
        );
    }
}

/// Sink that keeps every failure for later inspection.
#[derive(Debug, Default)]
pub struct CollectingSink {
    failures: Mutex<Vec<JobFailure>>,
    reported: Condvar,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.failures.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.lock().is_empty()
    }

    /// Returns the rendered failure messages collected so far.
    pub fn messages(&self) -> Vec<String> {
        self.failures
            .lock()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Removes and returns everything collected so far.
    pub fn take(&self) -> Vec<JobFailure> {
        std::mem::take(&mut *self.failures.lock())
    }

    /// Blocks until at least `count` failures were collected or `timeout`
    /// elapses. Returns whether the count was reached.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut failures = self.failures.lock();
        while failures.len() < count {
            if self
                .reported
                .wait_until(&mut failures, deadline)
                .timed_out()
            {
                return failures.len() >= count;
            }
        }
        true
    }
}

impl ErrorSink for CollectingSink {
    fn report(&self, failure: JobFailure) {
        self.failures.lock().push(failure);
        self.reported.notify_all();
    }
}

/// Cheaply cloneable handle that workers use to run jobs and report failures.
#[derive(Clone)]
pub(crate) struct ErrorReporter {
    sink: Arc<dyn ErrorSink>,
    telemetry: Arc<Telemetry>,
}

impl ErrorReporter {
    pub(crate) fn new(sink: Arc<dyn ErrorSink>, telemetry: Arc<Telemetry>) -> Self {
        Self { sink, telemetry }
    }

    /// Runs `job` on the current thread. An `Err` or a panic is reported and
    /// swallowed; this never unwinds into the caller.
    pub(crate) fn run_guarded(&self, job: Job, worker: &str) {
        let label = job.label_owned();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run()));

        let kind = match outcome {
            Ok(Ok(())) => {
                self.telemetry.record_job_completed();
                return;
            }
            Ok(Err(err)) => FailureKind::Error(err),
            Err(payload) => FailureKind::Panic(panic_message(payload.as_ref())),
        };

        self.telemetry.record_job_failed();
        self.report(JobFailure::new(worker, label, kind));
    }

    fn report(&self, failure: JobFailure) {
        let sink = &self.sink;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| sink.report(failure))) {
            tracing::warn!(
                panic = %panic_message(payload.as_ref()),
                "error sink panicked while reporting a job failure"
            );
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
