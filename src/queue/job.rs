use anyhow::Result;
use std::borrow::Cow;
use std::fmt;

/// Boxed callable stored inside a [`Job`].
pub type JobFn = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// An opaque unit of work.
///
/// The pool never inspects what a job does; it only runs it once and routes
/// an `Err` or a panic to the configured error sink.
pub struct Job {
    label: Option<Cow<'static, str>>,
    task: JobFn,
}

impl Job {
    pub fn new<F>(task: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            label: None,
            task: Box::new(task),
        }
    }

    /// Pre-binds `args` to `task`. The arguments move into the job and are
    /// handed to `task` when a worker runs it.
    pub fn with_args<F, A>(task: F, args: A) -> Self
    where
        F: FnOnce(A) -> Result<()> + Send + 'static,
        A: Send + 'static,
    {
        Self::new(move || task(args))
    }

    /// Attaches a label that shows up in logs and in [`JobFailure`]s.
    ///
    /// [`JobFailure`]: crate::JobFailure
    pub fn labelled(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn label_owned(&self) -> Option<Cow<'static, str>> {
        self.label.clone()
    }

    /// Runs the job on the current thread, consuming it.
    pub fn run(self) -> Result<()> {
        (self.task)()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("label", &self.label).finish()
    }
}

/// Item type carried by the internal queues: real work, or a request for the
/// receiving worker to exit.
pub(crate) enum Envelope {
    Work(Job),
    Terminate,
}
