use super::state::QueueState;
use crate::queue::blocking::BlockingQueue;
use crate::queue::job::{Envelope, Job};
use crate::runtime::config::SequentialConfig;
use crate::runtime::errors::QueueError;
use crate::runtime::reporting::{panic_message, ErrorReporter, ErrorSink, TracingSink};
use crate::runtime::telemetry::{self, Telemetry};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Control {
    state: QueueState,
    worker: Option<JoinHandle<()>>,
    worker_thread: Option<ThreadId>,
    worker_alive: bool,
    /// A termination sentinel is queued or popped but not yet acted upon.
    sentinel_outstanding: bool,
    runs: u64,
}

struct SequentialShared {
    queue: Arc<BlockingQueue<Envelope>>,
    control: Mutex<Control>,
    exited: Condvar,
    processing: AtomicBool,
    reporter: ErrorReporter,
    telemetry: Arc<Telemetry>,
    config: SequentialConfig,
}

/// Runs jobs one at a time, in push order, on a single dedicated thread.
///
/// Pushes from any number of threads are serialised by the queue itself. The
/// lifecycle is described by [`QueueState`]: `stop` lets queued work finish,
/// `terminate` hands unstarted jobs back, and `start` begins a fresh run.
pub struct SequentialQueue {
    shared: Arc<SequentialShared>,
}

impl SequentialQueue {
    /// Creates a queue with default settings and starts its worker. Job
    /// failures are logged through `tracing`.
    pub fn new() -> Result<Self, QueueError> {
        Self::with_config(SequentialConfig::default(), Arc::new(TracingSink))
    }

    /// Creates a queue that reports job failures to `sink`. The worker is
    /// started unless the config disables autostart.
    pub fn with_config(
        config: SequentialConfig,
        sink: Arc<dyn ErrorSink>,
    ) -> Result<Self, QueueError> {
        config.validate().map_err(QueueError::Config)?;

        let telemetry = Arc::new(Telemetry::default());
        let autostart = config.autostart();
        let queue = Self {
            shared: Arc::new(SequentialShared {
                queue: Arc::new(BlockingQueue::new()),
                control: Mutex::new(Control {
                    state: QueueState::Stopped,
                    worker: None,
                    worker_thread: None,
                    worker_alive: false,
                    sentinel_outstanding: false,
                    runs: 0,
                }),
                exited: Condvar::new(),
                processing: AtomicBool::new(false),
                reporter: ErrorReporter::new(sink, telemetry.clone()),
                telemetry,
                config,
            }),
        };

        if autostart {
            queue.start()?;
        }
        Ok(queue)
    }

    /// Closure shorthand for [`push`](Self::push).
    pub fn dispatch<F>(&self, task: F) -> Result<(), QueueError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.push(Job::new(task))
    }

    /// Appends a job. Jobs pushed before the first `start` are held and run
    /// once the queue starts.
    pub fn push(&self, job: Job) -> Result<(), QueueError> {
        let control = self.shared.control.lock();
        if control.state.accepts_jobs() {
            self.shared.telemetry.record_job_dispatched();
            self.shared.queue.push(Envelope::Work(job));
            return Ok(());
        }

        tracing::debug!(
            job = job.label().unwrap_or("unlabelled"),
            state = %control.state,
            "rejected push"
        );
        if control.state == QueueState::Stopping {
            Err(QueueError::Sealed)
        } else {
            Err(QueueError::Terminated)
        }
    }

    /// Starts a worker run. A running queue is joined first, so everything
    /// already queued finishes before the new run begins.
    pub fn start(&self) -> Result<(), QueueError> {
        loop {
            self.join()?;

            let mut control = self.shared.control.lock();
            if control.worker_alive {
                // Another caller started a run between our join and this lock.
                continue;
            }

            control.runs += 1;
            let run = control.runs;
            let shared = Arc::clone(&self.shared);
            let handle = self
                .shared
                .config
                .spawn_worker(run, move || run_worker(shared))
                .map_err(QueueError::Spawn)?;

            control.worker_thread = Some(handle.thread().id());
            control.worker = Some(handle);
            control.worker_alive = true;
            control.sentinel_outstanding = false;
            control.state = QueueState::Running;
            self.shared.telemetry.record_worker_pool_size(1);

            tracing::debug!(
                run,
                queued = self.shared.queue.len(),
                "sequential queue started"
            );
            return Ok(());
        }
    }

    /// Seals the queue. Jobs already queued still run; the worker exits
    /// after the last of them. Does not block.
    pub fn stop(&self) {
        let mut control = self.shared.control.lock();
        if control.state == QueueState::Running {
            self.seal(&mut control);
        }
    }

    /// Stops after the job in progress (if any) and returns the queued jobs
    /// that never started, in push order. None of them will run.
    pub fn terminate(&self) -> Vec<Job> {
        let mut control = self.shared.control.lock();
        if control.state == QueueState::Terminated {
            return Vec::new();
        }

        let mut unexecuted = Vec::new();
        for envelope in self.shared.queue.drain() {
            match envelope {
                Envelope::Work(job) => unexecuted.push(job),
                Envelope::Terminate => control.sentinel_outstanding = false,
            }
        }

        let previous = control.state;
        control.state = QueueState::Terminated;
        if control.worker_alive && !control.sentinel_outstanding {
            control.sentinel_outstanding = true;
            self.shared.queue.push(Envelope::Terminate);
        }
        drop(control);

        self.shared.telemetry.record_jobs_discarded(unexecuted.len());
        tracing::debug!(
            from = %previous,
            discarded = unexecuted.len(),
            "sequential queue terminated"
        );
        unexecuted
    }

    /// Stops the queue and blocks until its worker thread has exited. Every
    /// job queued before the call has run by then.
    pub fn join(&self) -> Result<(), QueueError> {
        let handle = {
            let mut control = self.shared.control.lock();
            if control.worker_alive && control.worker_thread == Some(thread::current().id()) {
                return Err(QueueError::JoinFromWorker);
            }
            if control.state == QueueState::Running {
                self.seal(&mut control);
            }
            while control.worker_alive {
                self.shared.exited.wait(&mut control);
            }
            control.worker.take()
        };

        if let Some(handle) = handle {
            if let Err(payload) = handle.join() {
                tracing::warn!(
                    panic = %panic_message(payload.as_ref()),
                    "sequential worker thread panicked"
                );
            }
        }
        Ok(())
    }

    pub fn state(&self) -> QueueState {
        self.shared.control.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == QueueState::Running
    }

    /// True from `stop` (or a `terminate` that is still waiting for the job
    /// in progress) until the worker has exited.
    pub fn is_stopping(&self) -> bool {
        let control = self.shared.control.lock();
        match control.state {
            QueueState::Stopping => true,
            QueueState::Terminated => control.worker_alive,
            QueueState::Stopped | QueueState::Running => false,
        }
    }

    /// True only when fully idle: not running, not stopping, and not in the
    /// middle of a job.
    pub fn is_stopped(&self) -> bool {
        let control = self.shared.control.lock();
        !control.worker_alive
            && matches!(control.state, QueueState::Stopped | QueueState::Terminated)
            && !self.shared.processing.load(Ordering::SeqCst)
    }

    /// Jobs waiting to run, plus a pending termination request if any.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn config(&self) -> &SequentialConfig {
        &self.shared.config
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.shared.telemetry.clone()
    }

    /// Periodically logs this queue's metrics until `shutdown` is cancelled.
    /// Must be called from within a tokio runtime.
    pub fn spawn_metrics_reporter(
        &self,
        shutdown: CancellationToken,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        telemetry::spawn_metrics_reporter(
            self.shared.telemetry.clone(),
            self.shared.queue.clone(),
            shutdown,
            interval,
        )
    }

    fn seal(&self, control: &mut Control) {
        control.state = QueueState::Stopping;
        if !control.sentinel_outstanding {
            control.sentinel_outstanding = true;
            self.shared.queue.push(Envelope::Terminate);
        }
        tracing::debug!(queued = self.shared.queue.len(), "sequential queue sealed");
    }
}

impl Drop for SequentialQueue {
    fn drop(&mut self) {
        let mut control = self.shared.control.lock();
        match control.state {
            QueueState::Running => self.seal(&mut control),
            QueueState::Stopped => {
                let abandoned = self.shared.queue.drain().len();
                if abandoned > 0 {
                    self.shared.telemetry.record_jobs_discarded(abandoned);
                    tracing::debug!(
                        abandoned,
                        "dropped a sequential queue that never started"
                    );
                }
            }
            QueueState::Stopping | QueueState::Terminated => {}
        }
    }
}

fn run_worker(shared: Arc<SequentialShared>) {
    let name = thread::current().name().unwrap_or("sequential").to_owned();
    let _guard = ExitGuard { shared: &shared };
    tracing::debug!(worker = %name, "sequential worker started");

    loop {
        match shared.queue.pop() {
            Envelope::Work(job) => {
                shared.processing.store(true, Ordering::SeqCst);
                shared.reporter.run_guarded(job, &name);
                shared.processing.store(false, Ordering::SeqCst);
            }
            Envelope::Terminate => {
                let mut control = shared.control.lock();
                control.sentinel_outstanding = false;
                control.state = QueueState::Terminated;
                break;
            }
        }
    }

    tracing::debug!(worker = %name, "sequential worker stopped");
}

/// Marks the worker as gone even if the loop unwinds, so joiners never wait
/// on a dead thread.
struct ExitGuard<'a> {
    shared: &'a SequentialShared,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        let mut control = self.shared.control.lock();
        control.worker_alive = false;
        if control.state.is_active() {
            control.state = QueueState::Terminated;
        }
        self.shared.processing.store(false, Ordering::SeqCst);
        self.shared.telemetry.record_worker_pool_size(0);
        self.shared.exited.notify_all();
    }
}
