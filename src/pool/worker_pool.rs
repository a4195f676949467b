//! Resizable pool of worker threads sharing one FIFO queue.

use super::registry::{PoolPhase, WorkerRegistry};
use super::worker::Worker;
use crate::queue::blocking::BlockingQueue;
use crate::queue::job::{Envelope, Job};
use crate::runtime::config::PoolConfig;
use crate::runtime::errors::PoolError;
use crate::runtime::reporting::{panic_message, ErrorReporter, ErrorSink, TracingSink};
use crate::runtime::telemetry::{self, Telemetry};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(super) struct PoolShared {
    pub(super) queue: Arc<BlockingQueue<Envelope>>,
    pub(super) registry: Mutex<WorkerRegistry>,
    /// Signalled when a worker retires and when a join completes.
    pub(super) registry_changed: Condvar,
    pub(super) reporter: ErrorReporter,
    pub(super) telemetry: Arc<Telemetry>,
    pub(super) config: PoolConfig,
}

/// A pool of OS threads that execute dispatched jobs concurrently.
///
/// Work and termination requests travel through the same queue, so shrinking
/// the pool never preempts work that was already queued. Methods take `&self`;
/// wrap the pool in an [`Arc`] to dispatch from several threads or from inside
/// jobs.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers with default settings. Job failures are
    /// logged through `tracing`.
    pub fn new(worker_count: usize) -> Result<Self, PoolError> {
        let config = PoolConfig::new(worker_count).map_err(PoolError::Config)?;
        Self::with_config(config, Arc::new(TracingSink))
    }

    /// Spawns the configured workers; every job failure is handed to `sink`.
    pub fn with_config(config: PoolConfig, sink: Arc<dyn ErrorSink>) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::Config)?;

        let telemetry = Arc::new(Telemetry::default());
        let initial = config.worker_count();
        let pool = Self {
            shared: Arc::new(PoolShared {
                queue: Arc::new(BlockingQueue::new()),
                registry: Mutex::new(WorkerRegistry::new()),
                registry_changed: Condvar::new(),
                reporter: ErrorReporter::new(sink, telemetry.clone()),
                telemetry,
                config,
            }),
        };

        {
            let mut registry = pool.shared.registry.lock();
            pool.spawn_workers(&mut registry, initial)?;
        }

        tracing::debug!(workers = initial, "worker pool started");
        Ok(pool)
    }

    /// Queues a closure for execution on the next idle worker.
    pub fn dispatch<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.submit(Job::new(task))
    }

    /// Queues a pre-built job. Never blocks on worker availability.
    pub fn submit(&self, job: Job) -> Result<(), PoolError> {
        let registry = self.shared.registry.lock();
        if !registry.is_open() {
            return Err(PoolError::Joined);
        }
        self.shared.telemetry.record_job_dispatched();
        self.shared.queue.push(Envelope::Work(job));
        Ok(())
    }

    /// Adds `count` workers. The tracked count rises before the new threads
    /// necessarily start running.
    pub fn increment(&self, count: usize) -> Result<(), PoolError> {
        let mut registry = self.shared.registry.lock();
        if !registry.is_open() {
            return Err(PoolError::Joined);
        }
        self.spawn_workers(&mut registry, count)?;
        tracing::debug!(
            added = count,
            workers = registry.tracked(),
            "worker pool grown"
        );
        Ok(())
    }

    /// Asks `count` workers (clamped to the tracked count) to exit once the
    /// work queued ahead of the request is taken. Returns how many were asked.
    pub fn decrement(&self, count: usize) -> Result<usize, PoolError> {
        let mut registry = self.shared.registry.lock();
        if !registry.is_open() {
            return Err(PoolError::Joined);
        }

        let released = registry.release(count);
        for _ in 0..released {
            self.shared.queue.push(Envelope::Terminate);
        }
        self.shared
            .telemetry
            .record_worker_pool_size(registry.tracked());

        tracing::debug!(
            requested = count,
            released,
            workers = registry.tracked(),
            "dispatched worker termination requests"
        );
        Ok(released)
    }

    /// Shrinks the pool to zero and blocks until every worker thread exited.
    ///
    /// Everything queued before the call has run by the time this returns.
    /// The pool is closed afterwards. Concurrent callers all wait for the
    /// same shutdown; joining an already joined pool is a no-op.
    pub fn join(&self) -> Result<(), PoolError> {
        let current = thread::current().id();
        let mut registry = self.shared.registry.lock();
        if registry.runs_jobs_on(current) {
            return Err(PoolError::JoinFromWorker);
        }

        match registry.phase() {
            PoolPhase::Joined => return Ok(()),
            PoolPhase::Joining(_) => {
                tracing::debug!("waiting for a join already in progress");
                while registry.phase() != PoolPhase::Joined {
                    self.shared.registry_changed.wait(&mut registry);
                }
                return Ok(());
            }
            PoolPhase::Open => {}
        }

        let tracked = registry.tracked();
        let released = registry.release(tracked);
        for _ in 0..released {
            self.shared.queue.push(Envelope::Terminate);
        }
        registry.begin_join(current);
        self.shared.telemetry.record_worker_pool_size(0);
        tracing::debug!(released, live = registry.live(), "joining worker pool");

        while registry.live() > 0 {
            self.shared.registry_changed.wait(&mut registry);
        }
        let handles = registry.take_retired();
        drop(registry);

        for handle in handles {
            let name = handle.thread().name().unwrap_or("unnamed").to_owned();
            if let Err(payload) = handle.join() {
                tracing::warn!(
                    worker = %name,
                    panic = %panic_message(payload.as_ref()),
                    "worker thread panicked"
                );
            }
        }

        // Every worker has exited, so nothing else is popping the queue.
        self.run_leftovers();

        self.shared.registry.lock().close();
        self.shared.registry_changed.notify_all();
        tracing::debug!("worker pool joined");
        Ok(())
    }

    /// Tracked worker count: workers alive or about to start, minus those
    /// already asked to exit.
    pub fn worker_count(&self) -> usize {
        self.shared.registry.lock().tracked()
    }

    /// Worker threads that have not yet consumed a termination sentinel.
    pub fn live_workers(&self) -> usize {
        self.shared.registry.lock().live()
    }

    /// Messages waiting in the queue, including pending termination requests.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_joined(&self) -> bool {
        !self.shared.registry.lock().is_open()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.shared.telemetry.clone()
    }

    /// Periodically logs this pool's metrics until `shutdown` is cancelled.
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

    fn spawn_workers(&self, registry: &mut WorkerRegistry, count: usize) -> Result<(), PoolError> {
        // Threads are registered under the lock, so a worker that exits
        // immediately still finds its own entry to retire.
        let mut outcome = Ok(());
        for _ in 0..count {
            let id = registry.next_id();
            match Worker::spawn(id, &self.shared) {
                Ok(handle) => registry.register(id, handle),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to spawn worker thread");
                    outcome = Err(PoolError::Spawn(err));
                    break;
                }
            }
        }
        self.shared
            .telemetry
            .record_worker_pool_size(registry.tracked());
        outcome
    }

    /// Runs work that no worker is left to take, e.g. jobs dispatched while
    /// the pool had zero workers.
    fn run_leftovers(&self) {
        let leftovers = self.shared.queue.drain();
        if leftovers.is_empty() {
            return;
        }

        let name = thread::current()
            .name()
            .map(|name| name.to_owned())
            .unwrap_or_else(|| "join".to_owned());
        tracing::debug!(
            count = leftovers.len(),
            "running jobs left without a worker on the joining thread"
        );
        for envelope in leftovers {
            if let Envelope::Work(job) = envelope {
                self.shared.reporter.run_guarded(job, &name);
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let mut registry = self.shared.registry.lock();
        if !registry.is_open() {
            return;
        }

        let tracked = registry.tracked();
        let released = registry.release(tracked);
        for _ in 0..released {
            self.shared.queue.push(Envelope::Terminate);
        }
        registry.close();
        tracing::debug!(
            released,
            "worker pool dropped without join; workers drain in the background"
        );
    }
}
