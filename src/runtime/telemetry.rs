use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Anything whose backlog the metrics reporter can sample.
pub trait QueueGauge: Send + Sync {
    fn queued(&self) -> usize;
}

/// Lightweight counters shared by a pool or sequential queue and its workers.
#[derive(Default, Debug)]
pub struct Telemetry {
    jobs_dispatched: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_discarded: AtomicU64,
    worker_pool_transitions: AtomicU64,
    worker_pool_size: AtomicUsize,
}

impl Telemetry {
    pub fn record_job_dispatched(&self) {
        self.jobs_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Jobs handed back to the caller unexecuted by a forced termination.
    pub fn record_jobs_discarded(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.jobs_discarded
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_worker_pool_size(&self, workers: usize) {
        self.worker_pool_size.store(workers, Ordering::Relaxed);
        self.worker_pool_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            jobs_dispatched: self.jobs_dispatched.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_discarded: self.jobs_discarded.load(Ordering::Relaxed),
        }
    }

    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size.load(Ordering::Relaxed)
    }

    pub fn worker_pool_transitions(&self) -> u64 {
        self.worker_pool_transitions.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub jobs_dispatched: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_discarded: u64,
}

impl TelemetrySnapshot {
    /// Jobs that finished, successfully or not.
    pub fn jobs_finished(&self) -> u64 {
        self.jobs_completed.saturating_add(self.jobs_failed)
    }

    /// Jobs dispatched but neither finished nor discarded yet.
    pub fn jobs_outstanding(&self) -> u64 {
        self.jobs_dispatched
            .saturating_sub(self.jobs_finished())
            .saturating_sub(self.jobs_discarded)
    }
}

/// Spawns a background task that periodically logs throughput, backlog, and failure counts.
///
/// Must be called from within a tokio runtime.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    gauge: Arc<dyn QueueGauge>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "taskpool::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let finished_delta = current_snapshot
                        .jobs_finished()
                        .saturating_sub(last_snapshot.jobs_finished());
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        finished_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "taskpool::metrics",
                        throughput = format!("{throughput:.2}"),
                        dispatched = current_snapshot.jobs_dispatched,
                        completed = current_snapshot.jobs_completed,
                        failed = current_snapshot.jobs_failed,
                        discarded = current_snapshot.jobs_discarded,
                        queued = gauge.queued(),
                        workers = telemetry.worker_pool_size(),
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
