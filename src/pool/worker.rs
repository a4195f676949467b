use super::worker_pool::PoolShared;
use crate::queue::job::Envelope;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

/// A thread bound to its pool's queue.
///
/// It loops until it dequeues a termination sentinel; any idle worker may
/// consume any sentinel, so only the number of exits is guaranteed, never
/// which worker leaves.
pub(super) struct Worker {
    id: usize,
    name: String,
    shared: Arc<PoolShared>,
}

impl Worker {
    pub(super) fn spawn(id: usize, shared: &Arc<PoolShared>) -> io::Result<JoinHandle<()>> {
        let worker = Worker {
            id,
            name: format!("{}-{id}", shared.config.thread_name()),
            shared: Arc::clone(shared),
        };
        shared.config.spawn_worker(id, move || worker.run())
    }

    fn run(self) {
        tracing::debug!(worker = %self.name, "worker thread started");
        let _retire = RetireOnExit { worker: &self };

        loop {
            match self.shared.queue.pop() {
                Envelope::Work(job) => self.shared.reporter.run_guarded(job, &self.name),
                Envelope::Terminate => break,
            }
        }
    }

    fn deregister(&self) {
        let mut registry = self.shared.registry.lock();
        if registry.retire(self.id) {
            tracing::debug!(
                worker = %self.name,
                live = registry.live(),
                "worker removed itself from the pool"
            );
        }
        drop(registry);
        self.shared.registry_changed.notify_all();
    }
}

/// Retires the worker even if its loop unwinds, so `join` never waits on a
/// thread that is gone.
struct RetireOnExit<'a> {
    worker: &'a Worker,
}

impl Drop for RetireOnExit<'_> {
    fn drop(&mut self) {
        self.worker.deregister();
        tracing::debug!(worker = %self.worker.name, "worker thread stopped");
    }
}
