use std::collections::HashMap;
use std::thread::{JoinHandle, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PoolPhase {
    Open,
    /// A `join` running on the given thread is waiting for workers to retire.
    Joining(ThreadId),
    Joined,
}

/// Live-worker bookkeeping for one pool. Only ever touched under the pool's
/// registry lock.
///
/// `tracked` is the optimistic count: it rises when workers are spawned and
/// drops as soon as a termination is requested. `workers` holds the threads
/// that have not yet consumed a termination sentinel; each entry stays until
/// its own worker retires it.
pub(super) struct WorkerRegistry {
    phase: PoolPhase,
    tracked: usize,
    next_id: usize,
    workers: HashMap<usize, JoinHandle<()>>,
    retired: Vec<JoinHandle<()>>,
}

impl WorkerRegistry {
    pub(super) fn new() -> Self {
        Self {
            phase: PoolPhase::Open,
            tracked: 0,
            next_id: 0,
            workers: HashMap::new(),
            retired: Vec::new(),
        }
    }

    pub(super) fn phase(&self) -> PoolPhase {
        self.phase
    }

    pub(super) fn is_open(&self) -> bool {
        self.phase == PoolPhase::Open
    }

    pub(super) fn begin_join(&mut self, joiner: ThreadId) {
        self.phase = PoolPhase::Joining(joiner);
    }

    pub(super) fn close(&mut self) {
        self.phase = PoolPhase::Joined;
    }

    pub(super) fn tracked(&self) -> usize {
        self.tracked
    }

    pub(super) fn live(&self) -> usize {
        self.workers.len()
    }

    pub(super) fn next_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    pub(super) fn register(&mut self, id: usize, handle: JoinHandle<()>) {
        self.workers.insert(id, handle);
        self.tracked += 1;
    }

    /// Lowers the tracked count by up to `requested`, returning how many
    /// terminations the caller must enqueue.
    pub(super) fn release(&mut self, requested: usize) -> usize {
        let released = requested.min(self.tracked);
        self.tracked -= released;
        released
    }

    /// Called by a worker about to exit: moves its own handle out of the live
    /// set. Returns false when it was already retired.
    pub(super) fn retire(&mut self, id: usize) -> bool {
        self.reap_finished();
        match self.workers.remove(&id) {
            Some(handle) => {
                self.retired.push(handle);
                true
            }
            None => false,
        }
    }

    /// Whether `thread` runs this pool's jobs: a worker, or the thread
    /// executing leftovers inside `join`.
    pub(super) fn runs_jobs_on(&self, thread: ThreadId) -> bool {
        self.phase == PoolPhase::Joining(thread)
            || self
                .workers
                .values()
                .chain(self.retired.iter())
                .any(|handle| handle.thread().id() == thread)
    }

    /// Hands the handles of retired workers to the caller.
    pub(super) fn take_retired(&mut self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut self.retired)
    }

    fn reap_finished(&mut self) {
        self.retired.retain(|handle| !handle.is_finished());
    }
}
