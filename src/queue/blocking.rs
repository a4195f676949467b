use crate::runtime::telemetry::QueueGauge;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Unbounded multi-producer/multi-consumer FIFO queue whose `pop` parks the
/// calling thread until an item is available.
///
/// Every mutation happens under a single lock, so items come out in exactly
/// the order their `push` calls acquired it, and each item is handed to
/// exactly one consumer.
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Appends `item` and wakes one blocked consumer. Never waits for space.
    pub fn push(&self, item: T) {
        let mut items = self.items.lock();
        items.push_back(item);
        drop(items);
        self.available.notify_one();
    }

    /// Removes the oldest item, blocking until one exists.
    pub fn pop(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            self.available.wait(&mut items);
        }
    }

    /// Like [`BlockingQueue::pop`], but gives up once `timeout` elapses.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            if self.available.wait_until(&mut items, deadline).timed_out() {
                return items.pop_front();
            }
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Atomically empties the queue, returning the items oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> QueueGauge for BlockingQueue<T> {
    fn queued(&self) -> usize {
        self.len()
    }
}
