use anyhow::Error as AnyError;
use std::fmt;
use std::io;

/// Errors returned synchronously by [`WorkerPool`](crate::WorkerPool) operations.
#[derive(Debug)]
pub enum PoolError {
    /// The pool was joined; it accepts no further work or resizing.
    Joined,
    /// `join` was called from one of the pool's own worker threads.
    JoinFromWorker,
    Spawn(io::Error),
    Config(AnyError),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Joined => {
                write!(f, "worker pool has been joined and no longer accepts work")
            }
            PoolError::JoinFromWorker => {
                write!(f, "worker pool cannot be joined from one of its own workers")
            }
            PoolError::Spawn(err) => write!(f, "failed to spawn worker thread: {err}"),
            PoolError::Config(err) => write!(f, "invalid worker pool configuration: {err}"),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::Spawn(err) => Some(err),
            PoolError::Config(err) => Some(err.as_ref()),
            PoolError::Joined | PoolError::JoinFromWorker => None,
        }
    }
}

/// Errors returned synchronously by [`SequentialQueue`](crate::SequentialQueue) operations.
#[derive(Debug)]
pub enum QueueError {
    /// `stop` was called; the queue refuses new jobs until it is restarted.
    Sealed,
    /// The queue was terminated and has not been started again.
    Terminated,
    /// `join` or `start` was called from the queue's own worker thread.
    JoinFromWorker,
    Spawn(io::Error),
    Config(AnyError),
}

impl QueueError {
    /// True for the lifecycle rejections (`Sealed`, `Terminated`), where the
    /// job was never queued.
    pub fn is_rejection(&self) -> bool {
        matches!(self, QueueError::Sealed | QueueError::Terminated)
    }
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Sealed => write!(f, "sequential queue is stopping and has been sealed"),
            QueueError::Terminated => {
                write!(f, "sequential queue is terminated; call start() before pushing")
            }
            QueueError::JoinFromWorker => {
                write!(f, "sequential queue cannot be joined from its own worker")
            }
            QueueError::Spawn(err) => write!(f, "failed to spawn sequential worker: {err}"),
            QueueError::Config(err) => write!(f, "invalid sequential queue configuration: {err}"),
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueueError::Spawn(err) => Some(err),
            QueueError::Config(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
