use std::fmt;

/// Lifecycle state of a [`SequentialQueue`](crate::SequentialQueue).
///
/// ```text
/// Stopped --start--> Running --stop--> Stopping --sentinel--> Terminated
///                       |                  |
///                       +---terminate------+-------------------> Terminated
/// Terminated --start--> Running
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueState {
    /// Never started. Jobs may be queued; they run once the queue starts.
    Stopped,
    Running,
    /// Sealed by `stop`: queued jobs still run, new pushes are refused.
    Stopping,
    /// The worker is gone or about to exit. Pushes are refused until `start`.
    Terminated,
}

impl QueueState {
    /// Whether `push` accepts jobs in this state.
    pub fn accepts_jobs(self) -> bool {
        matches!(self, QueueState::Stopped | QueueState::Running)
    }

    /// Whether a worker thread may still be executing jobs.
    pub fn is_active(self) -> bool {
        matches!(self, QueueState::Running | QueueState::Stopping)
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QueueState::Stopped => "stopped",
            QueueState::Running => "running",
            QueueState::Stopping => "stopping",
            QueueState::Terminated => "terminated",
        };
        f.write_str(label)
    }
}
