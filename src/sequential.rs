//! Single-worker queue with an explicit lifecycle: jobs run one at a time in
//! push order, and the worker can be stopped gracefully, terminated, and
//! restarted.

pub mod queue;
pub mod state;

pub use queue::SequentialQueue;
pub use state::QueueState;
