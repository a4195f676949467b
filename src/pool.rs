//! Resizable worker pool: OS threads consuming jobs and termination requests
//! from one shared FIFO queue.

mod registry;
mod worker;
pub mod worker_pool;

pub use worker_pool::WorkerPool;
