//! Queue primitives shared by the worker pool and the sequential queue: the
//! blocking FIFO itself and the job values that travel through it.

pub mod blocking;
pub mod job;
