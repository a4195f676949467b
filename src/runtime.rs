//! Ambient runtime concerns shared by the pool and the sequential queue:
//! configuration, error types, failure reporting, and telemetry.

pub mod config;
pub mod errors;
pub mod reporting;
pub mod telemetry;
