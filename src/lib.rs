pub mod pool;
pub mod queue;
pub mod runtime;
pub mod sequential;

pub use pool::WorkerPool;
pub use queue::blocking::BlockingQueue;
pub use queue::job::{Job, JobFn};
pub use runtime::config::{
    PoolConfig, PoolConfigBuilder, SequentialConfig, SequentialConfigBuilder,
};
pub use runtime::errors::{PoolError, QueueError};
pub use runtime::reporting::{CollectingSink, ErrorSink, FailureKind, JobFailure, TracingSink};
pub use runtime::telemetry::{
    init_tracing, spawn_metrics_reporter, QueueGauge, Telemetry, TelemetrySnapshot,
    DEFAULT_METRICS_INTERVAL,
};
pub use sequential::{QueueState, SequentialQueue};
