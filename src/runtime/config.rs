use anyhow::{bail, Result};
use std::io;
use std::thread::{self, JoinHandle};

/// Upper bound on workers a single pool may be configured with.
pub const MAX_WORKERS: usize = 4_096;
/// Smallest stack size accepted for worker threads.
pub const MIN_STACK_SIZE: usize = 64 * 1024;

const DEFAULT_POOL_THREAD_NAME: &str = "taskpool-worker";
const DEFAULT_SEQUENTIAL_THREAD_NAME: &str = "taskpool-sequential";

/// Runtime configuration for a [`WorkerPool`](crate::WorkerPool).
///
/// All instances are constructed via [`PoolConfig::builder`] or [`PoolConfig::new`]
/// so invariants are validated before any worker thread is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    worker_count: usize,
    thread_name: String,
    stack_size: Option<usize>,
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Default settings with `worker_count` workers.
    pub fn new(worker_count: usize) -> Result<Self> {
        Self::builder().worker_count(worker_count).build()
    }

    /// Number of workers spawned when the pool is created.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Prefix of every worker thread name; workers are named `{prefix}-{id}`.
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn stack_size(&self) -> Option<usize> {
        self.stack_size
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count > MAX_WORKERS {
            bail!(
                "worker_count ({}) must not exceed {MAX_WORKERS}",
                self.worker_count
            );
        }
        validate_thread_settings(&self.thread_name, self.stack_size)
    }

    pub(crate) fn spawn_worker<F>(&self, id: usize, body: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        spawn_named(format!("{}-{id}", self.thread_name), self.stack_size, body)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            thread_name: DEFAULT_POOL_THREAD_NAME.to_owned(),
            stack_size: None,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct PoolConfigBuilder {
    worker_count: Option<usize>,
    thread_name: Option<String>,
    stack_size: Option<usize>,
}

impl PoolConfigBuilder {
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn build(self) -> Result<PoolConfig> {
        let defaults = PoolConfig::default();
        let config = PoolConfig {
            worker_count: self.worker_count.unwrap_or(defaults.worker_count),
            thread_name: self
                .thread_name
                .map(trimmed_string)
                .unwrap_or(defaults.thread_name),
            stack_size: self.stack_size,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Runtime configuration for a [`SequentialQueue`](crate::SequentialQueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequentialConfig {
    thread_name: String,
    stack_size: Option<usize>,
    autostart: bool,
}

impl SequentialConfig {
    pub fn builder() -> SequentialConfigBuilder {
        SequentialConfigBuilder::default()
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn stack_size(&self) -> Option<usize> {
        self.stack_size
    }

    /// Whether the queue starts its worker as soon as it is constructed.
    pub fn autostart(&self) -> bool {
        self.autostart
    }

    pub fn validate(&self) -> Result<()> {
        validate_thread_settings(&self.thread_name, self.stack_size)
    }

    pub(crate) fn spawn_worker<F>(&self, run: u64, body: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        spawn_named(format!("{}-{run}", self.thread_name), self.stack_size, body)
    }
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_SEQUENTIAL_THREAD_NAME.to_owned(),
            stack_size: None,
            autostart: true,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct SequentialConfigBuilder {
    thread_name: Option<String>,
    stack_size: Option<usize>,
    autostart: Option<bool>,
}

impl SequentialConfigBuilder {
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn autostart(mut self, autostart: bool) -> Self {
        self.autostart = Some(autostart);
        self
    }

    pub fn build(self) -> Result<SequentialConfig> {
        let defaults = SequentialConfig::default();
        let config = SequentialConfig {
            thread_name: self
                .thread_name
                .map(trimmed_string)
                .unwrap_or(defaults.thread_name),
            stack_size: self.stack_size,
            autostart: self.autostart.unwrap_or(defaults.autostart),
        };

        config.validate()?;
        Ok(config)
    }
}

fn spawn_named<F>(name: String, stack_size: Option<usize>, body: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let mut builder = thread::Builder::new().name(name);
    if let Some(bytes) = stack_size {
        builder = builder.stack_size(bytes);
    }
    builder.spawn(body)
}

fn validate_thread_settings(thread_name: &str, stack_size: Option<usize>) -> Result<()> {
    if thread_name.trim().is_empty() {
        bail!("thread_name cannot be empty");
    }

    if thread_name.contains('\0') {
        bail!("thread_name must not contain NUL bytes");
    }

    if let Some(bytes) = stack_size {
        if bytes < MIN_STACK_SIZE {
            bail!("stack_size ({bytes}) must be at least {MIN_STACK_SIZE} bytes");
        }
    }

    Ok(())
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}
