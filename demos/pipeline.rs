//! Fans simulated page lookups out over a `WorkerPool` and funnels the results
//! through a `SequentialQueue` that plays the role of a single writer.
//!
//! Environment knobs: `TASKPOOL_WORKERS`, `TASKPOOL_PAGES`, `RUST_LOG`.

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Context, Result};
use parking_lot::Mutex;
use taskpool::{
    init_tracing, Job, PoolConfig, SequentialConfig, SequentialQueue, TracingSink, WorkerPool,
};
use tokio_util::sync::CancellationToken;

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_PAGES: u32 = 64;
const METRICS_INTERVAL: Duration = Duration::from_millis(250);

struct DemoArgs {
    workers: usize,
    pages: u32,
}

impl DemoArgs {
    fn from_env() -> Result<Self> {
        let args = Self {
            workers: env_or("TASKPOOL_WORKERS", DEFAULT_WORKERS)?,
            pages: env_or("TASKPOOL_PAGES", DEFAULT_PAGES)?,
        };
        ensure!(args.workers > 0, "TASKPOOL_WORKERS must be at least 1");
        Ok(args)
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
struct PageRecord {
    page: u32,
    links: usize,
}

/// Stand-in for a remote lookup: slow, and occasionally failing.
fn lookup_page(page: u32) -> Result<PageRecord> {
    std::thread::sleep(Duration::from_millis(5 + u64::from(page % 7)));
    if page % 13 == 12 {
        bail!("page {page} timed out");
    }
    Ok(PageRecord {
        page,
        links: (page as usize * 31) % 17,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = DemoArgs::from_env()?;

    let pool = Arc::new(WorkerPool::with_config(
        PoolConfig::builder()
            .worker_count(args.workers)
            .thread_name("lookup")
            .build()?,
        Arc::new(TracingSink),
    )?);
    let writer = Arc::new(SequentialQueue::with_config(
        SequentialConfig::builder().thread_name("writer").build()?,
        Arc::new(TracingSink),
    )?);
    let store = Arc::new(Mutex::new(Vec::<PageRecord>::new()));

    let shutdown = CancellationToken::new();
    let pool_metrics = pool.spawn_metrics_reporter(shutdown.clone(), METRICS_INTERVAL);
    let writer_metrics = writer.spawn_metrics_reporter(shutdown.clone(), METRICS_INTERVAL);

    let started = Instant::now();
    for page in 0..args.pages {
        let writer = writer.clone();
        let store = store.clone();
        pool.submit(
            Job::with_args(
                move |page: u32| {
                    let record = lookup_page(page)?;
                    writer.push(
                        Job::new(move || {
                            store.lock().push(record);
                            Ok(())
                        })
                        .labelled(format!("store-{page}")),
                    )?;
                    Ok(())
                },
                page,
            )
            .labelled(format!("lookup-{page}")),
        )?;
    }

    // Grow the pool while the backlog is deep, then shrink it back.
    pool.increment(args.workers)?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let released = pool.decrement(args.workers)?;
    tracing::info!(released, "extra lookup workers released");

    let joiner = {
        let pool = pool.clone();
        let writer = writer.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            pool.join()?;
            writer.join()?;
            Ok(())
        })
    };
    joiner.await??;

    shutdown.cancel();
    pool_metrics.await?;
    writer_metrics.await?;

    let store = store.lock();
    let total_links: usize = store.iter().map(|record| record.links).sum();
    let pool_stats = pool.telemetry().snapshot();
    let writer_stats = writer.telemetry().snapshot();
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        stored = store.len(),
        failed_lookups = pool_stats.jobs_failed,
        writes = writer_stats.jobs_completed,
        total_links,
        first_page = store.first().map(|record| record.page),
        "pipeline finished"
    );
    Ok(())
}
