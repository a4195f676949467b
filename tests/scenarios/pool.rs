use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use crate::support::helpers::{
    init_tracing, wait_for_live_workers, Counter, SharedLog, WAIT_TIMEOUT,
};
use anyhow::{bail, Result};
use taskpool::{CollectingSink, Job, PoolConfig, PoolError, WorkerPool};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[test]
fn two_workers_run_a_thousand_increments() -> Result<()> {
    init_tracing();
    let pool = WorkerPool::new(2)?;
    let counter = Counter::default();

    for _ in 0..1000 {
        pool.dispatch(counter.incrementer())?;
    }
    pool.join()?;

    assert_eq!(counter.get(), 1000);
    assert_eq!(pool.live_workers(), 0);
    assert_eq!(pool.worker_count(), 0);
    Ok(())
}

#[test]
fn new_pool_has_exactly_the_requested_workers() -> Result<()> {
    init_tracing();
    for workers in 0..=8 {
        let pool = WorkerPool::new(workers)?;
        assert_eq!(pool.worker_count(), workers);
        assert_eq!(pool.live_workers(), workers);
        pool.join()?;
    }
    Ok(())
}

#[test]
fn increment_then_decrement_restores_the_worker_count() -> Result<()> {
    init_tracing();
    for (workers, extra) in [(0, 0), (1, 1), (3, 2), (2, 5)] {
        let pool = WorkerPool::new(workers)?;

        pool.increment(extra)?;
        assert_eq!(pool.worker_count(), workers + extra);

        let released = pool.decrement(extra)?;
        assert_eq!(released, extra);
        assert_eq!(pool.worker_count(), workers);
        wait_for_live_workers(&pool, workers)?;

        pool.join()?;
    }
    Ok(())
}

#[test]
fn every_job_runs_exactly_once_with_concurrent_dispatchers() -> Result<()> {
    init_tracing();
    const DISPATCHERS: usize = 4;
    const PER_DISPATCHER: usize = 250;

    for workers in [1, 3, 8] {
        let pool = Arc::new(WorkerPool::new(workers)?);
        let log = SharedLog::new();

        let dispatchers: Vec<_> = (0..DISPATCHERS)
            .map(|dispatcher| {
                let pool = pool.clone();
                let log = log.clone();
                thread::spawn(move || -> Result<()> {
                    for seq in 0..PER_DISPATCHER {
                        pool.dispatch(log.appender(dispatcher * PER_DISPATCHER + seq))?;
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in dispatchers {
            match handle.join() {
                Ok(outcome) => outcome?,
                Err(_) => bail!("dispatcher thread panicked"),
            }
        }

        pool.join()?;

        let mut executed = log.snapshot();
        executed.sort_unstable();
        assert_eq!(executed, (0..DISPATCHERS * PER_DISPATCHER).collect::<Vec<_>>());
    }
    Ok(())
}

#[test]
fn single_worker_dequeues_in_dispatch_order() -> Result<()> {
    init_tracing();
    let pool = WorkerPool::new(1)?;
    let log = SharedLog::new();

    for value in 0..200 {
        pool.dispatch(log.appender(value))?;
    }
    pool.join()?;

    assert_eq!(log.snapshot(), (0..200).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn join_finishes_slow_work_queued_before_it() -> Result<()> {
    init_tracing();
    let pool = WorkerPool::new(2)?;
    let counter = Counter::default();

    for _ in 0..6 {
        let increment = counter.incrementer();
        pool.dispatch(move || {
            thread::sleep(Duration::from_millis(20));
            increment()
        })?;
    }
    pool.join()?;

    assert_eq!(counter.get(), 6);
    Ok(())
}

#[test]
fn resizing_while_jobs_are_in_flight_keeps_the_aggregate_count() -> Result<()> {
    init_tracing();
    let pool = WorkerPool::new(4)?;
    let counter = Counter::default();

    for round in 0..5 {
        for _ in 0..50 {
            let increment = counter.incrementer();
            pool.dispatch(move || {
                thread::sleep(Duration::from_micros(200));
                increment()
            })?;
        }
        if round % 2 == 0 {
            pool.increment(2)?;
        } else {
            pool.decrement(3)?;
        }
    }

    // 4 + 2 - 3 + 2 - 3 + 2
    assert_eq!(pool.worker_count(), 4);
    wait_for_live_workers(&pool, 4)?;

    pool.join()?;
    assert_eq!(counter.get(), 250);
    Ok(())
}

#[test]
fn concurrent_joins_all_return_after_queued_work() -> Result<()> {
    init_tracing();
    let pool = Arc::new(WorkerPool::new(2)?);
    let counter = Counter::default();

    for _ in 0..100 {
        let increment = counter.incrementer();
        pool.dispatch(move || {
            thread::sleep(Duration::from_micros(500));
            increment()
        })?;
    }

    let joiners: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || pool.join())
        })
        .collect();
    for joiner in joiners {
        match joiner.join() {
            Ok(outcome) => outcome?,
            Err(_) => bail!("joiner thread panicked"),
        }
    }

    assert_eq!(counter.get(), 100);
    assert_eq!(pool.live_workers(), 0);
    assert!(pool.is_joined());
    Ok(())
}

#[test]
fn work_dispatched_to_an_empty_pool_runs_on_join() -> Result<()> {
    init_tracing();
    let pool = WorkerPool::new(0)?;
    let log = SharedLog::new();

    pool.dispatch(log.appender("first"))?;
    pool.dispatch(log.appender("second"))?;
    thread::sleep(Duration::from_millis(20));
    assert_eq!(log.len(), 0, "nobody is there to run it yet");

    pool.join()?;
    assert_eq!(log.snapshot(), vec!["first", "second"]);
    Ok(())
}

#[test]
fn failing_jobs_reach_the_sink_and_spare_the_pool() -> Result<()> {
    init_tracing();
    let sink = Arc::new(CollectingSink::new());
    let config = PoolConfig::builder()
        .worker_count(2)
        .thread_name("lookup")
        .build()?;
    let pool = WorkerPool::with_config(config, sink.clone())?;
    let counter = Counter::default();

    for page in 0..10 {
        pool.submit(
            Job::with_args(
                |page: u32| {
                    if page % 2 == 0 {
                        bail!("page {page} not found");
                    }
                    Ok(())
                },
                page,
            )
            .labelled(format!("page-{page}")),
        )?;
        pool.dispatch(counter.incrementer())?;
    }
    pool.dispatch(|| panic!("author lookup crashed"))?;

    assert!(sink.wait_for(6, WAIT_TIMEOUT));
    pool.join()?;

    assert_eq!(counter.get(), 10);
    let failures = sink.take();
    assert_eq!(failures.len(), 6);
    assert_eq!(failures.iter().filter(|failure| failure.is_panic()).count(), 1);
    assert!(failures
        .iter()
        .all(|failure| failure.worker().starts_with("lookup-")));

    let snapshot = pool.telemetry().snapshot();
    assert_eq!(snapshot.jobs_dispatched, 21);
    assert_eq!(snapshot.jobs_failed, 6);
    assert_eq!(snapshot.jobs_completed, 15);
    assert_eq!(snapshot.jobs_outstanding(), 0);
    Ok(())
}

#[test]
fn a_joined_pool_refuses_further_use() -> Result<()> {
    init_tracing();
    let pool = WorkerPool::new(1)?;
    pool.join()?;

    assert!(matches!(pool.dispatch(|| Ok(())), Err(PoolError::Joined)));
    assert!(matches!(pool.increment(2), Err(PoolError::Joined)));
    assert!(matches!(pool.decrement(1), Err(PoolError::Joined)));
    pool.join()?;
    Ok(())
}

#[test]
fn jobs_may_resize_their_own_pool() -> Result<()> {
    init_tracing();
    let pool = Arc::new(WorkerPool::new(1)?);
    let (tx, rx) = mpsc::channel();

    let inner = pool.clone();
    pool.dispatch(move || {
        inner.increment(2)?;
        let _ = tx.send(inner.worker_count());
        Ok(())
    })?;

    let seen = rx.recv_timeout(WAIT_TIMEOUT)?;
    assert_eq!(seen, 3);
    wait_for_live_workers(&pool, 3)?;
    pool.join()?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metrics_reporter_stops_on_cancellation() -> Result<()> {
    init_tracing();
    let pool = WorkerPool::new(2)?;
    let shutdown = CancellationToken::new();
    let reporter = pool.spawn_metrics_reporter(shutdown.clone(), Duration::from_millis(10));

    let counter = Counter::default();
    for _ in 0..20 {
        pool.dispatch(counter.incrementer())?;
    }
    tokio::time::sleep(Duration::from_millis(40)).await;

    shutdown.cancel();
    timeout(Duration::from_secs(1), reporter).await??;

    tokio::task::spawn_blocking(move || pool.join()).await??;
    assert_eq!(counter.get(), 20);
    Ok(())
}
