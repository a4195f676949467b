use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use crate::support::helpers::{init_tracing, wait_until, Counter, SharedLog, WAIT_TIMEOUT};
use anyhow::{bail, Result};
use parking_lot::Mutex;
use taskpool::{Job, QueueError, QueueState, SequentialConfig, SequentialQueue, TracingSink};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[test]
fn three_callers_append_in_submission_order() -> Result<()> {
    init_tracing();
    let queue = Arc::new(SequentialQueue::new()?);
    let log = SharedLog::new();

    for entry in ["A", "B", "C"] {
        let queue = queue.clone();
        let appender = log.appender(entry);
        let caller = thread::spawn(move || queue.dispatch(appender));
        match caller.join() {
            Ok(outcome) => outcome?,
            Err(_) => bail!("caller thread panicked"),
        }
    }
    queue.join()?;

    assert_eq!(log.snapshot(), vec!["A", "B", "C"]);
    Ok(())
}

#[test]
fn concurrent_callers_see_jobs_run_in_submission_order() -> Result<()> {
    init_tracing();
    const CALLERS: usize = 4;
    const PER_CALLER: usize = 200;

    let queue = Arc::new(SequentialQueue::new()?);
    let executed = SharedLog::new();
    // Pushing while holding this lock fixes the submission order we compare against.
    let submitted = Arc::new(Mutex::new(Vec::new()));

    let callers: Vec<_> = (0..CALLERS)
        .map(|caller| {
            let queue = queue.clone();
            let executed = executed.clone();
            let submitted = submitted.clone();
            thread::spawn(move || -> Result<()> {
                for seq in 0..PER_CALLER {
                    let id = (caller, seq);
                    let mut order = submitted.lock();
                    queue.dispatch(executed.appender(id))?;
                    order.push(id);
                }
                Ok(())
            })
        })
        .collect();
    for handle in callers {
        match handle.join() {
            Ok(outcome) => outcome?,
            Err(_) => bail!("caller thread panicked"),
        }
    }
    queue.join()?;

    let executed = executed.snapshot();
    assert_eq!(executed.len(), CALLERS * PER_CALLER);
    assert_eq!(executed, *submitted.lock());
    Ok(())
}

#[test]
fn terminate_hands_back_the_quick_jobs_behind_a_slow_one() -> Result<()> {
    init_tracing();
    let queue = SequentialQueue::new()?;
    let log = SharedLog::new();
    let (started_tx, started_rx) = mpsc::channel();

    let slow = log.appender("slow");
    queue.push(
        Job::new(move || {
            let _ = started_tx.send(());
            thread::sleep(Duration::from_millis(100));
            slow()
        })
        .labelled("slow"),
    )?;
    queue.push(Job::new(log.appender("quick-1")).labelled("quick-1"))?;
    queue.push(Job::new(log.appender("quick-2")).labelled("quick-2"))?;

    started_rx.recv_timeout(WAIT_TIMEOUT)?;
    let returned = queue.terminate();

    let labels: Vec<_> = returned.iter().filter_map(Job::label).collect();
    assert_eq!(labels, vec!["quick-1", "quick-2"]);
    assert!(queue.is_stopping());

    queue.join()?;
    assert_eq!(log.snapshot(), vec!["slow"], "slow job completes, quick jobs never run");
    assert_eq!(queue.state(), QueueState::Terminated);
    assert!(queue.is_stopped());

    // Returned jobs belong to the caller, who may still run them.
    for job in returned {
        job.run()?;
    }
    assert_eq!(log.snapshot(), vec!["slow", "quick-1", "quick-2"]);
    Ok(())
}

#[test]
fn push_after_stop_is_always_sealed() -> Result<()> {
    init_tracing();
    let queue = SequentialQueue::new()?;
    let counter = Counter::default();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    queue.dispatch(move || {
        let _ = release_rx.recv_timeout(WAIT_TIMEOUT);
        Ok(())
    })?;
    queue.stop();

    for _ in 0..10 {
        match queue.dispatch(counter.incrementer()) {
            Err(QueueError::Sealed) => {}
            other => bail!("expected a sealed rejection, got {other:?}"),
        }
    }

    release_tx.send(())?;
    queue.join()?;
    assert_eq!(counter.get(), 0);
    Ok(())
}

#[test]
fn join_runs_everything_queued_before_it() -> Result<()> {
    init_tracing();
    let queue = SequentialQueue::new()?;
    let counter = Counter::default();

    for _ in 0..50 {
        let increment = counter.incrementer();
        queue.dispatch(move || {
            thread::sleep(Duration::from_millis(1));
            increment()
        })?;
    }
    queue.join()?;

    assert_eq!(counter.get(), 50);
    assert!(!queue.is_running());
    assert!(!queue.is_stopping());
    assert!(queue.is_stopped());
    Ok(())
}

#[test]
fn restart_after_terminate_never_replays_returned_jobs() -> Result<()> {
    init_tracing();
    let config = SequentialConfig::builder()
        .thread_name("writer")
        .autostart(false)
        .build()?;
    let queue = SequentialQueue::with_config(config, Arc::new(TracingSink))?;
    let log = SharedLog::new();

    queue.dispatch(log.appender(1))?;
    queue.dispatch(log.appender(2))?;
    assert_eq!(queue.state(), QueueState::Stopped);

    let returned = queue.terminate();
    assert_eq!(returned.len(), 2);
    assert!(matches!(
        queue.dispatch(log.appender(3)),
        Err(QueueError::Terminated)
    ));

    queue.start()?;
    assert!(queue.is_running());
    queue.dispatch(log.appender(4))?;
    queue.join()?;

    assert_eq!(log.snapshot(), vec![4]);
    Ok(())
}

#[test]
fn repeated_runs_keep_their_own_order() -> Result<()> {
    init_tracing();
    let queue = SequentialQueue::new()?;
    let log = SharedLog::new();

    for run in 0..3 {
        for seq in 0..20 {
            queue.dispatch(log.appender(run * 100 + seq))?;
        }
        queue.start()?;
    }
    queue.join()?;

    let expected: Vec<_> = (0..3)
        .flat_map(|run| (0..20).map(move |seq| run * 100 + seq))
        .collect();
    assert_eq!(log.snapshot(), expected);
    Ok(())
}

#[test]
fn drop_lets_a_running_queue_finish_in_the_background() -> Result<()> {
    init_tracing();
    let queue = SequentialQueue::new()?;
    let counter = Counter::default();
    for _ in 0..25 {
        queue.dispatch(counter.incrementer())?;
    }
    drop(queue);

    assert!(wait_until(WAIT_TIMEOUT, || counter.get() == 25));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metrics_reporter_observes_the_sequential_queue() -> Result<()> {
    init_tracing();
    let queue = SequentialQueue::new()?;
    let shutdown = CancellationToken::new();
    let reporter = queue.spawn_metrics_reporter(shutdown.clone(), Duration::from_millis(10));

    let counter = Counter::default();
    for _ in 0..10 {
        queue.dispatch(counter.incrementer())?;
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown.cancel();
    timeout(Duration::from_secs(1), reporter).await??;

    let telemetry = queue.telemetry();
    tokio::task::spawn_blocking(move || queue.join()).await??;
    assert_eq!(counter.get(), 10);
    assert_eq!(telemetry.snapshot().jobs_completed, 10);
    Ok(())
}
