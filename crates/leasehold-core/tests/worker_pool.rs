//! Bounded concurrent execution through `WorkerPool`.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::time::Duration;

use common::{fast_config, FakeDispatcher, Harness};
use leasehold_core::{domain::NewJob, BatchSummary, Error, JobStatus, RunOutcome, WorkerPool};

#[tokio::test]
async fn run_jobs_keeps_input_order() -> Result<(), Error> {
    let h = Harness::new().await?;
    let mut ids = Vec::new();
    for profile in [31, 32, 33] {
        ids.push(h.store().create_job(&NewJob::new(profile, "batch clip")).await?);
    }

    let pool = WorkerPool::new(h.engine.clone(), 2);
    assert_eq!(pool.workers(), 2);
    let reports = pool.run_jobs(&ids).await;

    assert_eq!(reports.iter().map(|r| r.job_id).collect::<Vec<_>>(), ids);
    let summary = BatchSummary::from_reports(&reports);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.errors, 0);
    Ok(())
}

#[tokio::test]
async fn same_profile_in_parallel_requeues_the_loser() -> Result<(), Error> {
    let h = Harness::new().await?;
    h.workflows.delay_submits(Duration::from_millis(300));
    let first = h.store().create_job(&NewJob::new(40, "twin a")).await?;
    let second = h.store().create_job(&NewJob::new(40, "twin b")).await?;

    let pool = WorkerPool::new(h.engine.clone(), 2);
    let reports = pool.run_jobs(&[first, second]).await;
    let summary = BatchSummary::from_reports(&reports);
    assert_eq!(summary.completed, 1, "{reports:?}");
    assert_eq!(summary.requeued, 1, "{reports:?}");

    let loser = reports
        .iter()
        .find(|r| matches!(r.outcome, Ok(RunOutcome::Requeued { .. })))
        .unwrap();
    let job = h.store().require_job(loser.job_id).await?;
    assert_eq!(job.status, JobStatus::Queued);

    // The requeued job is picked up on the next pass.
    let next = pool.drain_queue(10).await?;
    assert_eq!(next.len(), 1);
    assert!(matches!(next[0].outcome, Ok(RunOutcome::Completed { .. })));
    Ok(())
}

#[tokio::test]
async fn drain_queue_runs_by_priority_and_skips_finished() -> Result<(), Error> {
    let h = Harness::with(fast_config(), FakeDispatcher::default()).await?;
    let low = h
        .store()
        .create_job(&NewJob::new(50, "later").with_priority(200))
        .await?;
    let high = h
        .store()
        .create_job(&NewJob::new(51, "sooner").with_priority(10))
        .await?;
    let canceled = h.store().create_job(&NewJob::new(52, "never")).await?;
    h.store().cancel_job(canceled).await?;

    let pool = WorkerPool::new(h.engine.clone(), 1);
    let reports = pool.drain_queue(10).await?;
    assert_eq!(
        reports.iter().map(|r| r.job_id).collect::<Vec<_>>(),
        vec![high, low]
    );
    assert!(pool.drain_queue(10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_job_is_reported_not_panicked() -> Result<(), Error> {
    let h = Harness::new().await?;
    let pool = WorkerPool::new(h.engine.clone(), 0);
    assert_eq!(pool.workers(), 1);

    let reports = pool.run_jobs(&[777]).await;
    assert!(matches!(reports[0].outcome, Err(Error::NotFound(_))));
    assert_eq!(BatchSummary::from_reports(&reports).errors, 1);
    Ok(())
}
