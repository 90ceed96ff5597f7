//! Bounded concurrent execution of jobs. One task per job; a semaphore caps
//! how many run at once.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::{
    engine::{JobEngine, RunOutcome},
    Error, Result,
};

/// Result of one job's engine invocation.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: i64,
    pub outcome: Result<RunOutcome>,
}

/// Aggregate over a batch of [`JobReport`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    pub requeued: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl BatchSummary {
    #[must_use]
    pub fn from_reports(reports: &[JobReport]) -> Self {
        reports
            .iter()
            .fold(Self::default(), |mut acc, report| {
                match &report.outcome {
                    Ok(RunOutcome::Completed { .. }) => acc.completed += 1,
                    Ok(RunOutcome::Failed { .. } | RunOutcome::FailedWithoutRun) => acc.failed += 1,
                    Ok(RunOutcome::Requeued { .. }) => acc.requeued += 1,
                    Ok(RunOutcome::Skipped | RunOutcome::Canceled { .. }) => acc.skipped += 1,
                    Err(_) => acc.errors += 1,
                }
                acc
            })
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    engine: Arc<JobEngine>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl WorkerPool {
    /// `workers` is clamped to at least 1.
    #[must_use]
    pub fn new(engine: JobEngine, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            engine: Arc::new(engine),
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    #[must_use]
    pub fn engine(&self) -> &JobEngine {
        &self.engine
    }

    /// Run every job, at most `workers` at a time. Reports keep input order.
    pub async fn run_jobs(&self, job_ids: &[i64]) -> Vec<JobReport> {
        let handles: Vec<_> = job_ids
            .iter()
            .map(|&job_id| {
                let engine = Arc::clone(&self.engine);
                let permits = Arc::clone(&self.permits);
                tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|e| Error::Worker(e.to_string()))?;
                    engine.run_job(job_id).await
                })
            })
            .collect();

        futures::future::join_all(handles)
            .await
            .into_iter()
            .zip(job_ids)
            .map(|(joined, &job_id)| {
                let outcome = joined.unwrap_or_else(|e| Err(Error::Worker(e.to_string())));
                if let Err(err) = &outcome {
                    tracing::error!(job_id, error = %err, "job run errored");
                }
                JobReport { job_id, outcome }
            })
            .collect()
    }

    /// One pass over the queue: snapshot up to `limit` queued jobs by
    /// priority and run them. Jobs requeued during the pass wait for the next.
    pub async fn drain_queue(&self, limit: i64) -> Result<Vec<JobReport>> {
        let job_ids = self.engine.store().next_queued_jobs(limit).await?;
        if job_ids.is_empty() {
            tracing::debug!("queue empty");
            return Ok(Vec::new());
        }
        tracing::info!(jobs = job_ids.len(), workers = self.workers, "draining queue");
        let reports = self.run_jobs(&job_ids).await;
        let summary = BatchSummary::from_reports(&reports);
        tracing::info!(
            completed = summary.completed,
            failed = summary.failed,
            requeued = summary.requeued,
            skipped = summary.skipped,
            errors = summary.errors,
            "queue pass finished"
        );
        Ok(reports)
    }
}
