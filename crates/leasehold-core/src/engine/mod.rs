//! The job engine: one run of one job through the phase loop.
//!
//! `run_job` creates a run, claims the profile lease, drives
//! submit → progress → publish → watermark with per-phase retries, and
//! always stops the heartbeat, releases the lease and closes the session.

pub mod classifier;
pub mod heartbeat;
mod overload;
pub mod phases;
pub mod retry_policy;
pub mod state_machine;

use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{watch, Mutex};

use self::{
    classifier::{Classification, ErrorClass, ErrorClassifier, RecoverAction},
    heartbeat::Heartbeat,
    phases::is_overload_error,
    retry_policy::RetryPolicy,
    state_machine::{Phase, StateMachine},
};
use crate::{
    config::{EngineConfig, HeartbeatPolicy},
    domain::{
        AttemptOutcome, Job, JobPatch, JobStatus, NewPhaseAttempt, NewRun, NewTimelineEvent,
        RunPatch, RunStatus, TimelineEventType,
    },
    lease::{ProfileActorScheduler, ProfileRegistry},
    session::{
        AutomationDriver, BrowserSessionLease, RecoveryObserver, SafePageOps, SharedSession,
    },
    store::JobStore,
    workflows::{AccountDispatcher, Workflows},
    Error, Result,
};

const REQUEUE_MESSAGE: &str = "profile is occupied, job requeued";

/// How one `run_job` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The job was already canceled. No run was created.
    Skipped,
    /// The job had no usable profile and was failed without a run.
    FailedWithoutRun,
    /// Another run holds the profile lease. The job is queued again.
    Requeued { run_id: i64 },
    Completed { run_id: i64 },
    Failed { run_id: i64, error_class: ErrorClass },
    /// Canceled by an operator while running. The job keeps its canceled status.
    Canceled { run_id: i64 },
}

/// Per-run identity shared by the loop, phases and recovery hooks.
#[derive(Debug)]
pub(crate) struct RunContext {
    pub job_id: i64,
    pub run_id: i64,
    pub profile_id: i64,
    pub started: tokio::time::Instant,
    /// Heartbeat loss flag. `None` until the lease is held, and under the lenient policy.
    pub lease_lost: Option<watch::Receiver<bool>>,
}

impl RunContext {
    /// Fail with [`Error::LeaseLost`] once the heartbeat saw another owner.
    pub(crate) fn ensure_lease(&self) -> Result<()> {
        match &self.lease_lost {
            Some(lost) if *lost.borrow() => Err(Error::LeaseLost {
                profile_id: self.profile_id,
                run_id: self.run_id,
            }),
            _ => Ok(()),
        }
    }
}

/// Artifacts gathered while the run advances.
#[derive(Debug, Default)]
pub(crate) struct Artifacts {
    pub task_id: Option<String>,
    pub access_token: Option<String>,
    pub generation_id: Option<String>,
    pub publish_url: Option<String>,
    pub progress: i64,
}

impl Artifacts {
    fn resume(job: &Job, start: Phase) -> Self {
        Self {
            task_id: job.task_id.clone(),
            access_token: None,
            generation_id: job.generation_id.clone(),
            publish_url: job.publish_url.clone(),
            progress: if start == Phase::Submit {
                0
            } else {
                job.progress_pct
            },
        }
    }
}

/// Persists recovery bookkeeping on the job.
struct RecoveryRecorder {
    store: JobStore,
    job_id: i64,
    phase_retry_count: AtomicI64,
}

impl RecoveryRecorder {
    fn count(&self) -> i64 {
        self.phase_retry_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RecoveryObserver for RecoveryRecorder {
    async fn on_recover(
        &self,
        operation: &'static str,
        classification: &Classification,
        attempt: u32,
    ) -> Result<()> {
        let count = self.phase_retry_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            job_id = self.job_id,
            operation,
            attempt,
            phase_retry_count = count,
            "recovery recorded"
        );
        self.store
            .update_job(
                self.job_id,
                &JobPatch {
                    phase_retry_count: Some(count),
                    last_recover_action: Some(Some(classification.recover_action)),
                    last_error_class: Some(Some(classification.error_class)),
                    ..JobPatch::default()
                },
            )
            .await
    }
}

/// Orchestrator. Cheap to clone; share one per process.
#[derive(Clone)]
pub struct JobEngine {
    store: JobStore,
    registry: ProfileRegistry,
    scheduler: ProfileActorScheduler,
    driver: Arc<dyn AutomationDriver>,
    workflows: Arc<dyn Workflows>,
    dispatcher: Arc<dyn AccountDispatcher>,
    config: Arc<EngineConfig>,
    classifier: ErrorClassifier,
    policy: RetryPolicy,
    machine: StateMachine,
}

impl std::fmt::Debug for JobEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JobEngine {
    pub fn new(
        store: JobStore,
        driver: Arc<dyn AutomationDriver>,
        workflows: Arc<dyn Workflows>,
        dispatcher: Arc<dyn AccountDispatcher>,
        config: EngineConfig,
    ) -> Self {
        let registry = ProfileRegistry::new(store.pool().clone());
        Self {
            scheduler: ProfileActorScheduler::new(store.clone(), registry.clone()),
            store,
            registry,
            driver,
            workflows,
            dispatcher,
            config: Arc::new(config),
            classifier: ErrorClassifier::new(),
            policy: RetryPolicy::new(),
            machine: StateMachine::new(),
        }
    }

    #[must_use]
    pub const fn store(&self) -> &JobStore {
        &self.store
    }

    #[must_use]
    pub const fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drive `job_id` through its remaining phases.
    ///
    /// Lease contention and phase failures are outcomes, not errors. `Err`
    /// means the job is missing or the store failed.
    pub async fn run_job(&self, job_id: i64) -> Result<RunOutcome> {
        let job = self.store.require_job(job_id).await?;
        if job.status == JobStatus::Canceled {
            tracing::info!(job_id, "job already canceled, skipping");
            return Ok(RunOutcome::Skipped);
        }
        if job.profile_id <= 0 {
            if self.fail_without_run(&job, "missing profile id").await? {
                return Ok(RunOutcome::FailedWithoutRun);
            }
            return Ok(RunOutcome::Skipped);
        }

        let actor = self.scheduler.context(job.profile_id, job.id).await?;
        let start_phase = Self::resume_phase(&job);
        let run_id = self
            .store
            .create_run(&NewRun {
                job_id,
                profile_id: job.profile_id,
                actor_id: actor.actor_id.clone(),
                phase: start_phase,
                attempt: job.run_attempt.max(1),
            })
            .await?;
        let mut ctx = RunContext {
            job_id,
            run_id,
            profile_id: job.profile_id,
            started: tokio::time::Instant::now(),
            lease_lost: None,
        };

        let claimed = self
            .store
            .update_job_unless(
                job_id,
                &JobPatch {
                    status: Some(JobStatus::Running),
                    phase: Some(start_phase),
                    error: Some(None),
                    actor_id: Some(Some(actor.actor_id.clone())),
                    last_run_id: Some(Some(run_id)),
                    last_error_class: Some(None),
                    last_recover_action: Some(None),
                    started_at: job.started_at.is_none().then(|| Some(Utc::now())),
                    ..JobPatch::default()
                },
                &[JobStatus::Canceled],
            )
            .await?;
        if !claimed {
            return self
                .finish_overtaken(&ctx, start_phase, Counters::from_job(&job))
                .await;
        }
        self.store
            .append_timeline(
                &NewTimelineEvent::new(job_id, Some(run_id), TimelineEventType::RunStarted)
                    .in_phase(start_phase)
                    .with_statuses(job.status.as_str(), JobStatus::Running.as_str())
                    .with_payload(json!({
                        "actor_id": actor.actor_id,
                        "queue_position": actor.queue_position,
                        "lock_state": actor.lock_state,
                    })),
            )
            .await?;
        tracing::info!(
            job_id,
            run_id,
            profile_id = job.profile_id,
            actor_id = %actor.actor_id,
            phase = %start_phase,
            "run started"
        );

        let acquired = self
            .registry
            .acquire(
                job.profile_id,
                run_id,
                &actor.actor_id,
                job.priority,
                self.config.lease.lease_seconds,
            )
            .await?;
        if !acquired {
            if self.requeue_for_profile_lock(&job, run_id).await? {
                return Ok(RunOutcome::Requeued { run_id });
            }
            return self
                .finish_overtaken(&ctx, start_phase, Counters::from_job(&job))
                .await;
        }

        let heartbeat = Heartbeat::spawn(
            self.registry.clone(),
            job.profile_id,
            run_id,
            self.config.lease.lease_seconds,
            Duration::from_secs(self.config.lease.heartbeat_interval_seconds),
        );
        let session: SharedSession = Arc::new(Mutex::new(BrowserSessionLease::new(
            Arc::clone(&self.driver),
            self.registry.clone(),
            job.profile_id,
            run_id,
        )));
        if self.config.lease.heartbeat_policy == HeartbeatPolicy::Strict {
            ctx.lease_lost = Some(heartbeat.lost_signal());
        }

        let outcome = self.execute_run(&job, &ctx, start_phase, &session).await;

        heartbeat.stop().await;
        match self.registry.release(ctx.profile_id, run_id).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(profile_id = ctx.profile_id, run_id, "lease already gone"),
            Err(err) => tracing::warn!(
                profile_id = ctx.profile_id,
                run_id,
                error = %err,
                "lease release failed"
            ),
        }
        if let Err(err) = session.lock().await.close(run_id).await {
            tracing::warn!(profile_id = ctx.profile_id, run_id, error = %err, "session close failed");
        }

        outcome
    }

    /// Resume at progress, publish or watermark when the job already holds
    /// that phase's input. Otherwise start at submit.
    fn resume_phase(job: &Job) -> Phase {
        match job.phase {
            Phase::Progress if job.task_id.is_some() => Phase::Progress,
            Phase::Publish if job.generation_id.is_some() => Phase::Publish,
            Phase::Watermark if job.publish_url.is_some() => Phase::Watermark,
            _ => Phase::Submit,
        }
    }

    async fn execute_run(
        &self,
        job: &Job,
        ctx: &RunContext,
        start: Phase,
        session: &SharedSession,
    ) -> Result<RunOutcome> {
        let (phase_tx, _phase_rx) = watch::channel(start);
        let recorder = Arc::new(RecoveryRecorder {
            store: self.store.clone(),
            job_id: ctx.job_id,
            phase_retry_count: AtomicI64::new(job.phase_retry_count),
        });

        let result = self
            .drive(job, ctx, start, &phase_tx, session, &recorder)
            .await;

        let counters = Counters {
            session_reconnect_count: job.session_reconnect_count
                + session.lock().await.reconnect_count(),
            phase_retry_count: recorder.count(),
        };
        let phase = *phase_tx.borrow();

        // A `false`/`None` finish means a cancel (or another writer) made the
        // job terminal first; its status stays as written.
        match result {
            Ok(()) => {
                if self.finish_completed(ctx, counters).await? {
                    return Ok(RunOutcome::Completed { run_id: ctx.run_id });
                }
                self.finish_overtaken(ctx, phase, counters).await
            }
            Err(Error::Canceled) => self.finish_overtaken(ctx, phase, counters).await,
            Err(err) => {
                let Some(error_class) = self.finish_failed(ctx, phase, &err, counters).await? else {
                    return self.finish_overtaken(ctx, phase, counters).await;
                };
                if phase == Phase::Submit && is_overload_error(&err.to_string()) {
                    if let Err(spawn_err) = self.spawn_overload_sibling(job, Some(ctx.run_id)).await {
                        tracing::warn!(
                            job_id = ctx.job_id,
                            error = %spawn_err,
                            "overload sibling spawn failed"
                        );
                    }
                }
                Ok(RunOutcome::Failed {
                    run_id: ctx.run_id,
                    error_class,
                })
            }
        }
    }

    async fn drive(
        &self,
        job: &Job,
        ctx: &RunContext,
        start: Phase,
        phase_tx: &watch::Sender<Phase>,
        session: &SharedSession,
        recorder: &Arc<RecoveryRecorder>,
    ) -> Result<()> {
        session.lock().await.start().await?;

        let observer: Arc<dyn RecoveryObserver> = Arc::clone(recorder) as Arc<dyn RecoveryObserver>;
        let page = SafePageOps::new(Arc::clone(session), phase_tx.subscribe()).with_observer(observer);
        let mut artifacts = Artifacts::resume(job, start);
        let mut current = start;

        while !current.is_terminal() {
            if self.store.is_canceled(ctx.job_id).await? {
                return Err(Error::Canceled);
            }
            ctx.ensure_lease()?;

            phase_tx.send_replace(current);
            self.set_phase(ctx, current).await?;
            current = self
                .execute_phase_with_retry(ctx, current, &page, session, &mut artifacts, recorder)
                .await?;
        }
        Ok(())
    }

    /// Persist the phase about to run. A job that turned terminal since the
    /// boundary check stops the loop as canceled.
    async fn set_phase(&self, ctx: &RunContext, phase: Phase) -> Result<()> {
        let written = self
            .store
            .update_active_job(
                ctx.job_id,
                &JobPatch {
                    status: Some(JobStatus::Running),
                    phase: Some(phase),
                    ..JobPatch::default()
                },
            )
            .await?;
        if !written {
            return Err(Error::Canceled);
        }
        self.store
            .update_run(
                ctx.run_id,
                &RunPatch {
                    status: Some(RunStatus::Running),
                    phase: Some(phase),
                    ..RunPatch::default()
                },
            )
            .await?;
        self.store
            .append_timeline(
                &NewTimelineEvent::new(ctx.job_id, Some(ctx.run_id), TimelineEventType::PhaseTransition)
                    .in_phase(phase),
            )
            .await?;
        Ok(())
    }

    /// Run `phase` until it succeeds or the retry policy gives up. Every
    /// attempt is recorded; the returned next phase is validated.
    async fn execute_phase_with_retry(
        &self,
        ctx: &RunContext,
        phase: Phase,
        page: &SafePageOps,
        session: &SharedSession,
        artifacts: &mut Artifacts,
        recorder: &RecoveryRecorder,
    ) -> Result<Phase> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let started_at = Utc::now();
            match self.run_phase(ctx, phase, page, artifacts).await {
                Ok(next) => {
                    self.store
                        .append_phase_attempt(&NewPhaseAttempt {
                            run_id: ctx.run_id,
                            phase,
                            attempt: i64::from(attempt),
                            outcome: AttemptOutcome::Success,
                            recover_action: None,
                            detail: json!({ "next_phase": next.as_str() }),
                            started_at,
                        })
                        .await?;
                    self.machine.assert_phase_transition(phase, next)?;
                    return Ok(next);
                }
                Err(err) => {
                    let classification = self.classifier.classify(&err);
                    let decision = self.policy.should_retry(phase, &classification, attempt);
                    self.store
                        .append_phase_attempt(&NewPhaseAttempt {
                            run_id: ctx.run_id,
                            phase,
                            attempt: i64::from(attempt),
                            outcome: AttemptOutcome::Failed,
                            recover_action: Some(classification.recover_action),
                            detail: json!({
                                "error_class": classification.error_class.as_ref(),
                                "recover_action": classification.recover_action.as_ref(),
                                "error": err.to_string(),
                                "retry": decision.retry,
                            }),
                            started_at,
                        })
                        .await?;
                    tracing::warn!(
                        job_id = ctx.job_id,
                        run_id = ctx.run_id,
                        phase = %phase,
                        attempt,
                        error_class = %classification.error_class,
                        recover_action = %classification.recover_action,
                        retry = decision.retry,
                        error = %err,
                        "phase attempt failed"
                    );
                    if !decision.retry {
                        return Err(err);
                    }

                    if let Err(hook_err) = recorder.on_recover("phase", &classification, attempt).await {
                        tracing::debug!(job_id = ctx.job_id, error = %hook_err, "recover hook failed");
                    }
                    match classification.recover_action {
                        RecoverAction::PageRecreate => {
                            session.lock().await.recreate_page().await?;
                        }
                        RecoverAction::SessionReconnect => {
                            session.lock().await.reconnect().await?;
                        }
                        RecoverAction::SleepRetry | RecoverAction::Abort => {}
                    }
                    if decision.backoff_seconds > 0.0 {
                        tokio::time::sleep(decision.backoff()).await;
                    }
                }
            }
        }
    }

    /// Returns `false` when the job turned terminal before it could be queued again.
    async fn requeue_for_profile_lock(&self, job: &Job, run_id: i64) -> Result<bool> {
        let requeued = self
            .store
            .update_active_job(
                job.id,
                &JobPatch {
                    status: Some(JobStatus::Queued),
                    phase: Some(Phase::Queue),
                    error: Some(None),
                    last_error_class: Some(Some(ErrorClass::ProfilePreempted)),
                    last_recover_action: Some(Some(RecoverAction::Abort)),
                    ..JobPatch::default()
                },
            )
            .await?;
        if !requeued {
            return Ok(false);
        }
        self.store
            .update_run(
                run_id,
                &RunPatch {
                    status: Some(RunStatus::Failed),
                    phase: Some(Phase::Submit),
                    error_class: Some(Some(ErrorClass::ProfilePreempted)),
                    error_code: Some(None),
                    error_message: Some(Some(REQUEUE_MESSAGE.to_string())),
                    finished_at: Some(Some(Utc::now())),
                    ..RunPatch::default()
                },
            )
            .await?;
        self.store
            .append_timeline(
                &NewTimelineEvent::new(job.id, Some(run_id), TimelineEventType::ProfilePreempted)
                    .in_phase(Phase::Submit)
                    .with_statuses(JobStatus::Running.as_str(), JobStatus::Queued.as_str())
                    .with_payload(json!({ "profile_id": job.profile_id })),
            )
            .await?;
        tracing::info!(
            job_id = job.id,
            run_id,
            profile_id = job.profile_id,
            "profile locked by another run, job requeued"
        );
        Ok(true)
    }

    /// Returns `false` when a cancel landed first.
    async fn fail_without_run(&self, job: &Job, message: &str) -> Result<bool> {
        let written = self
            .store
            .update_job_unless(
                job.id,
                &JobPatch {
                    status: Some(JobStatus::Failed),
                    phase: Some(Phase::Failed),
                    error: Some(Some(message.to_string())),
                    last_error_class: Some(Some(ErrorClass::ProfilePreempted)),
                    last_recover_action: Some(Some(RecoverAction::Abort)),
                    finished_at: Some(Some(Utc::now())),
                    ..JobPatch::default()
                },
                &[JobStatus::Canceled],
            )
            .await?;
        if !written {
            return Ok(false);
        }
        self.store
            .append_timeline(
                &NewTimelineEvent::new(job.id, None, TimelineEventType::RunFailed)
                    .with_statuses(job.status.as_str(), JobStatus::Failed.as_str())
                    .with_payload(json!({
                        "error_class": ErrorClass::ProfilePreempted.as_ref(),
                        "recover_action": RecoverAction::Abort.as_ref(),
                        "error_message": message,
                    })),
            )
            .await?;
        tracing::warn!(job_id = job.id, message, "job failed before a run could start");
        Ok(true)
    }

    async fn finish_completed(&self, ctx: &RunContext, counters: Counters) -> Result<bool> {
        let now = Utc::now();
        let written = self
            .store
            .update_active_job(
                ctx.job_id,
                &JobPatch {
                    status: Some(JobStatus::Completed),
                    phase: Some(Phase::Done),
                    progress_pct: Some(100),
                    error: Some(None),
                    session_reconnect_count: Some(counters.session_reconnect_count),
                    phase_retry_count: Some(counters.phase_retry_count),
                    finished_at: Some(Some(now)),
                    ..JobPatch::default()
                },
            )
            .await?;
        if !written {
            return Ok(false);
        }
        self.store
            .update_run(
                ctx.run_id,
                &RunPatch {
                    status: Some(RunStatus::Completed),
                    phase: Some(Phase::Done),
                    session_reconnect_count: Some(counters.session_reconnect_count),
                    phase_retry_count: Some(counters.phase_retry_count),
                    finished_at: Some(Some(now)),
                    ..RunPatch::default()
                },
            )
            .await?;
        self.store
            .append_timeline(
                &NewTimelineEvent::new(ctx.job_id, Some(ctx.run_id), TimelineEventType::RunFinished)
                    .in_phase(Phase::Done)
                    .with_statuses(JobStatus::Running.as_str(), JobStatus::Completed.as_str())
                    .with_payload(json!({
                        "session_reconnect_count": counters.session_reconnect_count,
                        "phase_retry_count": counters.phase_retry_count,
                    })),
            )
            .await?;
        tracing::info!(
            job_id = ctx.job_id,
            run_id = ctx.run_id,
            session_reconnect_count = counters.session_reconnect_count,
            phase_retry_count = counters.phase_retry_count,
            "run completed"
        );
        Ok(true)
    }

    async fn finish_failed(
        &self,
        ctx: &RunContext,
        phase: Phase,
        err: &Error,
        counters: Counters,
    ) -> Result<Option<ErrorClass>> {
        let classification = self.classifier.classify(err);
        let message = err.to_string();
        let now = Utc::now();

        let written = self
            .store
            .update_active_job(
                ctx.job_id,
                &JobPatch {
                    status: Some(JobStatus::Failed),
                    phase: Some(Phase::Failed),
                    error: Some(Some(message.clone())),
                    last_error_class: Some(Some(classification.error_class)),
                    last_recover_action: Some(Some(classification.recover_action)),
                    session_reconnect_count: Some(counters.session_reconnect_count),
                    phase_retry_count: Some(counters.phase_retry_count),
                    finished_at: Some(Some(now)),
                    ..JobPatch::default()
                },
            )
            .await?;
        if !written {
            tracing::info!(
                job_id = ctx.job_id,
                run_id = ctx.run_id,
                error = %message,
                "run failed after the job turned terminal"
            );
            return Ok(None);
        }
        self.store
            .update_run(
                ctx.run_id,
                &RunPatch {
                    status: Some(RunStatus::Failed),
                    phase: Some(phase),
                    error_class: Some(Some(classification.error_class)),
                    error_code: Some(classification.error_code.clone()),
                    error_message: Some(Some(message.clone())),
                    session_reconnect_count: Some(counters.session_reconnect_count),
                    phase_retry_count: Some(counters.phase_retry_count),
                    finished_at: Some(Some(now)),
                },
            )
            .await?;
        self.store
            .append_timeline(
                &NewTimelineEvent::new(ctx.job_id, Some(ctx.run_id), TimelineEventType::RunFailed)
                    .in_phase(phase)
                    .with_statuses(JobStatus::Running.as_str(), JobStatus::Failed.as_str())
                    .with_payload(json!({
                        "error_class": classification.error_class.as_ref(),
                        "recover_action": classification.recover_action.as_ref(),
                        "error_message": message,
                    })),
            )
            .await?;
        tracing::warn!(
            job_id = ctx.job_id,
            run_id = ctx.run_id,
            phase = %phase,
            error_class = %classification.error_class,
            error = %message,
            "run failed"
        );
        Ok(Some(classification.error_class))
    }

    /// Close the run of a job that turned terminal under it, normally through
    /// an operator cancel. The job keeps its status; only the run and the
    /// counters change.
    async fn finish_overtaken(
        &self,
        ctx: &RunContext,
        phase: Phase,
        counters: Counters,
    ) -> Result<RunOutcome> {
        let status = match self.store.require_job(ctx.job_id).await?.status {
            status if status.is_terminal() => status,
            _ => JobStatus::Canceled,
        };
        let message = if status == JobStatus::Canceled {
            Error::Canceled.to_string()
        } else {
            format!("job already {status}")
        };
        self.store
            .update_run(
                ctx.run_id,
                &RunPatch {
                    status: Some(RunStatus::Failed),
                    phase: Some(phase),
                    error_class: Some(Some(ErrorClass::UnknownError)),
                    error_code: Some(None),
                    error_message: Some(Some(message.clone())),
                    session_reconnect_count: Some(counters.session_reconnect_count),
                    phase_retry_count: Some(counters.phase_retry_count),
                    finished_at: Some(Some(Utc::now())),
                },
            )
            .await?;
        self.store
            .update_job(
                ctx.job_id,
                &JobPatch {
                    session_reconnect_count: Some(counters.session_reconnect_count),
                    phase_retry_count: Some(counters.phase_retry_count),
                    ..JobPatch::default()
                },
            )
            .await?;
        self.store
            .append_timeline(
                &NewTimelineEvent::new(ctx.job_id, Some(ctx.run_id), TimelineEventType::RunFailed)
                    .in_phase(phase)
                    .with_statuses(JobStatus::Running.as_str(), status.as_str())
                    .with_payload(json!({
                        "error_class": ErrorClass::UnknownError.as_ref(),
                        "recover_action": RecoverAction::Abort.as_ref(),
                        "error_message": message,
                    })),
            )
            .await?;

        if status == JobStatus::Canceled {
            tracing::info!(job_id = ctx.job_id, run_id = ctx.run_id, phase = %phase, "run canceled");
            Ok(RunOutcome::Canceled { run_id: ctx.run_id })
        } else {
            tracing::warn!(
                job_id = ctx.job_id,
                run_id = ctx.run_id,
                status = %status,
                "job finished elsewhere while running"
            );
            Ok(RunOutcome::Failed {
                run_id: ctx.run_id,
                error_class: ErrorClass::UnknownError,
            })
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Counters {
    session_reconnect_count: i64,
    phase_retry_count: i64,
}

impl Counters {
    const fn from_job(job: &Job) -> Self {
        Self {
            session_reconnect_count: job.session_reconnect_count,
            phase_retry_count: job.phase_retry_count,
        }
    }
}
