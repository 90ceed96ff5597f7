//! Per-entity record types.
//!
//! Nullable columns are `Option<T>`. Patch types use `Option<T>` for
//! "leave unchanged" and `Option<Option<T>>` where a column may be cleared.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::status::{AttemptOutcome, JobStatus, RunStatus, TimelineEventType, WatermarkStatus};
use crate::engine::{
    classifier::{ErrorClass, RecoverAction},
    state_machine::Phase,
};

/// Default scheduling priority. Lower numbers run first.
pub const DEFAULT_PRIORITY: i64 = 100;

/// One end-to-end automation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: i64,
    pub profile_id: i64,
    pub group_title: Option<String>,
    pub prompt: String,
    pub image_url: Option<String>,
    pub duration: String,
    pub aspect_ratio: String,
    pub status: JobStatus,
    pub phase: Phase,
    pub progress_pct: i64,
    pub task_id: Option<String>,
    pub generation_id: Option<String>,
    pub publish_url: Option<String>,
    pub publish_post_id: Option<String>,
    pub publish_permalink: Option<String>,
    pub watermark_status: Option<WatermarkStatus>,
    pub watermark_url: Option<String>,
    pub watermark_error: Option<String>,
    pub retry_of_job_id: Option<i64>,
    pub retry_root_job_id: Option<i64>,
    pub retry_index: i64,
    pub run_attempt: i64,
    pub priority: i64,
    pub actor_id: Option<String>,
    pub last_run_id: Option<i64>,
    pub last_error_class: Option<ErrorClass>,
    pub last_recover_action: Option<RecoverAction>,
    pub session_reconnect_count: i64,
    pub phase_retry_count: i64,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Root of this job's retry chain (itself when it is not a retry).
    #[must_use]
    pub fn retry_root(&self) -> i64 {
        self.retry_root_job_id.unwrap_or(self.id)
    }
}

/// Input for creating a queued job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub profile_id: i64,
    pub group_title: Option<String>,
    pub prompt: String,
    pub image_url: Option<String>,
    pub duration: String,
    pub aspect_ratio: String,
    pub priority: i64,
    pub retry_of_job_id: Option<i64>,
    pub retry_root_job_id: Option<i64>,
    pub retry_index: i64,
}

impl NewJob {
    /// A first-generation job with default duration, aspect ratio and priority.
    pub fn new(profile_id: i64, prompt: impl Into<String>) -> Self {
        Self {
            profile_id,
            group_title: None,
            prompt: prompt.into(),
            image_url: None,
            duration: "10s".to_string(),
            aspect_ratio: "landscape".to_string(),
            priority: DEFAULT_PRIORITY,
            retry_of_job_id: None,
            retry_root_job_id: None,
            retry_index: 0,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group_title = Some(group.into());
        self
    }

    pub const fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

/// Partial update of a job row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub phase: Option<Phase>,
    pub progress_pct: Option<i64>,
    pub task_id: Option<Option<String>>,
    pub generation_id: Option<Option<String>>,
    pub publish_url: Option<Option<String>>,
    pub publish_post_id: Option<Option<String>>,
    pub publish_permalink: Option<Option<String>>,
    pub watermark_status: Option<Option<WatermarkStatus>>,
    pub watermark_url: Option<Option<String>>,
    pub watermark_error: Option<Option<String>>,
    pub actor_id: Option<Option<String>>,
    pub last_run_id: Option<Option<i64>>,
    pub last_error_class: Option<Option<ErrorClass>>,
    pub last_recover_action: Option<Option<RecoverAction>>,
    pub session_reconnect_count: Option<i64>,
    pub phase_retry_count: Option<i64>,
    pub error: Option<Option<String>>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub finished_at: Option<Option<DateTime<Utc>>>,
}

/// One engine invocation for a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Run {
    pub id: i64,
    pub job_id: i64,
    pub profile_id: i64,
    pub actor_id: String,
    pub status: RunStatus,
    pub phase: Phase,
    pub attempt: i64,
    pub error_class: Option<ErrorClass>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub session_reconnect_count: i64,
    pub phase_retry_count: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Input for creating a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub job_id: i64,
    pub profile_id: i64,
    pub actor_id: String,
    pub phase: Phase,
    pub attempt: i64,
}

/// Partial update of a run row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub phase: Option<Phase>,
    pub error_class: Option<Option<ErrorClass>>,
    pub error_code: Option<Option<String>>,
    pub error_message: Option<Option<String>>,
    pub session_reconnect_count: Option<i64>,
    pub phase_retry_count: Option<i64>,
    pub finished_at: Option<Option<DateTime<Utc>>>,
}

/// Append-only ledger row for one try at a phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseAttempt {
    pub id: i64,
    pub run_id: i64,
    pub phase: Phase,
    pub attempt: i64,
    pub outcome: AttemptOutcome,
    pub recover_action: Option<RecoverAction>,
    pub detail: Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPhaseAttempt {
    pub run_id: i64,
    pub phase: Phase,
    pub attempt: i64,
    pub outcome: AttemptOutcome,
    pub recover_action: Option<RecoverAction>,
    pub detail: Value,
    pub started_at: DateTime<Utc>,
}

/// Per-phase roll-up of a run's attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseAttemptSummary {
    pub phase: Phase,
    pub attempts: i64,
    pub failures: i64,
    pub successes: i64,
}

/// Append-only causal trail entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    pub id: i64,
    pub job_id: i64,
    pub run_id: Option<i64>,
    pub event_type: TimelineEventType,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    pub phase: Option<Phase>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTimelineEvent {
    pub job_id: i64,
    pub run_id: Option<i64>,
    pub event_type: TimelineEventType,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    pub phase: Option<Phase>,
    pub payload: Value,
}

impl NewTimelineEvent {
    pub fn new(job_id: i64, run_id: Option<i64>, event_type: TimelineEventType) -> Self {
        Self {
            job_id,
            run_id,
            event_type,
            from_status: None,
            to_status: None,
            phase: None,
            payload: Value::Object(serde_json::Map::new()),
        }
    }

    pub const fn in_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_statuses(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from_status = Some(from.into());
        self.to_status = Some(to.into());
        self
    }
}

/// Filter for listing jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub profile_id: Option<i64>,
    pub group_title: Option<String>,
    pub limit: Option<i64>,
}
