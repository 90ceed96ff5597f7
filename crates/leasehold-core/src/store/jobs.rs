//! Job rows: creation, typed partial updates, queue queries, retry lineage.

use chrono::Utc;
use sqlx::{
    sqlite::{SqliteQueryResult, SqliteRow},
    QueryBuilder, Sqlite,
};

use super::{
    rows::{get, get_opt_parsed, get_opt_ts, get_parsed, get_ts, Assignments},
    JobStore,
};
use crate::{
    domain::{format_timestamp, Job, JobFilter, JobPatch, JobStatus, NewJob},
    engine::state_machine::StateMachine,
    Error, Result,
};

const JOB_COLUMNS: &str = "id, profile_id, group_title, prompt, image_url, duration, aspect_ratio,
    status, phase, progress_pct, task_id, generation_id, publish_url, publish_post_id,
    publish_permalink, watermark_status, watermark_url, watermark_error, retry_of_job_id,
    retry_root_job_id, retry_index, run_attempt, priority, actor_id, last_run_id,
    last_error_class, last_recover_action, session_reconnect_count, phase_retry_count, error,
    started_at, finished_at, created_at, updated_at";

fn parse_job_row(row: &SqliteRow) -> Result<Job> {
    let phase_text: String = get(row, "phase")?;
    Ok(Job {
        id: get(row, "id")?,
        profile_id: get(row, "profile_id")?,
        group_title: get(row, "group_title")?,
        prompt: get(row, "prompt")?,
        image_url: get(row, "image_url")?,
        duration: get(row, "duration")?,
        aspect_ratio: get(row, "aspect_ratio")?,
        status: get_parsed(row, "status")?,
        phase: StateMachine::new().normalize_phase(&phase_text),
        progress_pct: get(row, "progress_pct")?,
        task_id: get(row, "task_id")?,
        generation_id: get(row, "generation_id")?,
        publish_url: get(row, "publish_url")?,
        publish_post_id: get(row, "publish_post_id")?,
        publish_permalink: get(row, "publish_permalink")?,
        watermark_status: get_opt_parsed(row, "watermark_status")?,
        watermark_url: get(row, "watermark_url")?,
        watermark_error: get(row, "watermark_error")?,
        retry_of_job_id: get(row, "retry_of_job_id")?,
        retry_root_job_id: get(row, "retry_root_job_id")?,
        retry_index: get(row, "retry_index")?,
        run_attempt: get(row, "run_attempt")?,
        priority: get(row, "priority")?,
        actor_id: get(row, "actor_id")?,
        last_run_id: get(row, "last_run_id")?,
        last_error_class: get_opt_parsed(row, "last_error_class")?,
        last_recover_action: get_opt_parsed(row, "last_recover_action")?,
        session_reconnect_count: get(row, "session_reconnect_count")?,
        phase_retry_count: get(row, "phase_retry_count")?,
        error: get(row, "error")?,
        started_at: get_opt_ts(row, "started_at")?,
        finished_at: get_opt_ts(row, "finished_at")?,
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

fn job_assignments(patch: &JobPatch) -> Assignments {
    let mut set = Assignments::default();
    if let Some(status) = patch.status {
        set.text("status", Some(status.as_str().to_string()));
    }
    if let Some(phase) = patch.phase {
        set.text("phase", Some(phase.as_str().to_string()));
    }
    if let Some(pct) = patch.progress_pct {
        set.int("progress_pct", Some(pct));
    }
    let texts = [
        ("task_id", &patch.task_id),
        ("generation_id", &patch.generation_id),
        ("publish_url", &patch.publish_url),
        ("publish_post_id", &patch.publish_post_id),
        ("publish_permalink", &patch.publish_permalink),
        ("watermark_url", &patch.watermark_url),
        ("watermark_error", &patch.watermark_error),
        ("actor_id", &patch.actor_id),
        ("error", &patch.error),
    ];
    for (col, value) in texts {
        if let Some(value) = value {
            set.text(col, value.clone());
        }
    }
    if let Some(status) = patch.watermark_status {
        set.text("watermark_status", status.map(|s| s.to_string()));
    }
    if let Some(run_id) = patch.last_run_id {
        set.int("last_run_id", run_id);
    }
    if let Some(class) = patch.last_error_class {
        set.text("last_error_class", class.map(|c| c.to_string()));
    }
    if let Some(action) = patch.last_recover_action {
        set.text("last_recover_action", action.map(|a| a.to_string()));
    }
    if let Some(count) = patch.session_reconnect_count {
        set.int("session_reconnect_count", Some(count));
    }
    if let Some(count) = patch.phase_retry_count {
        set.int("phase_retry_count", Some(count));
    }
    if let Some(ts) = patch.started_at {
        set.ts("started_at", ts);
    }
    if let Some(ts) = patch.finished_at {
        set.ts("finished_at", ts);
    }
    set
}

impl JobStore {
    /// Insert a queued job and return its id.
    pub async fn create_job(&self, job: &NewJob) -> Result<i64> {
        let result = self
            .insert_job("INSERT", job)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to create job: {e}")))?;
        Ok(result.last_insert_rowid())
    }

    /// Insert a retry child unless its parent already has one.
    ///
    /// At most one job per `retry_of_job_id` exists, enforced by a unique
    /// index, so racing writers in separate processes get `None`.
    pub async fn create_retry_job(&self, job: &NewJob) -> Result<Option<i64>> {
        if job.retry_of_job_id.is_none() {
            return Err(Error::validation("retry job needs retry_of_job_id"));
        }
        let result = self
            .insert_job("INSERT OR IGNORE", job)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to create retry job: {e}")))?;
        Ok((result.rows_affected() == 1).then(|| result.last_insert_rowid()))
    }

    async fn insert_job(
        &self,
        verb: &str,
        job: &NewJob,
    ) -> std::result::Result<SqliteQueryResult, sqlx::Error> {
        let now = format_timestamp(Utc::now());
        sqlx::query(&format!(
            "{verb} INTO jobs (profile_id, group_title, prompt, image_url, duration, aspect_ratio,
                status, phase, priority, retry_of_job_id, retry_root_job_id, retry_index,
                created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 'queued', 'queue', ?, ?, ?, ?, ?, ?)"
        ))
        .bind(job.profile_id)
        .bind(&job.group_title)
        .bind(&job.prompt)
        .bind(&job.image_url)
        .bind(&job.duration)
        .bind(&job.aspect_ratio)
        .bind(job.priority)
        .bind(job.retry_of_job_id)
        .bind(job.retry_root_job_id)
        .bind(job.retry_index)
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(job_id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to query job {job_id}: {e}")))
            .and_then(|opt_row| opt_row.map_or(Ok(None), |row| parse_job_row(&row).map(Some)))
    }

    /// Like [`Self::get_job`] but a missing row is an error.
    pub async fn require_job(&self, job_id: i64) -> Result<Job> {
        self.get_job(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))
    }

    /// Apply a typed partial update. `updated_at` is always refreshed.
    pub async fn update_job(&self, job_id: i64, patch: &JobPatch) -> Result<()> {
        let mut set = job_assignments(patch);
        if set.is_empty() {
            return Ok(());
        }
        set.ts("updated_at", Some(Utc::now()));
        let affected = set.execute(&self.db, "jobs", job_id).await?;
        if affected == 0 {
            return Err(Error::NotFound(format!("job {job_id}")));
        }
        Ok(())
    }

    /// Apply `patch` only while the job's status is none of `unless`.
    ///
    /// Returns `false` when the guard (or a missing row) blocked the write.
    pub async fn update_job_unless(
        &self,
        job_id: i64,
        patch: &JobPatch,
        unless: &[JobStatus],
    ) -> Result<bool> {
        let mut set = job_assignments(patch);
        if set.is_empty() {
            return Ok(true);
        }
        set.ts("updated_at", Some(Utc::now()));
        set.unless_in("status", unless.iter().map(JobStatus::as_str).collect());
        let affected = set.execute(&self.db, "jobs", job_id).await?;
        Ok(affected == 1)
    }

    /// [`Self::update_job_unless`] guarded by every terminal status.
    pub async fn update_active_job(&self, job_id: i64, patch: &JobPatch) -> Result<bool> {
        let terminal: Vec<JobStatus> = JobStatus::all()
            .iter()
            .copied()
            .filter(JobStatus::is_terminal)
            .collect();
        self.update_job_unless(job_id, patch, &terminal).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM jobs WHERE 1 = 1"));
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(profile_id) = filter.profile_id {
            builder.push(" AND profile_id = ").push_bind(profile_id);
        }
        if let Some(group) = &filter.group_title {
            builder.push(" AND group_title = ").push_bind(group.clone());
        }
        builder
            .push(" ORDER BY id DESC LIMIT ")
            .push_bind(filter.limit.unwrap_or(50).clamp(1, 1000));

        let rows = builder
            .build()
            .fetch_all(&self.db)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to list jobs: {e}")))?;
        rows.iter().map(parse_job_row).collect()
    }

    /// Cancel a job unless it already reached a terminal status.
    pub async fn cancel_job(&self, job_id: i64) -> Result<bool> {
        let now = format_timestamp(Utc::now());
        let result = sqlx::query(
            "UPDATE jobs SET status = 'canceled', phase = 'canceled', finished_at = ?, updated_at = ?
             WHERE id = ? AND status IN ('queued', 'running')",
        )
        .bind(&now)
        .bind(&now)
        .bind(job_id)
        .execute(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to cancel job {job_id}: {e}")))?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn is_canceled(&self, job_id: i64) -> Result<bool> {
        let status: Option<(String,)> = sqlx::query_as("SELECT status FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(status.is_some_and(|(s,)| s == JobStatus::Canceled.as_str()))
    }

    /// Queued or running jobs on `profile_id` with id at most `job_id`.
    pub async fn count_active_ahead(&self, profile_id: i64, job_id: i64) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM jobs
             WHERE profile_id = ? AND id <= ? AND status IN ('queued', 'running')",
        )
        .bind(profile_id)
        .bind(job_id)
        .fetch_one(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(count)
    }

    /// Queued job ids, most urgent first.
    pub async fn next_queued_jobs(&self, limit: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT id FROM jobs WHERE status = 'queued' ORDER BY priority ASC, id ASC LIMIT ?",
        )
        .bind(limit.max(1))
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Newest job spawned as a retry of `parent_job_id`.
    pub async fn latest_retry_child(&self, parent_job_id: i64) -> Result<Option<Job>> {
        sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE retry_of_job_id = ? ORDER BY id DESC LIMIT 1"
        ))
        .bind(parent_job_id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))
        .and_then(|opt_row| opt_row.map_or(Ok(None), |row| parse_job_row(&row).map(Some)))
    }

    /// Distinct positive profile ids used anywhere in a retry chain.
    pub async fn retry_chain_profile_ids(&self, root_job_id: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT DISTINCT profile_id FROM jobs
             WHERE (id = ? OR retry_root_job_id = ?) AND profile_id > 0
             ORDER BY profile_id",
        )
        .bind(root_job_id)
        .bind(root_job_id)
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn max_retry_index(&self, root_job_id: i64) -> Result<i64> {
        let (max,): (Option<i64>,) = sqlx::query_as(
            "SELECT MAX(COALESCE(retry_index, 0)) FROM jobs WHERE id = ? OR retry_root_job_id = ?",
        )
        .bind(root_job_id)
        .bind(root_job_id)
        .fetch_one(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(max.unwrap_or(0))
    }

    /// Crash cutover: fail every job and run still marked running.
    pub async fn mark_unfinished_jobs(&self, reason: &str) -> Result<u64> {
        let now = format_timestamp(Utc::now());
        let mut tx = self
            .db
            .begin()
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        let jobs = sqlx::query(
            "UPDATE jobs SET status = 'failed', phase = 'failed', error = ?, finished_at = ?, updated_at = ?
             WHERE status = 'running'",
        )
        .bind(reason)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        sqlx::query(
            "UPDATE runs SET status = 'failed', error_message = ?, finished_at = ?
             WHERE status = 'running'",
        )
        .bind(reason)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(jobs.rows_affected())
    }
}
