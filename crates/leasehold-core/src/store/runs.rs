//! Run rows.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use super::{
    rows::{get, get_opt_parsed, get_opt_ts, get_parsed, get_ts, Assignments},
    JobStore,
};
use crate::{
    domain::{format_timestamp, NewRun, Run, RunPatch},
    Error, Result,
};

const RUN_COLUMNS: &str = "id, job_id, profile_id, actor_id, status, phase, attempt, error_class,
    error_code, error_message, session_reconnect_count, phase_retry_count, started_at, finished_at";

fn parse_run_row(row: &SqliteRow) -> Result<Run> {
    Ok(Run {
        id: get(row, "id")?,
        job_id: get(row, "job_id")?,
        profile_id: get(row, "profile_id")?,
        actor_id: get(row, "actor_id")?,
        status: get_parsed(row, "status")?,
        phase: get_parsed(row, "phase")?,
        attempt: get(row, "attempt")?,
        error_class: get_opt_parsed(row, "error_class")?,
        error_code: get(row, "error_code")?,
        error_message: get(row, "error_message")?,
        session_reconnect_count: get(row, "session_reconnect_count")?,
        phase_retry_count: get(row, "phase_retry_count")?,
        started_at: get_ts(row, "started_at")?,
        finished_at: get_opt_ts(row, "finished_at")?,
    })
}

impl JobStore {
    /// Insert a running run and return its id.
    pub async fn create_run(&self, run: &NewRun) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO runs (job_id, profile_id, actor_id, status, phase, attempt, started_at)
             VALUES (?, ?, ?, 'running', ?, ?, ?)",
        )
        .bind(run.job_id)
        .bind(run.profile_id)
        .bind(&run.actor_id)
        .bind(run.phase.as_str())
        .bind(run.attempt.max(1))
        .bind(format_timestamp(Utc::now()))
        .execute(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to create run: {e}")))?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update_run(&self, run_id: i64, patch: &RunPatch) -> Result<()> {
        let mut set = Assignments::default();
        if let Some(status) = patch.status {
            set.text("status", Some(status.to_string()));
        }
        if let Some(phase) = patch.phase {
            set.text("phase", Some(phase.as_str().to_string()));
        }
        if let Some(class) = patch.error_class {
            set.text("error_class", class.map(|c| c.to_string()));
        }
        if let Some(code) = &patch.error_code {
            set.text("error_code", code.clone());
        }
        if let Some(message) = &patch.error_message {
            set.text("error_message", message.clone());
        }
        if let Some(count) = patch.session_reconnect_count {
            set.int("session_reconnect_count", Some(count));
        }
        if let Some(count) = patch.phase_retry_count {
            set.int("phase_retry_count", Some(count));
        }
        if let Some(ts) = patch.finished_at {
            set.ts("finished_at", ts);
        }
        if set.is_empty() {
            return Ok(());
        }
        let affected = set.execute(&self.db, "runs", run_id).await?;
        if affected == 0 {
            return Err(Error::NotFound(format!("run {run_id}")));
        }
        Ok(())
    }

    pub async fn get_run(&self, run_id: i64) -> Result<Option<Run>> {
        sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?"))
            .bind(run_id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))
            .and_then(|opt_row| opt_row.map_or(Ok(None), |row| parse_run_row(&row).map(Some)))
    }

    pub async fn latest_run(&self, job_id: i64) -> Result<Option<Run>> {
        sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE job_id = ? ORDER BY id DESC LIMIT 1"
        ))
        .bind(job_id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))
        .and_then(|opt_row| opt_row.map_or(Ok(None), |row| parse_run_row(&row).map(Some)))
    }

    /// All runs of a job, oldest first.
    pub async fn list_runs(&self, job_id: i64) -> Result<Vec<Run>> {
        let rows = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE job_id = ? ORDER BY id ASC"
        ))
        .bind(job_id)
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        rows.iter().map(parse_run_row).collect()
    }
}
