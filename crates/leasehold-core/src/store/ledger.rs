//! Append-only ledgers: phase attempts and the job timeline.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use super::{
    rows::{get, get_json, get_opt_parsed, get_parsed, get_ts},
    JobStore,
};
use crate::{
    domain::{
        format_timestamp, NewPhaseAttempt, NewTimelineEvent, Phase, PhaseAttempt,
        PhaseAttemptSummary, TimelineEvent,
    },
    Error, Result,
};

fn parse_attempt_row(row: &SqliteRow) -> Result<PhaseAttempt> {
    Ok(PhaseAttempt {
        id: get(row, "id")?,
        run_id: get(row, "run_id")?,
        phase: get_parsed(row, "phase")?,
        attempt: get(row, "attempt")?,
        outcome: get_parsed(row, "outcome")?,
        recover_action: get_opt_parsed(row, "recover_action")?,
        detail: get_json(row, "detail_json")?,
        started_at: get_ts(row, "started_at")?,
        finished_at: get_ts(row, "finished_at")?,
    })
}

fn parse_timeline_row(row: &SqliteRow) -> Result<TimelineEvent> {
    Ok(TimelineEvent {
        id: get(row, "id")?,
        job_id: get(row, "job_id")?,
        run_id: get(row, "run_id")?,
        event_type: get_parsed(row, "event_type")?,
        from_status: get(row, "from_status")?,
        to_status: get(row, "to_status")?,
        phase: get_opt_parsed(row, "phase")?,
        payload: get_json(row, "payload_json")?,
        created_at: get_ts(row, "created_at")?,
    })
}

impl JobStore {
    pub async fn append_phase_attempt(&self, attempt: &NewPhaseAttempt) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO phase_attempts
                (run_id, phase, attempt, outcome, recover_action, detail_json, started_at, finished_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(attempt.run_id)
        .bind(attempt.phase.as_str())
        .bind(attempt.attempt)
        .bind(attempt.outcome.to_string())
        .bind(attempt.recover_action.map(|a| a.to_string()))
        .bind(serde_json::to_string(&attempt.detail)?)
        .bind(format_timestamp(attempt.started_at))
        .bind(format_timestamp(Utc::now()))
        .execute(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to append phase attempt: {e}")))?;
        Ok(result.last_insert_rowid())
    }

    /// Attempts of a run in insertion order.
    pub async fn list_phase_attempts(&self, run_id: i64) -> Result<Vec<PhaseAttempt>> {
        let rows = sqlx::query(
            "SELECT id, run_id, phase, attempt, outcome, recover_action, detail_json, started_at, finished_at
             FROM phase_attempts WHERE run_id = ? ORDER BY id ASC",
        )
        .bind(run_id)
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        rows.iter().map(parse_attempt_row).collect()
    }

    /// Per-phase counts for a run, in first-seen order.
    pub async fn summarize_phase_attempts(&self, run_id: i64) -> Result<Vec<PhaseAttemptSummary>> {
        let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
            "SELECT phase,
                    COUNT(*),
                    SUM(CASE WHEN outcome = 'failed' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN outcome = 'success' THEN 1 ELSE 0 END)
             FROM phase_attempts WHERE run_id = ?
             GROUP BY phase ORDER BY MIN(id) ASC",
        )
        .bind(run_id)
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(|(phase, attempts, failures, successes)| {
                Ok(PhaseAttemptSummary {
                    phase: phase.parse::<Phase>()?,
                    attempts,
                    failures,
                    successes,
                })
            })
            .collect()
    }

    pub async fn append_timeline(&self, event: &NewTimelineEvent) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO timeline_events
                (job_id, run_id, event_type, from_status, to_status, phase, payload_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.job_id)
        .bind(event.run_id)
        .bind(event.event_type.to_string())
        .bind(&event.from_status)
        .bind(&event.to_status)
        .bind(event.phase.map(|p| p.as_str()))
        .bind(serde_json::to_string(&event.payload)?)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to append timeline event: {e}")))?;
        Ok(result.last_insert_rowid())
    }

    /// Timeline of a job in insertion order.
    pub async fn list_timeline(&self, job_id: i64) -> Result<Vec<TimelineEvent>> {
        let rows = sqlx::query(
            "SELECT id, job_id, run_id, event_type, from_status, to_status, phase, payload_json, created_at
             FROM timeline_events WHERE job_id = ? ORDER BY id ASC",
        )
        .bind(job_id)
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        rows.iter().map(parse_timeline_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        domain::{AttemptOutcome, TimelineEventType},
        engine::classifier::RecoverAction,
        store::test_support::memory_store,
    };

    fn attempt(run_id: i64, phase: Phase, n: i64, outcome: AttemptOutcome) -> NewPhaseAttempt {
        NewPhaseAttempt {
            run_id,
            phase,
            attempt: n,
            outcome,
            recover_action: matches!(outcome, AttemptOutcome::Failed)
                .then_some(RecoverAction::PageRecreate),
            detail: json!({"n": n}),
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_attempts_keep_insertion_order_and_summary() -> Result<()> {
        let store = memory_store().await?;
        store
            .append_phase_attempt(&attempt(1, Phase::Submit, 1, AttemptOutcome::Failed))
            .await?;
        store
            .append_phase_attempt(&attempt(1, Phase::Submit, 2, AttemptOutcome::Success))
            .await?;
        store
            .append_phase_attempt(&attempt(1, Phase::Progress, 1, AttemptOutcome::Success))
            .await?;
        store
            .append_phase_attempt(&attempt(2, Phase::Submit, 1, AttemptOutcome::Success))
            .await?;

        let rows = store.list_phase_attempts(1).await?;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].recover_action, Some(RecoverAction::PageRecreate));
        assert_eq!(rows[1].detail, json!({"n": 2}));

        let summary = store.summarize_phase_attempts(1).await?;
        assert_eq!(
            summary,
            vec![
                PhaseAttemptSummary {
                    phase: Phase::Submit,
                    attempts: 2,
                    failures: 1,
                    successes: 1
                },
                PhaseAttemptSummary {
                    phase: Phase::Progress,
                    attempts: 1,
                    failures: 0,
                    successes: 1
                },
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_timeline_roundtrip() -> Result<()> {
        let store = memory_store().await?;
        store
            .append_timeline(
                &NewTimelineEvent::new(9, Some(1), TimelineEventType::RunStarted)
                    .in_phase(Phase::Submit)
                    .with_payload(json!({"actor_id": "profile-2"})),
            )
            .await?;
        store
            .append_timeline(
                &NewTimelineEvent::new(9, Some(1), TimelineEventType::RunFinished)
                    .with_statuses("running", "completed"),
            )
            .await?;

        let events = store.list_timeline(9).await?;
        let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![TimelineEventType::RunStarted, TimelineEventType::RunFinished]
        );
        assert_eq!(events[0].payload["actor_id"], "profile-2");
        assert_eq!(events[1].to_status.as_deref(), Some("completed"));
        assert!(events[1].phase.is_none());
        Ok(())
    }
}
