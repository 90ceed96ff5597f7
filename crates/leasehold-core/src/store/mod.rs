//! Durable store for jobs, runs, phase attempts and the timeline.
//!
//! Backed by `SQLite` through `sqlx`. Every public operation is a single
//! statement or a single transaction, so no partial write is ever visible to
//! another connection or process.

mod jobs;
mod ledger;
mod rows;
mod runs;

use std::{str::FromStr, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};

use crate::{lease::registry::PROFILE_LOCKS_DDL, Error, Result};

const JOBS_DDL: &str = "CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    profile_id INTEGER NOT NULL,
    group_title TEXT,
    prompt TEXT NOT NULL,
    image_url TEXT,
    duration TEXT NOT NULL DEFAULT '10s',
    aspect_ratio TEXT NOT NULL DEFAULT 'landscape',
    status TEXT NOT NULL DEFAULT 'queued',
    phase TEXT NOT NULL DEFAULT 'queue',
    progress_pct INTEGER NOT NULL DEFAULT 0,
    task_id TEXT,
    generation_id TEXT,
    publish_url TEXT,
    publish_post_id TEXT,
    publish_permalink TEXT,
    watermark_status TEXT,
    watermark_url TEXT,
    watermark_error TEXT,
    retry_of_job_id INTEGER,
    retry_root_job_id INTEGER,
    retry_index INTEGER NOT NULL DEFAULT 0,
    run_attempt INTEGER NOT NULL DEFAULT 1,
    priority INTEGER NOT NULL DEFAULT 100,
    actor_id TEXT,
    last_run_id INTEGER,
    last_error_class TEXT,
    last_recover_action TEXT,
    session_reconnect_count INTEGER NOT NULL DEFAULT 0,
    phase_retry_count INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    started_at TEXT,
    finished_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

const RUNS_DDL: &str = "CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL,
    profile_id INTEGER NOT NULL,
    actor_id TEXT NOT NULL,
    status TEXT NOT NULL,
    phase TEXT NOT NULL,
    attempt INTEGER NOT NULL DEFAULT 1,
    error_class TEXT,
    error_code TEXT,
    error_message TEXT,
    session_reconnect_count INTEGER NOT NULL DEFAULT 0,
    phase_retry_count INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    finished_at TEXT
)";

const PHASE_ATTEMPTS_DDL: &str = "CREATE TABLE IF NOT EXISTS phase_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL,
    phase TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    outcome TEXT NOT NULL,
    recover_action TEXT,
    detail_json TEXT NOT NULL DEFAULT '{}',
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL
)";

const TIMELINE_DDL: &str = "CREATE TABLE IF NOT EXISTS timeline_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL,
    run_id INTEGER,
    event_type TEXT NOT NULL,
    from_status TEXT,
    to_status TEXT,
    phase TEXT,
    payload_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
)";

const INDEXES_DDL: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_jobs_status_priority ON jobs(status, priority, id)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_profile_status ON jobs(profile_id, status, id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_retry_of_unique ON jobs(retry_of_job_id)
        WHERE retry_of_job_id IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_jobs_retry_root ON jobs(retry_root_job_id)",
    "CREATE INDEX IF NOT EXISTS idx_runs_job ON runs(job_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_phase_attempts_run ON phase_attempts(run_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_timeline_job ON timeline_events(job_id, id)",
];

/// Handle to the durable store.
#[derive(Debug, Clone)]
pub struct JobStore {
    db: SqlitePool,
}

impl JobStore {
    /// Wrap an existing pool. Call [`Self::init`] before first use.
    #[must_use]
    pub const fn from_pool(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Open (creating if missing) the database at `url` and initialize it.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::InvalidConfig(format!("Invalid database url '{url}': {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let db = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to open {url}: {e}")))?;
        let store = Self::from_pool(db);
        store.init().await?;
        Ok(store)
    }

    /// Get the database pool
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Create all tables and indexes.
    pub async fn init(&self) -> Result<()> {
        let statements = [
            JOBS_DDL,
            RUNS_DDL,
            PHASE_ATTEMPTS_DDL,
            TIMELINE_DDL,
            PROFILE_LOCKS_DDL,
        ];
        for ddl in statements.iter().chain(INDEXES_DDL) {
            sqlx::query(ddl)
                .execute(&self.db)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::sqlite::SqlitePoolOptions;

    use super::JobStore;
    use crate::{Error, Result};

    pub(crate) async fn memory_store() -> Result<JobStore> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        let store = JobStore::from_pool(pool);
        store.init().await?;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::{test_support::memory_store, *};

    #[tokio::test]
    async fn test_init_is_idempotent() -> Result<()> {
        let store = memory_store().await?;
        store.init().await?;
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(store.pool())
        .await?;
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["jobs", "phase_attempts", "profile_locks", "runs", "timeline_events"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_connect_creates_file_database() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("engine.db");
        let url = format!("sqlite://{}", path.display());
        let store = JobStore::connect(&url, 2).await?;
        assert!(path.exists());
        drop(store);
        Ok(())
    }

    #[test]
    fn test_bad_url_is_invalid_config() {
        let result = tokio_test::block_on(JobStore::connect("sqlite://x.db?mode=bogus", 1));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
