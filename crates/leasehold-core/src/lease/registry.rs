//! Profile lease registry.
//!
//! Gives one run exclusive ownership of a profile. A lease is free when no
//! row exists or its `lease_until` has passed. Acquisition is a single
//! conditional upsert, so two callers racing across processes get at most
//! one success. Leases are renewed by heartbeat.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{
    domain::{format_timestamp, parse_timestamp, DEFAULT_PRIORITY},
    Error, Result,
};

/// Shortest lease the registry will grant, in seconds.
pub const MIN_LEASE_SECS: i64 = 10;

pub(crate) const PROFILE_LOCKS_DDL: &str = "CREATE TABLE IF NOT EXISTS profile_locks (
    profile_id INTEGER PRIMARY KEY,
    owner_run_id INTEGER NOT NULL,
    actor_id TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 100,
    lease_until TEXT NOT NULL,
    heartbeat_at TEXT NOT NULL,
    acquired_at TEXT NOT NULL
)";

/// Snapshot of one profile's lease row.
///
/// `locked` is true whenever a row exists, even if its lease has already
/// expired. Use [`ProfileLeaseState::is_live`] to judge actual ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileLeaseState {
    pub profile_id: i64,
    pub locked: bool,
    pub owner_run_id: Option<i64>,
    pub actor_id: Option<String>,
    pub priority: i64,
    pub lease_until: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
}

impl ProfileLeaseState {
    /// True if a row exists and its lease has not passed `now`.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.locked && self.lease_until.is_some_and(|until| until >= now)
    }
}

fn lease_duration(lease_seconds: i64) -> Duration {
    Duration::seconds(lease_seconds.max(MIN_LEASE_SECS))
}

/// Manages profile leases backed by `SQLite`.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    db: SqlitePool,
}

impl ProfileRegistry {
    #[must_use]
    pub const fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize the lease table.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(PROFILE_LOCKS_DDL)
            .execute(&self.db)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Claim `profile_id` for `owner_run_id`.
    ///
    /// Succeeds if no row exists, the row's lease expired, or the row is
    /// already owned by `owner_run_id` (idempotent refresh).
    pub async fn acquire(
        &self,
        profile_id: i64,
        owner_run_id: i64,
        actor_id: &str,
        priority: i64,
        lease_seconds: i64,
    ) -> Result<bool> {
        let now = Utc::now();
        let now_str = format_timestamp(now);
        let until_str = format_timestamp(now + lease_duration(lease_seconds));

        let result = sqlx::query(
            "INSERT INTO profile_locks
                (profile_id, owner_run_id, actor_id, priority, lease_until, heartbeat_at, acquired_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(profile_id) DO UPDATE SET
                owner_run_id = excluded.owner_run_id,
                actor_id = excluded.actor_id,
                priority = excluded.priority,
                lease_until = excluded.lease_until,
                heartbeat_at = excluded.heartbeat_at,
                acquired_at = CASE
                    WHEN profile_locks.owner_run_id = excluded.owner_run_id
                    THEN profile_locks.acquired_at
                    ELSE excluded.acquired_at
                END
             WHERE profile_locks.owner_run_id = excluded.owner_run_id
                OR profile_locks.lease_until < ?",
        )
        .bind(profile_id)
        .bind(owner_run_id)
        .bind(actor_id)
        .bind(priority)
        .bind(&until_str)
        .bind(&now_str)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to acquire profile {profile_id}: {e}")))?;

        let acquired = result.rows_affected() == 1;
        tracing::debug!(
            profile_id,
            owner_run_id,
            actor_id,
            acquired,
            "profile lease acquire"
        );
        Ok(acquired)
    }

    /// Extend the lease if `owner_run_id` still owns it. `false` means
    /// ownership was lost.
    pub async fn heartbeat(
        &self,
        profile_id: i64,
        owner_run_id: i64,
        lease_seconds: i64,
    ) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE profile_locks SET lease_until = ?, heartbeat_at = ?
             WHERE profile_id = ? AND owner_run_id = ?",
        )
        .bind(format_timestamp(now + lease_duration(lease_seconds)))
        .bind(format_timestamp(now))
        .bind(profile_id)
        .bind(owner_run_id)
        .execute(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete the row only if owned by `owner_run_id`.
    pub async fn release(&self, profile_id: i64, owner_run_id: i64) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM profile_locks WHERE profile_id = ? AND owner_run_id = ?")
                .bind(profile_id)
                .bind(owner_run_id)
                .execute(&self.db)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(result.rows_affected() == 1)
    }

    /// Unconditional delete. Administrative escape hatch.
    pub async fn force_release(&self, profile_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM profile_locks WHERE profile_id = ?")
            .bind(profile_id)
            .execute(&self.db)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        let released = result.rows_affected() == 1;
        if released {
            tracing::warn!(profile_id, "profile lease force released");
        }
        Ok(released)
    }

    pub async fn get_state(&self, profile_id: i64) -> Result<ProfileLeaseState> {
        let row: Option<(i64, String, i64, String, String)> = sqlx::query_as(
            "SELECT owner_run_id, actor_id, priority, lease_until, heartbeat_at
             FROM profile_locks WHERE profile_id = ?",
        )
        .bind(profile_id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        match row {
            Some((owner_run_id, actor_id, priority, until, heartbeat)) => Ok(ProfileLeaseState {
                profile_id,
                locked: true,
                owner_run_id: Some(owner_run_id),
                actor_id: Some(actor_id),
                priority,
                lease_until: Some(parse_timestamp(&until)?),
                heartbeat_at: Some(parse_timestamp(&heartbeat)?),
            }),
            None => Ok(ProfileLeaseState {
                profile_id,
                locked: false,
                owner_run_id: None,
                actor_id: None,
                priority: DEFAULT_PRIORITY,
                lease_until: None,
                heartbeat_at: None,
            }),
        }
    }

    /// Leases that have not expired, ordered by profile id.
    pub async fn list_active(&self) -> Result<Vec<ProfileLeaseState>> {
        let rows: Vec<(i64, i64, String, i64, String, String)> = sqlx::query_as(
            "SELECT profile_id, owner_run_id, actor_id, priority, lease_until, heartbeat_at
             FROM profile_locks WHERE lease_until >= ? ORDER BY profile_id",
        )
        .bind(format_timestamp(Utc::now()))
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(
                |(profile_id, owner_run_id, actor_id, priority, until, heartbeat)| {
                    Ok(ProfileLeaseState {
                        profile_id,
                        locked: true,
                        owner_run_id: Some(owner_run_id),
                        actor_id: Some(actor_id),
                        priority,
                        lease_until: Some(parse_timestamp(&until)?),
                        heartbeat_at: Some(parse_timestamp(&heartbeat)?),
                    })
                },
            )
            .collect()
    }

    /// Delete expired rows. Not required for correctness.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM profile_locks WHERE lease_until < ?")
            .bind(format_timestamp(Utc::now()))
            .execute(&self.db)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
        let swept = result.rows_affected();
        if swept > 0 {
            tracing::info!(swept, "expired profile leases swept");
        }
        Ok(swept)
    }
}
