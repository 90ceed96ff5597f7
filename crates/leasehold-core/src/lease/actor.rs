//! Stable per-profile actor identity and queue-position estimates.

use chrono::Utc;
use serde::Serialize;

use super::registry::ProfileRegistry;
use crate::{store::JobStore, Result};

/// Observability context for one job on one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorContext {
    pub actor_id: String,
    pub queue_position: i64,
    pub lock_state: &'static str,
}

/// Read-only view that derives actor ids and queue positions.
#[derive(Debug, Clone)]
pub struct ProfileActorScheduler {
    store: JobStore,
    registry: ProfileRegistry,
}

impl ProfileActorScheduler {
    #[must_use]
    pub const fn new(store: JobStore, registry: ProfileRegistry) -> Self {
        Self { store, registry }
    }

    /// Deterministic correlation key for a profile.
    #[must_use]
    pub fn actor_id(profile_id: i64) -> String {
        format!("profile-{profile_id}")
    }

    /// 1-based estimate of where `job_id` sits among the profile's active jobs.
    pub async fn queue_position(&self, profile_id: i64, job_id: i64) -> Result<i64> {
        let ahead = self.store.count_active_ahead(profile_id, job_id).await?;
        Ok(ahead.max(1))
    }

    pub async fn context(&self, profile_id: i64, job_id: i64) -> Result<ActorContext> {
        let queue_position = self.queue_position(profile_id, job_id).await?;
        let state = self.registry.get_state(profile_id).await?;
        Ok(ActorContext {
            actor_id: Self::actor_id(profile_id),
            queue_position,
            lock_state: if state.is_live(Utc::now()) {
                "locked"
            } else {
                "free"
            },
        })
    }
}
