//! Sibling jobs for submits rejected under remote overload.

use serde_json::json;

use super::JobEngine;
use crate::{
    domain::{Job, NewJob, NewTimelineEvent, TimelineEventType},
    Result,
};

impl JobEngine {
    /// Queue a copy of `parent` on a profile the retry chain has not used.
    /// `run_id` is the failed run, recorded on the parent's timeline.
    ///
    /// Idempotent per parent and bounded by `overload.max_retry_depth`.
    /// Returns the new job id, or `None` when nothing was spawned.
    pub async fn spawn_overload_sibling(
        &self,
        parent: &Job,
        run_id: Option<i64>,
    ) -> Result<Option<i64>> {
        if let Some(child) = self.store.latest_retry_child(parent.id).await? {
            tracing::debug!(
                job_id = parent.id,
                child_job_id = child.id,
                "retry sibling already exists"
            );
            return Ok(None);
        }

        let root = parent.retry_root();
        let retry_index = self.store.max_retry_index(root).await? + 1;
        if retry_index > self.config.overload.max_retry_depth {
            tracing::info!(
                job_id = parent.id,
                root_job_id = root,
                retry_index,
                "retry chain exhausted, not spawning"
            );
            return Ok(None);
        }

        let excluded = self.store.retry_chain_profile_ids(root).await?;
        let candidate = self
            .dispatcher
            .pick_best_account(parent.group_title.as_deref(), &excluded)
            .await?;
        let Some(candidate) = candidate.filter(|c| c.profile_id > 0 && !excluded.contains(&c.profile_id))
        else {
            tracing::info!(
                job_id = parent.id,
                excluded = ?excluded,
                "no spare profile for retry sibling"
            );
            return Ok(None);
        };

        let child = NewJob {
            profile_id: candidate.profile_id,
            group_title: parent.group_title.clone(),
            prompt: parent.prompt.clone(),
            image_url: parent.image_url.clone(),
            duration: parent.duration.clone(),
            aspect_ratio: parent.aspect_ratio.clone(),
            priority: parent.priority,
            retry_of_job_id: Some(parent.id),
            retry_root_job_id: Some(root),
            retry_index,
        };
        let Some(child_id) = self.store.create_retry_job(&child).await? else {
            tracing::debug!(job_id = parent.id, "retry sibling created concurrently");
            return Ok(None);
        };

        self.store
            .append_timeline(
                &NewTimelineEvent::new(parent.id, run_id, TimelineEventType::RetrySpawned)
                    .with_payload(json!({
                        "child_job_id": child_id,
                        "profile_id": candidate.profile_id,
                        "retry_index": retry_index,
                    })),
            )
            .await?;
        tracing::info!(
            job_id = parent.id,
            child_job_id = child_id,
            profile_id = candidate.profile_id,
            retry_index,
            "overload retry sibling queued"
        );
        Ok(Some(child_id))
    }
}
