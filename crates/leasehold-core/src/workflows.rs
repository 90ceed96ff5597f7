//! Downstream workflow seams: generation submit/poll, publish, watermark
//! removal, and account dispatch for overload siblings.
//!
//! Implementations report failures as [`crate::Error::Workflow`] (or
//! [`crate::Error::Driver`] for page-level faults) so the classifier can
//! judge them by message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{session::Page, Result};

/// A generation request for the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitRequest {
    pub prompt: String,
    pub image_url: Option<String>,
    pub aspect_ratio: String,
    pub n_frames: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SubmitOutcome {
    pub task_id: Option<String>,
    pub access_token: Option<String>,
    pub error: Option<String>,
}

/// Remote task state as reported by one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PollState {
    pub state: TaskState,
    pub progress: Option<f64>,
    pub generation_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishRequest {
    pub profile_id: i64,
    pub task_id: Option<String>,
    pub generation_id: String,
    pub prompt: String,
    pub created_after: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
pub trait Workflows: Send + Sync {
    async fn submit(&self, page: &dyn Page, request: &SubmitRequest) -> Result<SubmitOutcome>;

    /// Read the session's bearer token from the page, if any.
    async fn read_access_token(&self, page: &dyn Page) -> Result<Option<String>>;

    /// One status poll. `fetch_drafts` asks for the slower drafts listing as well.
    async fn poll(
        &self,
        page: &dyn Page,
        task_id: &str,
        access_token: &str,
        fetch_drafts: bool,
    ) -> Result<PollState>;

    /// Lookup by task id when polls never reported a generation id.
    async fn resolve_generation_id(&self, page: &dyn Page, task_id: &str) -> Result<Option<String>>;

    /// Share the artifact. Returns its public URL.
    async fn publish(&self, page: &dyn Page, request: &PublishRequest) -> Result<Option<String>>;

    /// Returns the URL of the watermark-free artifact.
    async fn remove_watermark(&self, job_id: i64, publish_url: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountCandidate {
    pub profile_id: i64,
}

#[async_trait::async_trait]
pub trait AccountDispatcher: Send + Sync {
    async fn pick_best_account(
        &self,
        group_title: Option<&str>,
        excluded_profile_ids: &[i64],
    ) -> Result<Option<AccountCandidate>>;
}
