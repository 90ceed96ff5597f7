//! Phase bodies: submit, progress, publish, watermark.

use std::{sync::OnceLock, time::Duration};

use regex::Regex;
use serde_json::json;
use tokio::time::Instant;

use super::{Artifacts, JobEngine, RunContext};
use crate::{
    domain::{JobPatch, NewTimelineEvent, TimelineEventType, WatermarkStatus},
    engine::state_machine::Phase,
    session::{Page, SafePageOps},
    workflows::{PublishRequest, SubmitRequest, TaskState},
    Error, Result,
};

/// Watermark failures that must fail the job even when fallback is enabled.
const FALLBACK_INELIGIBLE_MARKERS: &[&str] = &[
    "watermark removal disabled",
    "parse service returned share link",
    "job timed out",
];

// ═══════════════════════════════════════════════════════════════════════════
// PURE HELPERS
// ═══════════════════════════════════════════════════════════════════════════

#[must_use]
pub fn frames_for_duration(duration: &str) -> u32 {
    match duration.trim() {
        "15s" => 450,
        "25s" => 750,
        _ => 300,
    }
}

/// The remote service rejected the submit because it is saturated.
#[must_use]
pub fn is_overload_error(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("heavy load") || lowered.contains("heavy_load")
}

#[must_use]
pub fn watermark_fallback_eligible(text: &str) -> bool {
    let lowered = text.to_lowercase();
    !FALLBACK_INELIGIBLE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// `max(last, clamp(reported, 0, 99))`. Missing or non-finite reports count as 0.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn clamp_progress(last: i64, reported: Option<f64>) -> i64 {
    let reported = reported
        .filter(|p| p.is_finite())
        .map_or(0, |p| p.clamp(0.0, 99.0) as i64);
    last.max(reported)
}

/// Share id from `/p/<id>`, falling back to a bare `s_<id>` token.
#[must_use]
pub fn extract_post_id(url: &str) -> Option<String> {
    static PATH_RE: OnceLock<Option<Regex>> = OnceLock::new();
    static TOKEN_RE: OnceLock<Option<Regex>> = OnceLock::new();

    let path_re = PATH_RE.get_or_init(|| Regex::new(r"/p/([a-zA-Z0-9_]+)").ok());
    let token_re = TOKEN_RE.get_or_init(|| Regex::new(r"(s_[a-zA-Z0-9_]+)").ok());

    [path_re, token_re].into_iter().find_map(|re| {
        re.as_ref()
            .and_then(|re| re.captures(url))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}

/// Canonical `https://<host>/p/...` link, or `None` for anything else.
#[must_use]
pub fn build_permalink(url: &str, host: &str) -> Option<String> {
    static URL_RE: OnceLock<Option<Regex>> = OnceLock::new();

    let text = url.trim();
    if text.is_empty() {
        return None;
    }
    if text.starts_with("/p/") {
        return Some(format!("https://{host}{text}"));
    }

    let url_re = URL_RE.get_or_init(|| Regex::new(r"^https?://([^/?#]+)(/[^?#]*)?").ok());
    let caps = url_re.as_ref()?.captures(text)?;
    let netloc = caps.get(1)?.as_str();
    let path = caps.get(2).map_or("", |m| m.as_str());
    (netloc == host && path.starts_with("/p/")).then(|| format!("https://{host}{path}"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// ═══════════════════════════════════════════════════════════════════════════
// PHASES
// ═══════════════════════════════════════════════════════════════════════════

impl JobEngine {
    /// Execute one attempt of `phase`. Returns the next phase.
    pub(super) async fn run_phase(
        &self,
        ctx: &RunContext,
        phase: Phase,
        page: &SafePageOps,
        artifacts: &mut Artifacts,
    ) -> Result<Phase> {
        match phase {
            Phase::Submit => self.phase_submit(ctx, page, artifacts).await,
            Phase::Progress => self.phase_progress(ctx, page, artifacts).await,
            Phase::Publish => self.phase_publish(ctx, page, artifacts).await,
            Phase::Watermark => self.phase_watermark(ctx, artifacts).await,
            other => Err(Error::validation(format!("phase {other} is not executable"))),
        }
    }

    async fn phase_submit(
        &self,
        ctx: &RunContext,
        page: &SafePageOps,
        artifacts: &mut Artifacts,
    ) -> Result<Phase> {
        let job = self.store.require_job(ctx.job_id).await?;
        let prompt = job.prompt.trim();
        if prompt.is_empty() {
            return Err(Error::validation("prompt cannot be empty"));
        }

        let submit = &self.config.submit;
        page.navigate(
            &submit.drafts_url,
            Duration::from_secs(submit.navigate_timeout_seconds),
        )
        .await?;
        if submit.settle_millis > 0 {
            page.wait(Duration::from_millis(submit.settle_millis)).await?;
        }

        let request = SubmitRequest {
            prompt: prompt.to_string(),
            image_url: non_empty(job.image_url.clone()),
            aspect_ratio: non_empty(Some(job.aspect_ratio.clone()))
                .unwrap_or_else(|| "landscape".to_string()),
            n_frames: frames_for_duration(&job.duration),
        };
        let outcome = self.workflows.submit(page, &request).await?;

        let Some(task_id) = non_empty(outcome.task_id) else {
            return Err(Error::workflow(
                non_empty(outcome.error).unwrap_or_else(|| "submit failed".to_string()),
            ));
        };

        let access_token = match non_empty(outcome.access_token) {
            Some(token) => token,
            None => non_empty(self.workflows.read_access_token(page).await?).ok_or_else(|| {
                Error::workflow("submit succeeded but no access token was captured")
            })?,
        };

        artifacts.task_id = Some(task_id.clone());
        artifacts.access_token = Some(access_token);
        artifacts.progress = artifacts.progress.max(1);

        self.store
            .update_job(
                ctx.job_id,
                &JobPatch {
                    task_id: Some(Some(task_id.clone())),
                    progress_pct: Some(artifacts.progress),
                    ..JobPatch::default()
                },
            )
            .await?;
        self.store
            .append_timeline(
                &NewTimelineEvent::new(ctx.job_id, Some(ctx.run_id), TimelineEventType::SubmitOk)
                    .in_phase(Phase::Submit)
                    .with_payload(json!({ "task_id": task_id })),
            )
            .await?;
        tracing::info!(job_id = ctx.job_id, run_id = ctx.run_id, task_id = %task_id, "submitted");
        Ok(Phase::Progress)
    }

    async fn phase_progress(
        &self,
        ctx: &RunContext,
        page: &SafePageOps,
        artifacts: &mut Artifacts,
    ) -> Result<Phase> {
        let task_id = match non_empty(artifacts.task_id.clone()) {
            Some(task_id) => task_id,
            None => non_empty(self.store.require_job(ctx.job_id).await?.task_id)
                .ok_or_else(|| Error::workflow("missing task_id, cannot poll"))?,
        };
        let access_token = match non_empty(artifacts.access_token.clone()) {
            Some(token) => token,
            None => non_empty(self.workflows.read_access_token(page).await?)
                .ok_or_else(|| Error::workflow("missing access token, cannot poll"))?,
        };
        artifacts.access_token = Some(access_token.clone());

        let progress = &self.config.progress;
        let timeout = Duration::from_secs(progress.timeout_seconds);
        let poll_interval = Duration::from_secs_f64(progress.poll_interval_seconds.max(0.0));
        let drafts_interval = Duration::from_secs(progress.drafts_fetch_interval_seconds);
        let mut last_drafts_fetch: Option<Instant> = None;
        let mut generation_id = non_empty(artifacts.generation_id.clone());

        loop {
            if self.store.is_canceled(ctx.job_id).await? {
                return Err(Error::Canceled);
            }
            ctx.ensure_lease()?;
            if ctx.started.elapsed() >= timeout {
                return Err(Error::workflow(format!(
                    "task polling timed out (>{}s)",
                    progress.timeout_seconds
                )));
            }

            let fetch_drafts = last_drafts_fetch.map_or(true, |at| at.elapsed() >= drafts_interval);
            if fetch_drafts {
                last_drafts_fetch = Some(Instant::now());
            }

            let state = self
                .workflows
                .poll(page, &task_id, &access_token, fetch_drafts)
                .await?;

            artifacts.progress = clamp_progress(artifacts.progress, state.progress);
            if let Some(id) = non_empty(state.generation_id) {
                generation_id = Some(id);
            }
            self.store
                .update_job(
                    ctx.job_id,
                    &JobPatch {
                        progress_pct: Some(artifacts.progress),
                        generation_id: generation_id.clone().map(Some),
                        ..JobPatch::default()
                    },
                )
                .await?;
            tracing::debug!(
                job_id = ctx.job_id,
                progress = artifacts.progress,
                state = ?state.state,
                "task polled"
            );

            match state.state {
                TaskState::Failed => {
                    return Err(Error::workflow(
                        non_empty(state.error).unwrap_or_else(|| "generation task failed".to_string()),
                    ))
                }
                TaskState::Completed => break,
                TaskState::Pending | TaskState::Running => page.wait(poll_interval).await?,
            }
        }

        if generation_id.is_none() {
            generation_id = non_empty(self.workflows.resolve_generation_id(page, &task_id).await?);
        }
        let generation_id =
            generation_id.ok_or_else(|| Error::workflow("generation id was never captured"))?;

        artifacts.generation_id = Some(generation_id.clone());
        artifacts.progress = artifacts.progress.max(80);
        self.store
            .update_job(
                ctx.job_id,
                &JobPatch {
                    generation_id: Some(Some(generation_id)),
                    progress_pct: Some(artifacts.progress),
                    ..JobPatch::default()
                },
            )
            .await?;
        Ok(Phase::Publish)
    }

    async fn phase_publish(
        &self,
        ctx: &RunContext,
        page: &SafePageOps,
        artifacts: &mut Artifacts,
    ) -> Result<Phase> {
        let job = self.store.require_job(ctx.job_id).await?;
        let task_id = non_empty(artifacts.task_id.clone()).or_else(|| non_empty(job.task_id.clone()));
        let generation_id = non_empty(artifacts.generation_id.clone())
            .or_else(|| non_empty(job.generation_id.clone()))
            .ok_or_else(|| Error::workflow("missing generation_id, cannot publish"))?;

        let request = PublishRequest {
            profile_id: ctx.profile_id,
            task_id,
            generation_id,
            prompt: job.prompt.clone(),
            created_after: job.started_at,
        };
        let publish_url = non_empty(self.workflows.publish(page, &request).await?)
            .ok_or_else(|| Error::workflow("publish returned no link"))?;

        let post_id = extract_post_id(&publish_url);
        let permalink = build_permalink(&publish_url, &self.config.publish.permalink_host);
        artifacts.publish_url = Some(publish_url.clone());
        artifacts.progress = artifacts.progress.max(90);

        self.store
            .update_job(
                ctx.job_id,
                &JobPatch {
                    publish_url: Some(Some(publish_url.clone())),
                    publish_post_id: Some(post_id),
                    publish_permalink: Some(permalink),
                    progress_pct: Some(artifacts.progress),
                    watermark_status: Some(Some(WatermarkStatus::Queued)),
                    ..JobPatch::default()
                },
            )
            .await?;
        self.store
            .append_timeline(
                &NewTimelineEvent::new(ctx.job_id, Some(ctx.run_id), TimelineEventType::PublishOk)
                    .in_phase(Phase::Publish)
                    .with_payload(json!({ "publish_url": publish_url })),
            )
            .await?;
        Ok(Phase::Watermark)
    }

    async fn phase_watermark(&self, ctx: &RunContext, artifacts: &mut Artifacts) -> Result<Phase> {
        let publish_url = match non_empty(artifacts.publish_url.clone()) {
            Some(url) => url,
            None => non_empty(self.store.require_job(ctx.job_id).await?.publish_url)
                .ok_or_else(|| Error::workflow("missing publish link, cannot remove watermark"))?,
        };

        match self.workflows.remove_watermark(ctx.job_id, &publish_url).await {
            Ok(watermark_url) => {
                artifacts.progress = 100;
                self.store
                    .update_job(
                        ctx.job_id,
                        &JobPatch {
                            watermark_url: Some(Some(watermark_url.clone())),
                            watermark_status: Some(Some(WatermarkStatus::Completed)),
                            progress_pct: Some(100),
                            ..JobPatch::default()
                        },
                    )
                    .await?;
                self.store
                    .append_timeline(
                        &NewTimelineEvent::new(
                            ctx.job_id,
                            Some(ctx.run_id),
                            TimelineEventType::WatermarkOk,
                        )
                        .in_phase(Phase::Watermark)
                        .with_payload(json!({ "watermark_url": watermark_url })),
                    )
                    .await?;
                Ok(Phase::Done)
            }
            Err(err) => {
                let reason = err.to_string();
                if !(self.config.watermark.fallback_on_failure
                    && watermark_fallback_eligible(&reason))
                {
                    self.store
                        .update_job(
                            ctx.job_id,
                            &JobPatch {
                                watermark_status: Some(Some(WatermarkStatus::Failed)),
                                watermark_error: Some(Some(reason)),
                                ..JobPatch::default()
                            },
                        )
                        .await?;
                    return Err(err);
                }

                artifacts.progress = 100;
                self.store
                    .update_job(
                        ctx.job_id,
                        &JobPatch {
                            watermark_url: Some(Some(publish_url.clone())),
                            watermark_status: Some(Some(WatermarkStatus::Fallback)),
                            watermark_error: Some(Some(reason.clone())),
                            error: Some(None),
                            progress_pct: Some(100),
                            ..JobPatch::default()
                        },
                    )
                    .await?;
                self.store
                    .append_timeline(
                        &NewTimelineEvent::new(
                            ctx.job_id,
                            Some(ctx.run_id),
                            TimelineEventType::WatermarkFallback,
                        )
                        .in_phase(Phase::Watermark)
                        .with_payload(json!({ "reason": reason, "publish_url": publish_url })),
                    )
                    .await?;
                tracing::warn!(
                    job_id = ctx.job_id,
                    run_id = ctx.run_id,
                    reason = %reason,
                    "watermark removal failed, using publish url"
                );
                Ok(Phase::Done)
            }
        }
    }
}
