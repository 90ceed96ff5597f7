//! `leasehold job ...`

use anyhow::{Context, Result};
use clap::ArgMatches;
use leasehold_core::{
    domain::{JobFilter, NewJob},
    JobStatus,
};
use serde_json::json;

use super::CommandContext;
use crate::cli::output::{emit, or_dash};

pub async fn run(ctx: &CommandContext, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("add", m)) => add(ctx, m).await,
        Some(("show", m)) => show(ctx, job_id(m)?).await,
        Some(("list", m)) => list(ctx, m).await,
        Some(("cancel", m)) => cancel(ctx, job_id(m)?).await,
        Some(("timeline", m)) => timeline(ctx, job_id(m)?).await,
        Some(("attempts", m)) => attempts(ctx, job_id(m)?, m.get_one::<i64>("run").copied()).await,
        _ => Err(anyhow::anyhow!("Unknown job subcommand")),
    }
}

fn job_id(matches: &ArgMatches) -> Result<i64> {
    matches
        .get_one::<i64>("job_id")
        .copied()
        .context("job id is required")
}

async fn add(ctx: &CommandContext, m: &ArgMatches) -> Result<()> {
    let profile_id = m
        .get_one::<i64>("profile")
        .copied()
        .context("--profile is required")?;
    let prompt = m
        .get_one::<String>("prompt")
        .context("--prompt is required")?;
    if prompt.trim().is_empty() {
        return Err(leasehold_core::Error::validation("prompt must not be empty").into());
    }

    let mut job = NewJob::new(profile_id, prompt.trim());
    job.image_url = m.get_one::<String>("image_url").cloned();
    if let Some(duration) = m.get_one::<String>("duration") {
        job.duration.clone_from(duration);
    }
    if let Some(aspect) = m.get_one::<String>("aspect_ratio") {
        job.aspect_ratio.clone_from(aspect);
    }
    if let Some(group) = m.get_one::<String>("group") {
        job = job.with_group(group.as_str());
    }
    if let Some(&priority) = m.get_one::<i64>("priority") {
        job = job.with_priority(priority);
    }

    let id = ctx.store.create_job(&job).await?;
    tracing::info!(job_id = id, profile_id, "job queued");
    emit(ctx.json, &json!({ "job_id": id }), || {
        vec![format!("Queued job {id} on profile {profile_id}")]
    });
    Ok(())
}

async fn show(ctx: &CommandContext, job_id: i64) -> Result<()> {
    let job = ctx.store.require_job(job_id).await?;
    let runs = ctx.store.list_runs(job_id).await?;
    emit(ctx.json, &json!({ "job": job, "runs": runs }), || {
        let mut lines = vec![
            format!("job {}  profile {}  {}/{}", job.id, job.profile_id, job.status, job.phase),
            format!("  progress     {}%", job.progress_pct),
            format!("  prompt       {}", job.prompt),
            format!("  task_id      {}", or_dash(job.task_id.as_ref())),
            format!("  generation   {}", or_dash(job.generation_id.as_ref())),
            format!("  publish_url  {}", or_dash(job.publish_url.as_ref())),
            format!("  permalink    {}", or_dash(job.publish_permalink.as_ref())),
            format!("  watermark    {}", or_dash(job.watermark_status.as_ref())),
            format!("  retry        index {} of root {}", job.retry_index, job.retry_root()),
            format!(
                "  recovery     reconnects {} phase retries {} last {}",
                job.session_reconnect_count,
                job.phase_retry_count,
                or_dash(job.last_recover_action.as_ref())
            ),
            format!("  error        {}", or_dash(job.error.as_ref())),
        ];
        lines.extend(runs.iter().map(|run| {
            format!(
                "  run {} attempt {} {} at {} class {}",
                run.id,
                run.attempt,
                run.status,
                run.phase,
                or_dash(run.error_class.as_ref())
            )
        }));
        lines
    });
    Ok(())
}

async fn list(ctx: &CommandContext, m: &ArgMatches) -> Result<()> {
    let status = m
        .get_one::<String>("status")
        .map(|s| s.parse::<JobStatus>())
        .transpose()?;
    let filter = JobFilter {
        status,
        profile_id: m.get_one::<i64>("profile").copied(),
        group_title: m.get_one::<String>("group").cloned(),
        limit: m.get_one::<i64>("limit").copied(),
    };
    let jobs = ctx.store.list_jobs(&filter).await?;
    emit(ctx.json, &jobs, || {
        if jobs.is_empty() {
            return vec!["No jobs".to_string()];
        }
        jobs.iter()
            .map(|job| {
                format!(
                    "{:>6}  profile {:<6} {:<10} {:<10} {:>3}%  {}",
                    job.id,
                    job.profile_id,
                    job.status.as_str(),
                    job.phase.as_str(),
                    job.progress_pct,
                    job.group_title.as_deref().unwrap_or("-")
                )
            })
            .collect()
    });
    Ok(())
}

async fn cancel(ctx: &CommandContext, job_id: i64) -> Result<()> {
    ctx.store.require_job(job_id).await?;
    let canceled = ctx.store.cancel_job(job_id).await?;
    emit(ctx.json, &json!({ "job_id": job_id, "canceled": canceled }), || {
        if canceled {
            vec![format!("Canceled job {job_id}")]
        } else {
            vec![format!("Job {job_id} already finished, nothing to cancel")]
        }
    });
    Ok(())
}

async fn timeline(ctx: &CommandContext, job_id: i64) -> Result<()> {
    ctx.store.require_job(job_id).await?;
    let events = ctx.store.list_timeline(job_id).await?;
    emit(ctx.json, &events, || {
        events
            .iter()
            .map(|event| {
                format!(
                    "{}  {:<18} run {:<5} {} -> {}  {}",
                    event.created_at.format("%Y-%m-%d %H:%M:%S"),
                    event.event_type.as_ref(),
                    or_dash(event.run_id.as_ref()),
                    or_dash(event.from_status.as_ref()),
                    or_dash(event.to_status.as_ref()),
                    event.payload
                )
            })
            .collect()
    });
    Ok(())
}

async fn attempts(ctx: &CommandContext, job_id: i64, run_id: Option<i64>) -> Result<()> {
    let run_id = match run_id {
        Some(id) => id,
        None => ctx
            .store
            .latest_run(job_id)
            .await?
            .map(|run| run.id)
            .ok_or_else(|| leasehold_core::Error::not_found(format!("no runs for job {job_id}")))?,
    };
    let attempts = ctx.store.list_phase_attempts(run_id).await?;
    let summary = ctx.store.summarize_phase_attempts(run_id).await?;
    emit(
        ctx.json,
        &json!({ "run_id": run_id, "attempts": attempts, "summary": summary }),
        || {
            let mut lines: Vec<String> = attempts
                .iter()
                .map(|a| {
                    format!(
                        "{:<10} #{} {:<7} {:<20} {}",
                        a.phase.as_str(),
                        a.attempt,
                        a.outcome.as_ref(),
                        or_dash(a.recover_action.as_ref()),
                        a.detail
                    )
                })
                .collect();
            lines.extend(summary.iter().map(|s| {
                format!(
                    "{:<10} attempts {} ok {} failed {}",
                    s.phase.as_str(),
                    s.attempts, s.successes, s.failures
                )
            }));
            lines
        },
    );
    Ok(())
}
