//! `leasehold recover`

use anyhow::Result;
use clap::ArgMatches;
use serde_json::json;

use super::CommandContext;
use crate::cli::output::emit;

pub async fn run(ctx: &CommandContext, matches: &ArgMatches) -> Result<()> {
    let reason = matches
        .get_one::<String>("reason")
        .map_or("engine restarted", String::as_str);
    let jobs = ctx.store.mark_unfinished_jobs(reason).await?;
    let leases = ctx.registry.sweep_expired().await?;
    tracing::info!(jobs, leases, reason, "crash recovery finished");
    emit(
        ctx.json,
        &json!({ "jobs_failed": jobs, "leases_swept": leases }),
        || vec![format!("Failed {jobs} unfinished job(s), swept {leases} expired lease(s)")],
    );
    Ok(())
}
