//! `leasehold lease ...`

use anyhow::{Context, Result};
use chrono::Utc;
use clap::ArgMatches;
use leasehold_core::lease::ProfileLeaseState;
use serde_json::json;

use super::CommandContext;
use crate::cli::output::{emit, or_dash};

pub async fn run(ctx: &CommandContext, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("list", _)) => list(ctx).await,
        Some(("show", m)) => show(ctx, profile_id(m)?).await,
        Some(("release", m)) => release(ctx, profile_id(m)?).await,
        Some(("sweep", _)) => sweep(ctx).await,
        _ => Err(anyhow::anyhow!("Unknown lease subcommand")),
    }
}

fn profile_id(matches: &ArgMatches) -> Result<i64> {
    matches
        .get_one::<i64>("profile_id")
        .copied()
        .context("profile id is required")
}

fn describe(state: &ProfileLeaseState) -> String {
    if !state.locked {
        return format!("profile {} unlocked", state.profile_id);
    }
    let live = if state.is_live(Utc::now()) { "live" } else { "expired" };
    format!(
        "profile {} {live} owner run {} actor {} until {}",
        state.profile_id,
        or_dash(state.owner_run_id.as_ref()),
        or_dash(state.actor_id.as_ref()),
        state
            .lease_until
            .map_or_else(|| "-".to_string(), |t| t.format("%H:%M:%S").to_string())
    )
}

async fn list(ctx: &CommandContext) -> Result<()> {
    let leases = ctx.registry.list_active().await?;
    emit(ctx.json, &leases, || {
        if leases.is_empty() {
            vec!["No live leases".to_string()]
        } else {
            leases.iter().map(describe).collect()
        }
    });
    Ok(())
}

async fn show(ctx: &CommandContext, profile_id: i64) -> Result<()> {
    let state = ctx.registry.get_state(profile_id).await?;
    emit(ctx.json, &state, || vec![describe(&state)]);
    Ok(())
}

async fn release(ctx: &CommandContext, profile_id: i64) -> Result<()> {
    let released = ctx.registry.force_release(profile_id).await?;
    if released {
        tracing::warn!(profile_id, "lease force-released by operator");
    }
    emit(
        ctx.json,
        &json!({ "profile_id": profile_id, "released": released }),
        || {
            if released {
                vec![format!("Released profile {profile_id}")]
            } else {
                vec![format!("Profile {profile_id} held no lease")]
            }
        },
    );
    Ok(())
}

async fn sweep(ctx: &CommandContext) -> Result<()> {
    let removed = ctx.registry.sweep_expired().await?;
    emit(ctx.json, &json!({ "removed": removed }), || {
        vec![format!("Removed {removed} expired lease(s)")]
    });
    Ok(())
}
