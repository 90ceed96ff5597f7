//! Command handlers. Each opens the store through [`CommandContext`] and
//! renders its result with [`crate::cli::output::emit`].

mod init;
mod job;
mod lease;
mod recover;

use std::path::Path;

use anyhow::{Context, Result};
use clap::ArgMatches;
use leasehold_core::{config::load_config, EngineConfig, JobStore, ProfileRegistry};

/// Shared state for one command invocation.
pub struct CommandContext {
    pub store: JobStore,
    pub registry: ProfileRegistry,
    pub json: bool,
}

/// Load config from `--config` (or the global file), then apply `--database`.
pub fn resolve_config(matches: &ArgMatches) -> Result<EngineConfig> {
    let explicit = matches.get_one::<String>("config").map(Path::new);
    let mut config = load_config(explicit).context("Failed to load configuration")?;
    if let Some(url) = matches.get_one::<String>("database") {
        config.store.database_url.clone_from(url);
    }
    Ok(config)
}

impl CommandContext {
    pub async fn open(matches: &ArgMatches) -> Result<Self> {
        let config = resolve_config(matches)?;
        let store = JobStore::connect(&config.store.database_url, config.store.max_connections)
            .await?;
        let registry = ProfileRegistry::new(store.pool().clone());
        Ok(Self {
            store,
            registry,
            json: matches.get_flag("json"),
        })
    }
}

/// Route the parsed command line to its handler.
pub async fn dispatch(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("init", _)) => init::run(matches).await,
        Some(("job", sub)) => {
            let ctx = CommandContext::open(matches).await?;
            job::run(&ctx, sub).await
        }
        Some(("lease", sub)) => {
            let ctx = CommandContext::open(matches).await?;
            lease::run(&ctx, sub).await
        }
        Some(("recover", sub)) => {
            let ctx = CommandContext::open(matches).await?;
            recover::run(&ctx, sub).await
        }
        Some((other, _)) => Err(anyhow::anyhow!("Unknown command: {other}")),
        None => Err(anyhow::anyhow!("No command given")),
    }
}
