//! `leasehold init`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ArgMatches;
use leasehold_core::JobStore;
use serde_json::json;

use super::resolve_config;
use crate::cli::output::emit;

/// Filesystem path of a `sqlite:` URL, or `None` for in-memory databases.
pub fn sqlite_file_path(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

pub async fn run(matches: &ArgMatches) -> Result<()> {
    let config = resolve_config(matches)?;
    let url = config.store.database_url.clone();

    if let Some(parent) = sqlite_file_path(&url)
        .as_deref()
        .and_then(std::path::Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let store = JobStore::connect(&url, config.store.max_connections).await?;
    store.init().await?;
    tracing::info!(database = %url, "database initialized");

    emit(
        matches.get_flag("json"),
        &json!({ "database_url": url }),
        || vec![format!("Initialized {url}")],
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_file_path() {
        assert_eq!(
            sqlite_file_path("sqlite://data/leasehold.db"),
            Some(PathBuf::from("data/leasehold.db"))
        );
        assert_eq!(
            sqlite_file_path("sqlite:/tmp/a.db?mode=rwc"),
            Some(PathBuf::from("/tmp/a.db"))
        );
        assert_eq!(sqlite_file_path("sqlite::memory:"), None);
        assert_eq!(sqlite_file_path("postgres://x"), None);
    }
}
