//! Configuration loading from files and environment.
//!
//! 1. Built-in defaults
//! 2. An explicit file, or the global config: <config dir>/leasehold/config.toml
//! 3. Environment variables: `LEASEHOLD_*`

use std::path::{Path, PathBuf};

use super::{EngineConfig, HeartbeatPolicy};
use crate::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════
// PUBLIC API
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration from all sources.
///
/// `explicit` must exist when given. The global file is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<EngineConfig> {
    let config = match explicit {
        Some(path) => load_toml_file(path)?,
        None => match global_config_path() {
            Some(path) if path.exists() => load_toml_file(&path)?,
            _ => EngineConfig::default(),
        },
    };

    let config = config.apply_env_vars()?;
    config.validate()?;
    Ok(config)
}

/// Get path to global config file
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "leasehold")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load a TOML file. Missing sections fall back to defaults.
pub fn load_toml_file(path: &Path) -> Result<EngineConfig> {
    if path.is_dir() {
        return Err(Error::Io(format!(
            "Config path is a directory, not a file: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("Failed to read config file {}: {e}", path.display())))?;

    toml::from_str(&content).map_err(|e| {
        Error::InvalidConfig(format!(
            "Failed to parse config file {}: {e}",
            path.display()
        ))
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// ENVIRONMENT OVERRIDES
// ═══════════════════════════════════════════════════════════════════════════

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::InvalidConfig(format!("{name} has an invalid value: '{value}'"))),
        Err(_) => Ok(None),
    }
}

impl EngineConfig {
    /// Apply `LEASEHOLD_*` overrides.
    pub fn apply_env_vars(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var("LEASEHOLD_DATABASE_URL") {
            if value.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "LEASEHOLD_DATABASE_URL cannot be empty - unset the variable or provide a url"
                        .to_string(),
                ));
            }
            self.store.database_url = value;
        }
        if let Some(value) = env_parse("LEASEHOLD_LEASE_SECONDS")? {
            self.lease.lease_seconds = value;
        }
        if let Some(value) = env_parse("LEASEHOLD_HEARTBEAT_INTERVAL_SECONDS")? {
            self.lease.heartbeat_interval_seconds = value;
        }
        if let Ok(value) = std::env::var("LEASEHOLD_HEARTBEAT_POLICY") {
            self.lease.heartbeat_policy = match value.trim().to_ascii_lowercase().as_str() {
                "strict" => HeartbeatPolicy::Strict,
                "lenient" => HeartbeatPolicy::Lenient,
                other => {
                    return Err(Error::InvalidConfig(format!(
                        "LEASEHOLD_HEARTBEAT_POLICY must be strict or lenient, got '{other}'"
                    )))
                }
            };
        }
        if let Some(value) = env_parse("LEASEHOLD_WORKERS")? {
            self.pool.workers = value;
        }
        if let Some(value) = env_parse("LEASEHOLD_WATERMARK_FALLBACK")? {
            self.watermark.fallback_on_failure = value;
        }
        Ok(self)
    }
}
