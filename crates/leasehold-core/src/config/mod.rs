//! Engine configuration.
//!
//! Loaded in layers (see [`load`]): built-in defaults, then an optional TOML
//! file, then `LEASEHOLD_*` environment overrides, then [`EngineConfig::validate`].

mod load;
mod validate;

use serde::{Deserialize, Serialize};

pub use load::{global_config_path, load_config, load_toml_file};

/// Behavior when a heartbeat finds the lease owned by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatPolicy {
    /// Fail the run at the next phase-loop boundary.
    Strict,
    /// Log the loss and keep running.
    Lenient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub lease_seconds: i64,
    pub heartbeat_interval_seconds: u64,
    pub heartbeat_policy: HeartbeatPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub timeout_seconds: u64,
    pub poll_interval_seconds: f64,
    pub drafts_fetch_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    pub fallback_on_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverloadConfig {
    pub max_retry_depth: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    pub drafts_url: String,
    pub settle_millis: u64,
    pub navigate_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub permalink_host: String,
}

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub lease: LeaseConfig,
    pub pool: PoolConfig,
    pub progress: ProgressConfig,
    pub watermark: WatermarkConfig,
    pub overload: OverloadConfig,
    pub submit: SubmitConfig,
    pub publish: PublishConfig,
}

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULT IMPLEMENTATIONS
// ═══════════════════════════════════════════════════════════════════════════

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/leasehold.db".to_string(),
            max_connections: 4,
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_seconds: 120,
            heartbeat_interval_seconds: 40,
            heartbeat_policy: HeartbeatPolicy::Strict,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { workers: 2 }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30 * 60,
            poll_interval_seconds: 6.0,
            drafts_fetch_interval_seconds: 5 * 60,
        }
    }
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            fallback_on_failure: true,
        }
    }
}

impl Default for OverloadConfig {
    fn default() -> Self {
        Self { max_retry_depth: 3 }
    }
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            drafts_url: "https://sora.chatgpt.com/drafts".to_string(),
            settle_millis: 1200,
            navigate_timeout_seconds: 40,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            permalink_host: "sora.chatgpt.com".to_string(),
        }
    }
}
