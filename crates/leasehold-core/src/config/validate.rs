//! Configuration validation

use super::EngineConfig;
use crate::{lease::MIN_LEASE_SECS, Error, Result};

impl EngineConfig {
    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any values are out of range or invalid
    pub fn validate(&self) -> Result<()> {
        if self.store.database_url.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "store.database_url cannot be empty".to_string(),
            ));
        }
        if self.store.max_connections < 1 {
            return Err(Error::InvalidConfig(
                "store.max_connections must be at least 1".to_string(),
            ));
        }
        if self.lease.lease_seconds < MIN_LEASE_SECS {
            return Err(Error::InvalidConfig(format!(
                "lease.lease_seconds must be at least {MIN_LEASE_SECS}"
            )));
        }
        let interval = i64::try_from(self.lease.heartbeat_interval_seconds).unwrap_or(i64::MAX);
        if interval < 1 || interval >= self.lease.lease_seconds {
            return Err(Error::InvalidConfig(
                "lease.heartbeat_interval_seconds must be 1..lease_seconds".to_string(),
            ));
        }
        if self.pool.workers < 1 {
            return Err(Error::InvalidConfig(
                "pool.workers must be at least 1".to_string(),
            ));
        }
        if !(self.progress.poll_interval_seconds > 0.0) {
            return Err(Error::InvalidConfig(
                "progress.poll_interval_seconds must be positive".to_string(),
            ));
        }
        if self.overload.max_retry_depth < 0 {
            return Err(Error::InvalidConfig(
                "overload.max_retry_depth cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_must_be_shorter_than_lease() {
        let mut config = EngineConfig::default();
        config.lease.heartbeat_interval_seconds = 120;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        config.lease.heartbeat_interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_lease_rejected() {
        let mut config = EngineConfig::default();
        config.lease.lease_seconds = 5;
        config.lease.heartbeat_interval_seconds = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_workers_and_nan_poll_rejected() {
        let mut config = EngineConfig::default();
        config.pool.workers = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.progress.poll_interval_seconds = f64::NAN;
        assert!(config.validate().is_err());
    }
}
