//! Configuration Module
//!
//! Cache settings, with defaults and environment variable overrides.

use std::env;
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Default upper bound on how long the sweeper sleeps with nothing pending.
pub const DEFAULT_MAX_IDLE_SLEEP: Duration = Duration::from_secs(60 * 60);

/// Default sleep used when the earliest deadline has already passed.
pub const DEFAULT_OVERDUE_SLEEP: Duration = Duration::from_micros(1);

/// Cache configuration.
///
/// Everything except the sweeper timings can also be changed on a running
/// cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL applied to entries stored with `Ttl::Global`; `None` disables it
    pub global_ttl: Option<Duration>,
    /// Whether reads leave deadlines untouched
    pub skip_ttl_extension_on_read: bool,
    /// Longest sleep of the sweeper when no deadline is pending
    pub max_idle_sleep: Duration,
    /// Sleep used when the head of the queue is already overdue
    pub overdue_sleep: Duration,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `TTL_CACHE_GLOBAL_TTL_MS` - Global TTL in milliseconds, 0 disables it (default: 0)
    /// - `TTL_CACHE_SKIP_TTL_EXTENSION` - Skip TTL extension on reads (default: false)
    /// - `TTL_CACHE_MAX_IDLE_SLEEP_MS` - Idle sweeper sleep in milliseconds (default: 3600000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            global_ttl: env_var::<u64>("TTL_CACHE_GLOBAL_TTL_MS")
                .map(Duration::from_millis)
                .filter(|ttl| !ttl.is_zero()),
            skip_ttl_extension_on_read: env_var("TTL_CACHE_SKIP_TTL_EXTENSION")
                .unwrap_or(defaults.skip_ttl_extension_on_read),
            max_idle_sleep: env_var("TTL_CACHE_MAX_IDLE_SLEEP_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_idle_sleep),
            overdue_sleep: defaults.overdue_sleep,
        }
    }

    /// Sets the global TTL. `Duration::ZERO` disables it.
    pub fn with_global_ttl(mut self, ttl: Duration) -> Self {
        self.global_ttl = (!ttl.is_zero()).then_some(ttl);
        self
    }

    pub fn with_skip_ttl_extension_on_read(mut self, skip: bool) -> Self {
        self.skip_ttl_extension_on_read = skip;
        self
    }

    pub fn with_max_idle_sleep(mut self, sleep: Duration) -> Self {
        self.max_idle_sleep = sleep;
        self
    }

    pub fn with_overdue_sleep(mut self, sleep: Duration) -> Self {
        self.overdue_sleep = sleep;
        self
    }

    /// Checks the sweeper timings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_idle_sleep.is_zero() {
            return Err(CacheError::InvalidConfig(
                "max_idle_sleep must be greater than zero".to_string(),
            ));
        }
        if self.overdue_sleep.is_zero() {
            return Err(CacheError::InvalidConfig(
                "overdue_sleep must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            global_ttl: None,
            skip_ttl_extension_on_read: false,
            max_idle_sleep: DEFAULT_MAX_IDLE_SLEEP,
            overdue_sleep: DEFAULT_OVERDUE_SLEEP,
        }
    }
}

fn env_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.global_ttl, None);
        assert!(!config.skip_ttl_extension_on_read);
        assert_eq!(config.max_idle_sleep, Duration::from_secs(3600));
        assert_eq!(config.overdue_sleep, Duration::from_micros(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_env() {
        env::set_var("TTL_CACHE_GLOBAL_TTL_MS", "250");
        env::set_var("TTL_CACHE_SKIP_TTL_EXTENSION", "true");
        env::set_var("TTL_CACHE_MAX_IDLE_SLEEP_MS", "not-a-number");

        let config = CacheConfig::from_env();
        assert_eq!(config.global_ttl, Some(Duration::from_millis(250)));
        assert!(config.skip_ttl_extension_on_read);
        assert_eq!(config.max_idle_sleep, DEFAULT_MAX_IDLE_SLEEP);

        env::set_var("TTL_CACHE_GLOBAL_TTL_MS", "0");
        assert_eq!(CacheConfig::from_env().global_ttl, None);

        env::remove_var("TTL_CACHE_GLOBAL_TTL_MS");
        env::remove_var("TTL_CACHE_SKIP_TTL_EXTENSION");
        env::remove_var("TTL_CACHE_MAX_IDLE_SLEEP_MS");
        assert_eq!(CacheConfig::from_env(), CacheConfig::default());
    }

    #[test]
    fn test_builder_chaining() {
        let config = CacheConfig::default()
            .with_global_ttl(Duration::from_secs(5))
            .with_skip_ttl_extension_on_read(true)
            .with_max_idle_sleep(Duration::from_secs(10));
        assert_eq!(config.global_ttl, Some(Duration::from_secs(5)));
        assert!(config.skip_ttl_extension_on_read);
        assert_eq!(config.max_idle_sleep, Duration::from_secs(10));

        let config = config.with_global_ttl(Duration::ZERO);
        assert_eq!(config.global_ttl, None);
    }

    #[test]
    fn test_validate_rejects_zero_sleeps() {
        let config = CacheConfig::default().with_max_idle_sleep(Duration::ZERO);
        assert!(matches!(config.validate(), Err(CacheError::InvalidConfig(_))));

        let config = CacheConfig::default().with_overdue_sleep(Duration::ZERO);
        assert!(matches!(config.validate(), Err(CacheError::InvalidConfig(_))));
    }
}
