//! Sync-layer tunables.
//!
//! # Invariants
//! - A `SyncConfig` value never holds a zero duration.
//! - Defaults are a 5 minute cache TTL and a 1 second write quiet period.

use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    ZeroDuration(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid sync config: {err}"),
            Self::ZeroDuration(field) => write!(f, "sync config `{field}` must be greater than zero"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::ZeroDuration(_) => None,
        }
    }
}

/// Runtime configuration for the cache and write coalescer.
///
/// Only built through `Default`, `new` or `from_json_str`, so both durations
/// are always non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    cache_ttl: Duration,
    quiet_period: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            quiet_period: DEFAULT_QUIET_PERIOD,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawSyncConfig {
    cache_ttl_ms: Option<u64>,
    quiet_period_ms: Option<u64>,
}

impl SyncConfig {
    pub fn new(cache_ttl: Duration, quiet_period: Duration) -> Result<Self, ConfigError> {
        let config = Self {
            cache_ttl,
            quiet_period,
        };
        config.validate()?;
        Ok(config)
    }

    /// Maximum age of a cache entry before reads treat it as absent.
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Delay without further edits before a coalesced write flushes.
    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Parses `{"cacheTtlMs": .., "quietPeriodMs": ..}`; absent keys keep defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let parsed: RawSyncConfig = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        let defaults = Self::default();
        Self::new(
            parsed
                .cache_ttl_ms
                .map_or(defaults.cache_ttl, Duration::from_millis),
            parsed
                .quiet_period_ms
                .map_or(defaults.quiet_period, Duration::from_millis),
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::ZeroDuration("cacheTtlMs"));
        }
        if self.quiet_period.is_zero() {
            return Err(ConfigError::ZeroDuration("quietPeriodMs"));
        }
        Ok(())
    }
}
