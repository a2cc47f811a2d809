//! Coordinator configuration.
//!
//! Durations are stored as integer seconds or milliseconds so the struct can
//! be deserialized from any config source; accessor methods return
//! [`Duration`]s.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LeaseError, Result};

const DEFAULT_LEASE_DURATION_SECS: u64 = 120;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RELEASE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_QUERY_TIMEOUT_MS: u64 = 8_000;
const DEFAULT_MAX_ACQUIRE_ATTEMPTS: u32 = 3;
const DEFAULT_MAX_RELEASE_ATTEMPTS: u32 = 2;
const DEFAULT_BACKOFF_STEP_MS: u64 = 1_000;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

fn default_lease_duration_secs() -> u64 {
    DEFAULT_LEASE_DURATION_SECS
}

fn default_acquire_timeout_ms() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT_MS
}

fn default_release_timeout_ms() -> u64 {
    DEFAULT_RELEASE_TIMEOUT_MS
}

fn default_query_timeout_ms() -> u64 {
    DEFAULT_QUERY_TIMEOUT_MS
}

fn default_max_acquire_attempts() -> u32 {
    DEFAULT_MAX_ACQUIRE_ATTEMPTS
}

fn default_max_release_attempts() -> u32 {
    DEFAULT_MAX_RELEASE_ATTEMPTS
}

fn default_backoff_step_ms() -> u64 {
    DEFAULT_BACKOFF_STEP_MS
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

/// Lease coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Age after which a lease no longer blocks other editors.
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,

    /// Deadline for a whole acquire, retries included.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Deadline for a whole release, retries included.
    #[serde(default = "default_release_timeout_ms")]
    pub release_timeout_ms: u64,

    /// Deadline for a lock query.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Attempts an acquire makes before giving up on transient failures.
    #[serde(default = "default_max_acquire_attempts")]
    pub max_acquire_attempts: u32,

    /// Attempts a release makes before giving up on transient failures.
    #[serde(default = "default_max_release_attempts")]
    pub max_release_attempts: u32,

    /// Linear backoff unit; attempt `n` waits `n * backoff_step`.
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,

    /// Period of the background sweeper.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_duration_secs: DEFAULT_LEASE_DURATION_SECS,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            release_timeout_ms: DEFAULT_RELEASE_TIMEOUT_MS,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
            max_acquire_attempts: DEFAULT_MAX_ACQUIRE_ATTEMPTS,
            max_release_attempts: DEFAULT_MAX_RELEASE_ATTEMPTS,
            backoff_step_ms: DEFAULT_BACKOFF_STEP_MS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl LeaseConfig {
    /// Loads configuration from `ROSTER_LEASE_*` environment variables.
    ///
    /// Unset or blank variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed, or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`LeaseConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let mut config = Self::default();

        if let Some(v) = vars.u64("ROSTER_LEASE_DURATION_SECS")? {
            config.lease_duration_secs = v;
        }
        if let Some(v) = vars.u64("ROSTER_LEASE_ACQUIRE_TIMEOUT_MS")? {
            config.acquire_timeout_ms = v;
        }
        if let Some(v) = vars.u64("ROSTER_LEASE_RELEASE_TIMEOUT_MS")? {
            config.release_timeout_ms = v;
        }
        if let Some(v) = vars.u64("ROSTER_LEASE_QUERY_TIMEOUT_MS")? {
            config.query_timeout_ms = v;
        }
        if let Some(v) = vars.u32("ROSTER_LEASE_MAX_ACQUIRE_ATTEMPTS")? {
            config.max_acquire_attempts = v;
        }
        if let Some(v) = vars.u32("ROSTER_LEASE_MAX_RELEASE_ATTEMPTS")? {
            config.max_release_attempts = v;
        }
        if let Some(v) = vars.u64("ROSTER_LEASE_BACKOFF_STEP_MS")? {
            config.backoff_step_ms = v;
        }
        if let Some(v) = vars.u64("ROSTER_LEASE_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval_secs = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Returns a copy with a different lease duration.
    #[must_use]
    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration_secs = lease_duration.as_secs();
        self
    }

    /// Checks that every duration and attempt budget is non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::InvalidInput`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("lease_duration_secs", self.lease_duration_secs),
            ("acquire_timeout_ms", self.acquire_timeout_ms),
            ("release_timeout_ms", self.release_timeout_ms),
            ("query_timeout_ms", self.query_timeout_ms),
            ("sweep_interval_secs", self.sweep_interval_secs),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, v)| *v == 0) {
            return Err(LeaseError::InvalidInput(format!(
                "{name} must be greater than 0"
            )));
        }
        if self.max_acquire_attempts == 0 {
            return Err(LeaseError::InvalidInput(
                "max_acquire_attempts must be greater than 0".to_string(),
            ));
        }
        if self.max_release_attempts == 0 {
            return Err(LeaseError::InvalidInput(
                "max_release_attempts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Age after which a lease stops blocking.
    #[must_use]
    pub const fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    /// Acquire deadline.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Release deadline.
    #[must_use]
    pub const fn release_timeout(&self) -> Duration {
        Duration::from_millis(self.release_timeout_ms)
    }

    /// Query deadline.
    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Backoff unit.
    #[must_use]
    pub const fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }

    /// Background sweep period.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn u64(&self, name: &str) -> Result<Option<u64>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u64>()
            .map(Some)
            .map_err(|e| LeaseError::InvalidInput(format!("{name} must be a u64: {e}")))
    }

    fn u32(&self, name: &str) -> Result<Option<u32>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u32>()
            .map(Some)
            .map_err(|e| LeaseError::InvalidInput(format!("{name} must be a u32: {e}")))
    }
}
