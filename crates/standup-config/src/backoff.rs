//! Retry policy shared by every readiness wait.

use std::time::Duration;

use strum::{Display, EnumString};

use crate::defaults::{
    PROBE_BACKOFF, PROBE_INTERVAL_MS, PROBE_MAX_ATTEMPTS, PROBE_MAX_INTERVAL_MS, STARTUP_TIMEOUT,
};
use crate::{ConfigError, EnvironmentSnapshot};

/// How the delay between attempts evolves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BackoffKind {
    /// Constant delay.
    #[default]
    Fixed,
    /// Doubling delay capped by [`BackoffPolicy::max_interval`].
    Exponential,
}

/// Bounds applied while waiting for a service to become ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum number of probe attempts.
    pub max_attempts: u32,
    /// Wall-clock budget across all attempts.
    pub total_timeout: Duration,
    /// Base delay between attempts.
    pub interval: Duration,
    /// Ceiling for exponential delays.
    pub max_interval: Duration,
    /// Delay growth strategy.
    pub kind: BackoffKind,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            total_timeout: Duration::from_secs(30),
            interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
            kind: BackoffKind::Fixed,
        }
    }
}

impl BackoffPolicy {
    /// Derives the policy from the snapshot, keeping defaults for absent keys.
    pub fn from_snapshot(snapshot: &EnvironmentSnapshot) -> Result<Self, ConfigError> {
        let fallback = Self::default();
        let max_attempts = snapshot
            .parse::<u32>(PROBE_MAX_ATTEMPTS, "a positive whole number")?
            .unwrap_or(fallback.max_attempts);
        if max_attempts == 0 {
            return Err(ConfigError::invalid(
                PROBE_MAX_ATTEMPTS,
                "0",
                "a positive whole number",
            ));
        }
        Ok(Self {
            max_attempts,
            total_timeout: snapshot
                .seconds(STARTUP_TIMEOUT)?
                .unwrap_or(fallback.total_timeout),
            interval: snapshot
                .millis(PROBE_INTERVAL_MS)?
                .unwrap_or(fallback.interval),
            max_interval: snapshot
                .millis(PROBE_MAX_INTERVAL_MS)?
                .unwrap_or(fallback.max_interval),
            kind: snapshot
                .parse::<BackoffKind>(PROBE_BACKOFF, "'fixed' or 'exponential'")?
                .unwrap_or(fallback.kind),
        })
    }

    /// Delay to wait after the given one-based attempt failed.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.kind {
            BackoffKind::Fixed => self.interval,
            BackoffKind::Exponential => {
                let factor = 1_u32
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                self.interval
                    .saturating_mul(factor)
                    .min(self.max_interval.max(self.interval))
            }
        }
    }
}
