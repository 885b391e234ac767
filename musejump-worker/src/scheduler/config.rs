//! Scheduler timing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::SubjectState;
use crate::{Error, Result};

/// Timing knobs for the polling and jump machinery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Directory reconciliation period.
    pub sync_interval: Duration,
    /// Poll period while nothing is playing.
    pub idle_interval: Duration,
    /// Poll period while a track is playing.
    pub active_interval: Duration,
    /// How often subjects without a live poll timer are picked up.
    pub sweep_interval: Duration,
    /// How far ahead of a trigger the target lookup starts.
    pub jump_lead: Duration,
    /// Floor for the coarse delay when the lead window has already begun.
    pub jump_min_delay: Duration,
    /// Tolerance for treating a tick as uninterrupted playback.
    pub duplicate_poll_epsilon: Duration,
    /// Upper bound on any single provider or store call.
    pub call_timeout: Duration,
    /// Credential refreshes in flight at once during reconciliation.
    pub credential_refresh_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            idle_interval: Duration::from_secs(30),
            active_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(1),
            jump_lead: Duration::from_secs(1),
            jump_min_delay: Duration::from_millis(100),
            duplicate_poll_epsilon: Duration::from_millis(100),
            call_timeout: Duration::from_secs(5),
            credential_refresh_concurrency: 4,
        }
    }
}

impl SchedulerConfig {
    /// Poll period for a subject in `state`.
    pub fn interval_for(&self, state: SubjectState) -> Duration {
        match state {
            SubjectState::Idle => self.idle_interval,
            SubjectState::Active => self.active_interval,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("USER_SYNC_INTERVAL", self.sync_interval),
            ("IDLE_HEARTBEAT", self.idle_interval),
            ("ACTIVE_HEARTBEAT", self.active_interval),
            ("SWEEP_INTERVAL", self.sweep_interval),
            ("PROVIDER_CALL_TIMEOUT", self.call_timeout),
        ];
        for (name, value) in non_zero {
            if value.is_zero() {
                return Err(Error::config(format!("{} must be greater than zero", name)));
            }
        }

        if self.active_interval >= self.idle_interval {
            return Err(Error::config(format!(
                "ACTIVE_HEARTBEAT ({:?}) must be shorter than IDLE_HEARTBEAT ({:?})",
                self.active_interval, self.idle_interval
            )));
        }

        if self.credential_refresh_concurrency == 0 {
            return Err(Error::config(
                "CREDENTIAL_REFRESH_CONCURRENCY must be at least 1",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.interval_for(SubjectState::Active),
            Duration::from_secs(1)
        );
        assert_eq!(
            config.interval_for(SubjectState::Idle),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_rejects_zero_intervals() {
        let config = SchedulerConfig {
            sweep_interval: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("SWEEP_INTERVAL"));
    }

    #[test]
    fn test_rejects_equal_heartbeats() {
        let config = SchedulerConfig {
            active_interval: Duration::from_secs(30),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let config = SchedulerConfig {
            credential_refresh_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
