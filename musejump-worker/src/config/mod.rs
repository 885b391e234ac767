//! Worker configuration loaded from the process environment.
//!
//! Variables are read after `dotenvy::dotenv()`, so a local `.env` file can
//! provide them during development. Durations use Go-style strings such as
//! `30s` or `500ms`.

mod duration;

pub use duration::parse_duration;

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::scheduler::SchedulerConfig;
use crate::{Error, Result};

/// Default trigger store location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:musejump.db?mode=rwc";

/// Default directory provider API base.
pub const DEFAULT_CLERK_API_BASE: &str = "https://api.clerk.com/v1";

/// Default playback provider API base.
pub const DEFAULT_SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";

/// Default log directory.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Top-level worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Secret key for the directory provider.
    pub clerk_api_key: String,
    /// Directory provider API base URL.
    pub clerk_api_base: Url,
    /// Playback provider API base URL.
    pub spotify_api_base: Url,
    /// Trigger store connection string.
    pub database_url: String,
    /// Directory for rolling log files.
    pub log_dir: PathBuf,
    /// Timing configuration for the scheduler.
    pub scheduler: SchedulerConfig,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file loaded: {}", e);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let clerk_api_key =
            var("CLERK_API_KEY").ok_or_else(|| Error::config("CLERK_API_KEY is not set"))?;

        let clerk_api_base = parse_url(
            "CLERK_API_BASE",
            var("CLERK_API_BASE").as_deref().unwrap_or(DEFAULT_CLERK_API_BASE),
        )?;
        let spotify_api_base = parse_url(
            "SPOTIFY_API_BASE",
            var("SPOTIFY_API_BASE")
                .as_deref()
                .unwrap_or(DEFAULT_SPOTIFY_API_BASE),
        )?;

        let database_url =
            var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let log_dir = PathBuf::from(var("LOG_DIR").unwrap_or_else(|| DEFAULT_LOG_DIR.to_string()));

        let defaults = SchedulerConfig::default();
        let duration_var = |key: &'static str, default: Duration| -> Result<Duration> {
            match var(key) {
                Some(raw) => parse_duration(&raw).map_err(|e| Error::config(format!("{}: {}", key, e))),
                None => Ok(default),
            }
        };

        let credential_refresh_concurrency = match var("CREDENTIAL_REFRESH_CONCURRENCY") {
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                Error::config(format!(
                    "CREDENTIAL_REFRESH_CONCURRENCY: expected a positive integer, got '{}'",
                    raw
                ))
            })?,
            None => defaults.credential_refresh_concurrency,
        };

        let scheduler = SchedulerConfig {
            sync_interval: duration_var("USER_SYNC_INTERVAL", defaults.sync_interval)?,
            idle_interval: duration_var("IDLE_HEARTBEAT", defaults.idle_interval)?,
            active_interval: duration_var("ACTIVE_HEARTBEAT", defaults.active_interval)?,
            sweep_interval: duration_var("SWEEP_INTERVAL", defaults.sweep_interval)?,
            jump_lead: duration_var("JUMP_LEAD", defaults.jump_lead)?,
            jump_min_delay: duration_var("JUMP_MIN_DELAY", defaults.jump_min_delay)?,
            duplicate_poll_epsilon: duration_var(
                "DUPLICATE_POLL_EPSILON",
                defaults.duplicate_poll_epsilon,
            )?,
            call_timeout: duration_var("PROVIDER_CALL_TIMEOUT", defaults.call_timeout)?,
            credential_refresh_concurrency,
        };
        scheduler.validate()?;

        Ok(Self {
            clerk_api_key,
            clerk_api_base,
            spotify_api_base,
            database_url,
            log_dir,
            scheduler,
        })
    }
}

fn parse_url(key: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::config(format!("{}: {}", key, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::config(format!(
            "{}: unsupported scheme '{}'",
            key,
            url.scheme()
        )));
    }
    Ok(url)
}
