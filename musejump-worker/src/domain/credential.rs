//! Provider access credentials.

use std::fmt;

use chrono::{DateTime, Utc};

/// An OAuth access token for the playback provider.
///
/// The token itself is owned by the directory provider; the worker only keeps
/// a copy and checks its expiry before deciding to fetch a new one.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// A token without a known expiry is treated as valid until the provider rejects it.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Whether a cached credential must be re-fetched.
///
/// A present, unexpired credential is never replaced, so provider calls that
/// already captured it keep working.
pub fn needs_refresh(cached: Option<&Credential>, now: DateTime<Utc>) -> bool {
    match cached {
        None => true,
        Some(credential) => credential.is_expired_at(now),
    }
}
