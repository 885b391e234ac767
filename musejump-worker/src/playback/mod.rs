//! Playback provider access.

pub mod spotify;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::domain::Credential;

pub use spotify::{SpotifyConfig, SpotifyPlayback};

/// What a subject is currently playing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub is_playing: bool,
    /// Absent when the provider reports playback without item detail (ads, local files).
    pub item_id: Option<String>,
    pub progress_ms: i64,
}

impl PlaybackStatus {
    pub fn not_playing() -> Self {
        Self::default()
    }

    pub fn playing(item_id: impl Into<String>, progress_ms: i64) -> Self {
        Self {
            is_playing: true,
            item_id: Some(item_id.into()),
            progress_ms,
        }
    }
}

#[async_trait]
pub trait PlaybackProvider: Send + Sync {
    async fn currently_playing(&self, credential: &Credential) -> Result<PlaybackStatus>;

    async fn seek(&self, credential: &Credential, target_ms: i64) -> Result<()>;
}
