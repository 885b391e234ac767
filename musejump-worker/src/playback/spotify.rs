//! Spotify Web API adapter.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::trace;
use url::Url;

use super::{PlaybackProvider, PlaybackStatus};
use crate::domain::Credential;
use crate::utils::http_client::endpoint;
use crate::{Error, Result};

const PROVIDER: &str = "spotify";

#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub api_base: Url,
}

#[derive(Debug, Deserialize)]
struct CurrentlyPlaying {
    #[serde(default)]
    is_playing: bool,
    #[serde(default)]
    progress_ms: Option<i64>,
    #[serde(default)]
    item: Option<PlayingItem>,
}

#[derive(Debug, Deserialize)]
struct PlayingItem {
    #[serde(default)]
    id: Option<String>,
}

impl From<CurrentlyPlaying> for PlaybackStatus {
    fn from(raw: CurrentlyPlaying) -> Self {
        Self {
            is_playing: raw.is_playing,
            item_id: raw.item.and_then(|item| item.id),
            progress_ms: raw.progress_ms.unwrap_or(0),
        }
    }
}

pub struct SpotifyPlayback {
    config: SpotifyConfig,
    client: Client,
}

impl SpotifyPlayback {
    pub fn new(config: SpotifyConfig, client: Client) -> Self {
        Self { config, client }
    }

    async fn check(response: Response, operation: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::provider(
            PROVIDER,
            format!("{} failed with {}: {}", operation, status, body),
        ))
    }
}

#[async_trait]
impl PlaybackProvider for SpotifyPlayback {
    async fn currently_playing(&self, credential: &Credential) -> Result<PlaybackStatus> {
        let url = endpoint(&self.config.api_base, "me/player/currently-playing");
        let response = self
            .client
            .get(&url)
            .bearer_auth(credential.access_token())
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(PlaybackStatus::not_playing());
        }

        let response = Self::check(response, "currently-playing").await?;
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(PlaybackStatus::not_playing());
        }

        let raw: CurrentlyPlaying = serde_json::from_slice(&body)?;
        let status = PlaybackStatus::from(raw);
        trace!(?status, "Fetched playback status");
        Ok(status)
    }

    async fn seek(&self, credential: &Credential, target_ms: i64) -> Result<()> {
        let url = endpoint(&self.config.api_base, "me/player/seek");
        let response = self
            .client
            .put(&url)
            .bearer_auth(credential.access_token())
            .query(&[("position_ms", target_ms.max(0))])
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await?;

        Self::check(response, "seek").await?;
        Ok(())
    }
}
