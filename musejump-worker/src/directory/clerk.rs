//! Clerk backend API adapter.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::DirectoryProvider;
use crate::domain::{Credential, SubjectSnapshot};
use crate::utils::http_client::endpoint;
use crate::{Error, Result};

const PROVIDER: &str = "clerk";

/// External account provider name Clerk reports for linked Spotify accounts.
const SPOTIFY_ACCOUNT_PROVIDER: &str = "oauth_spotify";

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct ClerkConfig {
    pub api_base: Url,
    pub secret_key: String,
    /// Users requested per page (Clerk allows up to 500).
    pub page_size: usize,
}

impl ClerkConfig {
    pub fn new(api_base: Url, secret_key: impl Into<String>) -> Self {
        Self {
            api_base,
            secret_key: secret_key.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClerkUser {
    id: String,
    #[serde(default)]
    primary_email_address_id: Option<String>,
    #[serde(default)]
    email_addresses: Vec<ClerkEmailAddress>,
    #[serde(default)]
    external_accounts: Vec<ClerkExternalAccount>,
}

#[derive(Debug, Deserialize)]
struct ClerkEmailAddress {
    id: String,
    email_address: String,
}

#[derive(Debug, Deserialize)]
struct ClerkExternalAccount {
    provider: String,
}

#[derive(Debug, Deserialize)]
struct ClerkAccessToken {
    token: String,
    /// Unix seconds.
    #[serde(default)]
    expires_at: Option<i64>,
}

/// The token endpoint answers with a bare array or a paginated `{ data }` envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClerkTokenList {
    Bare(Vec<ClerkAccessToken>),
    Paged { data: Vec<ClerkAccessToken> },
}

impl ClerkTokenList {
    fn into_vec(self) -> Vec<ClerkAccessToken> {
        match self {
            Self::Bare(tokens) | Self::Paged { data: tokens } => tokens,
        }
    }
}

impl ClerkUser {
    fn primary_email(&self) -> Option<String> {
        let primary = self.primary_email_address_id.as_deref();
        self.email_addresses
            .iter()
            .find(|e| Some(e.id.as_str()) == primary)
            .or_else(|| self.email_addresses.first())
            .map(|e| e.email_address.clone())
    }

    fn into_snapshot(self) -> SubjectSnapshot {
        let contact_email = self.primary_email();
        let has_linked_credential = self
            .external_accounts
            .iter()
            .any(|a| a.provider == SPOTIFY_ACCOUNT_PROVIDER);
        SubjectSnapshot {
            id: self.id,
            contact_email,
            has_linked_credential,
        }
    }
}

fn expiry_from_unix(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Directory backed by the Clerk backend API.
pub struct ClerkDirectory {
    config: ClerkConfig,
    client: Client,
}

impl ClerkDirectory {
    pub fn new(config: ClerkConfig, client: Client) -> Self {
        Self { config, client }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.secret_key)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                PROVIDER,
                format!("{} from {}: {}", status, url, body),
            ));
        }

        Ok(Some(response.json::<T>().await?))
    }

    async fn list_page(&self, offset: usize) -> Result<Vec<ClerkUser>> {
        let url = endpoint(&self.config.api_base, "users");
        self.get_json(
            &url,
            &[
                ("limit", self.config.page_size.to_string()),
                ("offset", offset.to_string()),
                ("order_by", "created_at".to_string()),
            ],
        )
        .await?
        .ok_or_else(|| Error::provider(PROVIDER, format!("404 from {}", url)))
    }
}

#[async_trait]
impl DirectoryProvider for ClerkDirectory {
    async fn list_subjects(&self) -> Result<Vec<SubjectSnapshot>> {
        let page_size = self.config.page_size.max(1);
        let mut subjects = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.list_page(offset).await?;
            let count = page.len();
            subjects.extend(page.into_iter().map(ClerkUser::into_snapshot));
            if count < page_size {
                break;
            }
            offset += count;
        }

        debug!(count = subjects.len(), "Listed directory subjects");
        Ok(subjects)
    }

    async fn list_credential(
        &self,
        subject_id: &str,
        provider: &str,
    ) -> Result<Option<Credential>> {
        let url = endpoint(
            &self.config.api_base,
            &format!("users/{}/oauth_access_tokens/{}", subject_id, provider),
        );

        let Some(tokens) = self.get_json::<ClerkTokenList>(&url, &[]).await? else {
            return Ok(None);
        };
        let tokens = tokens.into_vec();

        if tokens.len() > 1 {
            warn!(
                subject_id,
                count = tokens.len(),
                "Subject has more than one {} access token, using the first",
                provider
            );
        }

        Ok(tokens.into_iter().next().map(|t| {
            Credential::new(t.token, t.expires_at.and_then(expiry_from_unix))
        }))
    }
}
