//! Gmail v1 and Calendar v3 over HTTPS using stored OAuth tokens.
//!
//! Token files are the JSON written by the Google client libraries. Both the
//! Python shape (`token`, `expiry`) and the Node shape (`access_token`,
//! `expiry_date`) are accepted.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    config::MailAccount,
    models::{CalendarEvent, RawMessage},
    source::{MailSource, SourceError},
};

const GMAIL_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const CALENDAR_BASE_URL: &str = "https://www.googleapis.com/calendar/v3/calendars/primary";
const GMAIL_PAGE_LIMIT: u32 = 500;
const CALENDAR_PAGE_LIMIT: u32 = 250;
const EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, Deserialize)]
struct StoredToken {
    #[serde(alias = "token")]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    token_uri: String,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    /// ISO 8601 expiry (Python client).
    #[serde(default)]
    expiry: Option<String>,
    /// Epoch milliseconds expiry (Node client).
    #[serde(default)]
    expiry_date: Option<i64>,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl StoredToken {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        if let Some(ms) = self.expiry_date {
            return DateTime::from_timestamp_millis(ms);
        }
        let raw = self.expiry.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at()
            .map(|at| at <= now + chrono::Duration::seconds(EXPIRY_SKEW_SECONDS))
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<CalendarEvent>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GoogleWorkspaceSource {
    client: reqwest::Client,
    gmail_base_url: String,
    calendar_base_url: String,
}

impl GoogleWorkspaceSource {
    pub fn new(timeout_seconds: u64) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds.max(1)))
            .build()?;
        Ok(Self {
            client,
            gmail_base_url: GMAIL_BASE_URL.to_string(),
            calendar_base_url: CALENDAR_BASE_URL.to_string(),
        })
    }

    pub fn with_base_urls(mut self, gmail: &str, calendar: &str) -> Self {
        self.gmail_base_url = gmail.trim_end_matches('/').to_string();
        self.calendar_base_url = calendar.trim_end_matches('/').to_string();
        self
    }

    async fn access_token(&self, account: &MailAccount) -> Result<String, SourceError> {
        let raw = match tokio::fs::read_to_string(&account.token_file).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::TokenNotFound(account.token_file.clone()));
            }
            Err(err) => return Err(SourceError::Io(err)),
        };
        let token: StoredToken = serde_json::from_str(&raw)?;

        if !token.is_expired(Utc::now()) {
            return Ok(token.access_token);
        }

        match (&token.refresh_token, &token.client_id) {
            (Some(refresh_token), Some(client_id)) => {
                debug!(account = %account.email, "Refreshing expired access token");
                self.refresh(&token, refresh_token, client_id).await
            }
            _ => {
                warn!(
                    account = %account.email,
                    "Access token looks expired and cannot be refreshed; trying it anyway"
                );
                Ok(token.access_token)
            }
        }
    }

    async fn refresh(
        &self,
        token: &StoredToken,
        refresh_token: &str,
        client_id: &str,
    ) -> Result<String, SourceError> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ];
        if let Some(secret) = token.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let resp = self.client.post(&token.token_uri).form(&form).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::RefreshFailed(format!("{status}: {body}")));
        }
        let refreshed: RefreshResponse = resp.json().await?;
        Ok(refreshed.access_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        account: &MailAccount,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SourceError> {
        let resp = request.send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SourceError::AuthExpired(account.email.clone()));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl MailSource for GoogleWorkspaceSource {
    async fn fetch_messages(
        &self,
        account: &MailAccount,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<RawMessage>, SourceError> {
        let access_token = self.access_token(account).await?;
        let list_url = format!("{}/messages", self.gmail_base_url);

        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        while (ids.len() as u32) < max_results {
            let page_size = (max_results - ids.len() as u32)
                .min(GMAIL_PAGE_LIMIT)
                .to_string();
            let mut request = self
                .client
                .get(&list_url)
                .bearer_auth(&access_token)
                .query(&[("q", query), ("maxResults", page_size.as_str())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let page: MessageListResponse = self.get_json(account, request).await?;
            ids.extend(page.messages.into_iter().map(|m| m.id));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        ids.truncate(max_results as usize);

        info!(account = %account.email, messages = ids.len(), "Mail search matched");

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            let request = self
                .client
                .get(format!("{}/messages/{}", self.gmail_base_url, id))
                .bearer_auth(&access_token)
                .query(&[("format", "full")]);
            messages.push(self.get_json::<RawMessage>(account, request).await?);
        }
        Ok(messages)
    }

    async fn fetch_events(
        &self,
        account: &MailAccount,
        since: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<CalendarEvent>, SourceError> {
        let access_token = self.access_token(account).await?;
        let url = format!("{}/events", self.calendar_base_url);
        let time_min = since.to_rfc3339();

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;
        while (events.len() as u32) < max_results {
            let page_size = (max_results - events.len() as u32)
                .min(CALENDAR_PAGE_LIMIT)
                .to_string();
            let mut request = self.client.get(&url).bearer_auth(&access_token).query(&[
                ("timeMin", time_min.as_str()),
                ("maxResults", page_size.as_str()),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
            ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let page: EventListResponse = self.get_json(account, request).await?;
            events.extend(page.items);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        events.truncate(max_results as usize);

        info!(account = %account.email, events = events.len(), "Calendar events fetched");
        Ok(events)
    }
}
