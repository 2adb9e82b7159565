use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    config::MailAccount,
    models::{CalendarEvent, RawMessage},
};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token not found at {0}")]
    TokenNotFound(std::path::PathBuf),
    #[error("Token expired and cannot be refreshed for {0}")]
    AuthExpired(String),
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where messages and calendar events come from. Implementations do not
/// retry; a failed call fails that account for the run.
#[async_trait]
pub trait MailSource: Send + Sync {
    async fn fetch_messages(
        &self,
        account: &MailAccount,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<RawMessage>, SourceError>;

    async fn fetch_events(
        &self,
        account: &MailAccount,
        since: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<CalendarEvent>, SourceError>;
}

/// Mail search query: any keyword (quoted) received after `since`.
pub fn build_search_query(keywords: &[String], since: DateTime<Utc>) -> String {
    let terms = keywords
        .iter()
        .map(|k| format!("\"{}\"", k.replace('"', "")))
        .collect::<Vec<_>>()
        .join(" OR ");
    format!("({terms}) after:{}", since.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn query_quotes_keywords() {
        let since = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let query = build_search_query(
            &["cinderella".to_string(), "glass \"slipper\"".to_string()],
            since,
        );
        assert_eq!(query, "(\"cinderella\" OR \"glass slipper\") after:1700000000");
    }
}
