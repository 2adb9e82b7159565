use std::{env, fs, net::SocketAddr, path::PathBuf};

use anyhow::{bail, Result};
use tracing::warn;

use crate::models::{SyncJob, SyncRequest};

/// Longest lookback a sync may request.
pub const MAX_LOOKBACK_DAYS: u32 = 3650;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAccount {
    pub email: String,
    pub token_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub db_path: PathBuf,
    pub api_key: Option<String>,
    pub token_dir: PathBuf,
    pub accounts: Vec<MailAccount>,
    pub calendar_account: Option<MailAccount>,
    pub project_id: String,
    pub project_name: String,
    pub project_description: String,
    pub keywords: Vec<String>,
    pub lookback_days: u32,
    pub max_messages: u32,
    pub max_events: u32,
    pub body_char_limit: usize,
    pub queue_capacity: usize,
    pub run_retention_seconds: u64,
    pub http_timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_raw =
            env::var("RELINTEL_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
        let bind_normalized = bind_raw
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .to_string();
        let bind_addr = bind_normalized
            .parse::<SocketAddr>()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 3001)));

        let db_path = PathBuf::from(
            env::var("RELINTEL_DB_PATH").unwrap_or_else(|_| "data/relationship-intel.db".to_string()),
        );

        let token_dir = env::var("GOOGLE_TOKEN_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                env::var("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(".config")
                    .join("google")
            });

        let accounts = parse_accounts(&env::var("RELINTEL_ACCOUNTS").unwrap_or_default(), &token_dir);
        let calendar_account = match env::var("RELINTEL_CALENDAR_ACCOUNT") {
            Ok(raw) if !raw.trim().is_empty() => parse_accounts(&raw, &token_dir).into_iter().next(),
            _ => accounts.first().cloned(),
        };

        let project_id = env::var("RELINTEL_PROJECT_ID")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "cinderella".to_string());
        let project_name = env::var("RELINTEL_PROJECT_NAME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| title_case(&project_id));
        let project_description = env::var("RELINTEL_PROJECT_DESCRIPTION").unwrap_or_default();

        let keywords = env::var("RELINTEL_KEYWORDS")
            .ok()
            .map(|v| parse_keywords(&v))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec![project_id.clone()]);

        Ok(Self {
            bind_addr,
            db_path,
            api_key: resolve_api_key(),
            token_dir,
            accounts,
            calendar_account,
            project_id,
            project_name,
            project_description,
            keywords,
            lookback_days: env_parse("RELINTEL_LOOKBACK_DAYS", 60u32).clamp(1, MAX_LOOKBACK_DAYS),
            max_messages: env_parse("RELINTEL_MAX_MESSAGES", 500),
            max_events: env_parse("RELINTEL_MAX_EVENTS", 1000),
            body_char_limit: env_parse("RELINTEL_BODY_CHAR_LIMIT", 5000),
            queue_capacity: env_parse("RELINTEL_QUEUE_CAPACITY", 16),
            run_retention_seconds: env_parse("RELINTEL_RUN_RETENTION_SECONDS", 24 * 60 * 60),
            http_timeout_seconds: env_parse("RELINTEL_HTTP_TIMEOUT_SECONDS", 30),
        })
    }

    /// Resolve a trigger request against the configured defaults. A request
    /// for another project does not inherit this project's name or keywords.
    pub fn resolve_job(&self, request: &SyncRequest) -> Result<SyncJob> {
        let lookback_days = request.lookback_days.unwrap_or(self.lookback_days).max(1);
        if lookback_days > MAX_LOOKBACK_DAYS {
            bail!("lookbackDays must be at most {MAX_LOOKBACK_DAYS}, got {lookback_days}");
        }

        let project_id = request
            .project_id
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.project_id)
            .to_string();
        let is_default = project_id == self.project_id;

        let keywords = request
            .keywords
            .as_ref()
            .map(|k| {
                k.iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| {
                if is_default {
                    self.keywords.clone()
                } else {
                    vec![project_id.clone()]
                }
            });

        let project_name = request
            .project_name
            .clone()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| {
                if is_default {
                    self.project_name.clone()
                } else {
                    title_case(&project_id)
                }
            });

        let description = request.description.clone().unwrap_or_else(|| {
            if is_default {
                self.project_description.clone()
            } else {
                String::new()
            }
        });

        Ok(SyncJob {
            project_id,
            project_name,
            description,
            keywords,
            lookback_days,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

/// `email[=token_file]` entries separated by commas.
pub fn parse_accounts(raw: &str, token_dir: &std::path::Path) -> Vec<MailAccount> {
    raw.split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            let (email, file) = match entry.split_once('=') {
                Some((email, file)) => (email.trim(), Some(file.trim())),
                None => (entry, None),
            };
            if !email.contains('@') {
                warn!("Ignoring mail account without an address: {entry}");
                return None;
            }
            let email = email.to_lowercase();
            let file = file
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| default_token_file(&email));
            Some(MailAccount {
                token_file: token_dir.join(file),
                email,
            })
        })
        .collect()
}

pub fn default_token_file(email: &str) -> String {
    format!("token_{}.json", email.replace(['@', '.'], "_"))
}

fn title_case(id: &str) -> String {
    id.split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn resolve_api_key() -> Option<String> {
    if let Ok(value) = env::var("RELINTEL_API_KEY") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    if let Ok(key_file) = env::var("RELINTEL_API_KEY_FILE") {
        match fs::read_to_string(&key_file) {
            Ok(raw) => {
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
                warn!("RELINTEL_API_KEY_FILE is empty: {key_file}. Write endpoints are unauthenticated.");
            }
            Err(err) => {
                warn!(
                    "Failed reading RELINTEL_API_KEY_FILE at {key_file}: {err}. Write endpoints are unauthenticated."
                );
            }
        }
    }

    None
}

#[cfg(test)]
pub fn test_config(db_path: PathBuf) -> Config {
    Config {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        db_path,
        api_key: None,
        token_dir: PathBuf::from("/nonexistent"),
        accounts: Vec::new(),
        calendar_account: None,
        project_id: "cinderella".to_string(),
        project_name: "Cinderella".to_string(),
        project_description: "Acquisition".to_string(),
        keywords: vec!["cinderella".to_string()],
        lookback_days: 60,
        max_messages: 500,
        max_events: 1000,
        body_char_limit: 5000,
        queue_capacity: 4,
        run_retention_seconds: 60,
        http_timeout_seconds: 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn accounts_default_token_file_names() {
        let accounts = parse_accounts(
            "Norman.Desilva@gmail.com, ops@fund.io=ops.json, not-an-account",
            Path::new("/tokens"),
        );
        assert_eq!(
            accounts,
            vec![
                MailAccount {
                    email: "norman.desilva@gmail.com".to_string(),
                    token_file: PathBuf::from("/tokens/token_norman_desilva_gmail_com.json"),
                },
                MailAccount {
                    email: "ops@fund.io".to_string(),
                    token_file: PathBuf::from("/tokens/ops.json"),
                },
            ]
        );
    }

    #[test]
    fn keywords_are_trimmed() {
        assert_eq!(parse_keywords(" cinderella, ball ,,"), vec!["cinderella", "ball"]);
    }

    #[test]
    fn resolve_job_uses_defaults_for_configured_project() {
        let config = test_config(PathBuf::from("x.db"));
        let job = config.resolve_job(&SyncRequest::default()).unwrap();
        assert_eq!(job.project_id, "cinderella");
        assert_eq!(job.project_name, "Cinderella");
        assert_eq!(job.description, "Acquisition");
        assert_eq!(job.keywords, vec!["cinderella"]);
        assert_eq!(job.lookback_days, 60);
    }

    #[test]
    fn resolve_job_for_other_project_does_not_inherit_keywords() {
        let config = test_config(PathBuf::from("x.db"));
        let job = config.resolve_job(&SyncRequest {
            project_id: Some("glass-slipper".to_string()),
            lookback_days: Some(0),
            keywords: Some(vec![" ".to_string()]),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(job.project_name, "Glass Slipper");
        assert_eq!(job.keywords, vec!["glass-slipper"]);
        assert_eq!(job.description, "");
        assert_eq!(job.lookback_days, 1);
    }

    #[test]
    fn resolve_job_rejects_lookback_past_limit() {
        let config = test_config(PathBuf::from("x.db"));
        let err = config
            .resolve_job(&SyncRequest {
                lookback_days: Some(200_000_000),
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("lookbackDays"));

        let job = config
            .resolve_job(&SyncRequest {
                lookback_days: Some(MAX_LOOKBACK_DAYS),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(job.lookback_days, MAX_LOOKBACK_DAYS);
    }
}
