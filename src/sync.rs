use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use tokio::{sync::mpsc, time};
use tracing::{debug, error, info, warn};

use crate::{
    address::local_part,
    config::Config,
    db,
    merge::ContactAccumulator,
    models::{
        Address, CalendarEvent, ContactRecord, EmailInteraction, FetchedMessage, Interaction,
        InteractionKind, MeetingInteraction, RunState, SyncErrorPayload, SyncJob, SyncRunRecord,
        SyncSummary,
    },
    normalize::{normalize_message, truncate_chars},
    relevance::RelevanceFilter,
    source::{build_search_query, MailSource},
    writer::{write_contacts, write_interactions, ProjectCounts},
    AppState,
};

/// Everything one run will persist.
#[derive(Debug, Clone)]
pub struct SyncBatch {
    pub contacts: Vec<ContactRecord>,
    pub interactions: Vec<Interaction>,
    pub summary: SyncSummary,
}

/// Turn fetched messages and events into contacts and interactions.
///
/// Emails are processed first so that their participants form the known set
/// used to keep meetings that do not mention a keyword.
pub fn build_batch(
    job: &SyncJob,
    messages: &[FetchedMessage],
    events: &[CalendarEvent],
    calendar_account: Option<&str>,
    body_char_limit: usize,
) -> SyncBatch {
    let mut contacts = ContactAccumulator::new();
    let mut interactions = Vec::new();
    let mut emails = 0;

    for fetched in messages {
        let normalized = normalize_message(&fetched.message);
        let Some(date) = normalized.date else {
            warn!(
                message_id = %normalized.message_id,
                account = %fetched.account,
                "Skipping message without a usable date"
            );
            continue;
        };

        contacts.observe_all(
            normalized
                .from
                .iter()
                .chain(normalized.to.iter())
                .chain(normalized.cc.iter()),
            date,
            &fetched.account,
        );

        interactions.push(Interaction {
            project_id: job.project_id.clone(),
            date,
            kind: InteractionKind::Email(EmailInteraction {
                message_id: normalized.message_id,
                thread_id: normalized.thread_id,
                account: fetched.account.clone(),
                from: normalized.from,
                to: normalized.to,
                cc: normalized.cc,
                subject: normalized.subject,
                snippet: normalized.snippet,
                body: truncate_chars(&normalized.body, body_char_limit),
            }),
        });
        emails += 1;
    }

    let filter = RelevanceFilter::new(&job.keywords);
    let known = contacts.known_emails();
    let self_email = calendar_account.unwrap_or_default();
    let mut meeting_contacts = ContactAccumulator::new();
    let mut relevant_events = 0;
    let mut meetings = 0;

    for event in events {
        if !filter.is_relevant(event, &known) {
            continue;
        }
        relevant_events += 1;

        let Some(date) = event_start(event) else {
            warn!(event_id = %event.id, "Skipping event without a start time");
            continue;
        };

        let attendees = event_attendees(event);
        meeting_contacts.observe_all(attendees.iter(), date, self_email);

        interactions.push(Interaction {
            project_id: job.project_id.clone(),
            date,
            kind: InteractionKind::Meeting(MeetingInteraction {
                event_id: event.id.clone(),
                title: event.summary.clone().unwrap_or_default(),
                description: event.description.clone().unwrap_or_default(),
                attendees,
            }),
        });
        meetings += 1;
    }

    debug!(
        email_contacts = contacts.len(),
        meeting_contacts = meeting_contacts.len(),
        "Merging contact sightings"
    );
    contacts.merge(meeting_contacts);

    let contacts = contacts.into_contacts();
    let summary = SyncSummary {
        messages_fetched: messages.len(),
        events_fetched: events.len(),
        relevant_events,
        contacts: contacts.len(),
        interactions: interactions.len(),
        emails,
        meetings,
        failed_sources: Vec::new(),
    };

    SyncBatch {
        contacts,
        interactions,
        summary,
    }
}

/// Start of an event: timed `dateTime`, or midnight UTC of an all-day `date`.
pub fn event_start(event: &CalendarEvent) -> Option<DateTime<Utc>> {
    let start = event.start.as_ref()?;
    if let Some(raw) = start.date_time.as_deref() {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    let raw = start.date.as_deref()?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn event_attendees(event: &CalendarEvent) -> Vec<Address> {
    event
        .attendees
        .iter()
        .filter_map(|attendee| {
            let email = attendee.email.trim().to_lowercase();
            if email.is_empty() {
                return None;
            }
            let name = attendee
                .display_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| local_part(&email).to_string());
            Some(Address { name, email })
        })
        .collect()
}

/// Earliest instant a run looks at. Fails instead of overflowing the
/// calendar for out-of-range day counts.
pub fn lookback_start(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>> {
    ChronoDuration::try_days(i64::from(days))
        .and_then(|span| now.checked_sub_signed(span))
        .with_context(|| format!("Lookback of {days} days is out of range"))
}

/// Fetch, merge and persist one project. Source failures are logged and
/// reported in the summary; persistence failures fail the run.
pub async fn run_sync(source: &dyn MailSource, config: &Config, job: &SyncJob) -> Result<SyncSummary> {
    let since = lookback_start(Utc::now(), job.lookback_days)?;
    let query = build_search_query(&job.keywords, since);
    let mut failed_sources = Vec::new();

    info!(
        project = %job.project_id,
        keywords = job.keywords.len(),
        lookback_days = job.lookback_days,
        "Sync started"
    );

    if config.accounts.is_empty() {
        warn!("No mail accounts configured; only calendar data will be synced");
    }

    let mut messages = Vec::new();
    for account in &config.accounts {
        match source
            .fetch_messages(account, &query, config.max_messages)
            .await
        {
            Ok(batch) => {
                info!(account = %account.email, messages = batch.len(), "Mail fetched");
                messages.extend(batch.into_iter().map(|message| FetchedMessage {
                    account: account.email.clone(),
                    message,
                }));
            }
            Err(err) => {
                warn!(account = %account.email, "Mail fetch failed: {err}");
                failed_sources.push(account.email.clone());
            }
        }
    }

    let mut events = Vec::new();
    if let Some(calendar) = &config.calendar_account {
        match source
            .fetch_events(calendar, since, config.max_events)
            .await
        {
            Ok(batch) => {
                info!(account = %calendar.email, events = batch.len(), "Calendar fetched");
                events = batch;
            }
            Err(err) => {
                warn!(account = %calendar.email, "Calendar fetch failed: {err}");
                failed_sources.push(format!("calendar:{}", calendar.email));
            }
        }
    }

    let calendar_email = config.calendar_account.as_ref().map(|a| a.email.as_str());
    let mut batch = build_batch(job, &messages, &events, calendar_email, config.body_char_limit);
    batch.summary.failed_sources = failed_sources;

    info!(
        project = %job.project_id,
        contacts = batch.contacts.len(),
        emails = batch.summary.emails,
        meetings = batch.summary.meetings,
        "Sync batch prepared"
    );

    let db_path = config.db_path.clone();
    let project = job.project();
    let counts = ProjectCounts {
        contacts: batch.contacts.len(),
        interactions: batch.interactions.len(),
    };
    let SyncBatch {
        contacts,
        interactions,
        summary,
    } = batch;

    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = db::open(&db_path)?;
        write_contacts(&mut conn, &project, &contacts, counts, Utc::now())?;
        write_interactions(&mut conn, &interactions)?;
        Ok(())
    })
    .await
    .context("Persistence task join error")??;

    info!(
        project = %job.project_id,
        contacts = summary.contacts,
        interactions = summary.interactions,
        failed_sources = summary.failed_sources.len(),
        "Sync completed"
    );

    Ok(summary)
}

pub fn spawn_sync_worker(
    state: AppState,
    source: Arc<dyn MailSource>,
    mut queue_rx: mpsc::Receiver<String>,
) {
    tokio::spawn(async move {
        while let Some(run_id) = queue_rx.recv().await {
            info!(run_id = %run_id, "Worker picked sync run");
            process_sync_run(&state, source.as_ref(), &run_id).await;
        }
    });
}

pub fn spawn_cleanup_worker(state: AppState) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let mut runs = state.runs.write().await;
            let removed = prune_finished_runs(
                &mut runs,
                Utc::now(),
                state.config.run_retention_seconds,
            );
            if removed > 0 {
                info!(removed, "Pruned finished sync runs");
            }
        }
    });
}

/// Drop finished runs whose last update is older than the retention window.
pub fn prune_finished_runs(
    runs: &mut HashMap<String, SyncRunRecord>,
    now: DateTime<Utc>,
    retention_seconds: u64,
) -> usize {
    // A window too large to represent keeps every run.
    let Some(cutoff) = i64::try_from(retention_seconds)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .and_then(|span| now.checked_sub_signed(span))
    else {
        return 0;
    };
    let before = runs.len();
    runs.retain(|_, run| !(run.is_finished() && run.updated_at <= cutoff));
    before - runs.len()
}

async fn process_sync_run(state: &AppState, source: &dyn MailSource, run_id: &str) {
    let job = {
        let mut runs = state.runs.write().await;
        let Some(run) = runs.get_mut(run_id) else {
            warn!(run_id = %run_id, "Unknown sync run id");
            return;
        };
        run.status = RunState::Running;
        run.message = Some("Fetching mail and calendar".to_string());
        run.updated_at = Utc::now();
        run.job.clone()
    };

    let outcome = run_sync(source, &state.config, &job).await;

    let mut runs = state.runs.write().await;
    let Some(run) = runs.get_mut(run_id) else {
        return;
    };
    run.updated_at = Utc::now();
    match outcome {
        Ok(summary) => {
            run.status = RunState::Completed;
            run.message = Some(format!(
                "Synced {} contacts and {} interactions",
                summary.contacts, summary.interactions
            ));
            run.summary = Some(summary);
            run.error = None;
        }
        Err(err) => {
            error!(run_id = %run_id, "Sync run failed: {err:#}");
            run.status = RunState::Failed;
            run.message = Some("Sync failed".to_string());
            run.error = Some(SyncErrorPayload {
                code: "SYNC_FAILED".to_string(),
                message: format!("{err:#}"),
            });
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{event, message, FakeSource};
    use super::*;
    use crate::{
        config::{test_config, MailAccount},
        models::RawMessage,
        queries,
    };
    use chrono::TimeZone;
    use std::collections::HashSet;
    use tokio::sync::RwLock;

    fn account(email: &str) -> MailAccount {
        MailAccount {
            email: email.to_string(),
            token_file: std::path::PathBuf::from(format!("/tokens/{email}.json")),
        }
    }

    fn job() -> SyncJob {
        SyncJob {
            project_id: "cinderella".to_string(),
            project_name: "Cinderella".to_string(),
            description: String::new(),
            keywords: vec!["cinderella".to_string()],
            lookback_days: 60,
        }
    }

    fn fetched(account: &str, message: RawMessage) -> FetchedMessage {
        FetchedMessage {
            account: account.to_string(),
            message,
        }
    }

    fn fake_source() -> FakeSource {
        let mut source = FakeSource::default();
        source.messages.insert(
            "me@x.com".to_string(),
            vec![message(
                "m1",
                "Jane Doe <jane@x.com>",
                "me@x.com",
                "bob@x.com",
                "Mon, 1 Jan 2024 10:00:00 +0000",
            )],
        );
        source.events = vec![
            event(
                "e1",
                "Cinderella sync",
                "2024-01-05T10:00:00Z",
                &[("jane@x.com", Some("Jane")), ("ME@x.com", None), ("carol@x.com", None)],
            ),
            event("e2", "Lunch", "2024-01-06T12:00:00Z", &[("stranger@y.com", None)]),
            event("e3", "Coffee", "2024-01-07T09:00:00Z", &[("bob@x.com", None)]),
        ];
        source.failing = HashSet::from(["broken@x.com".to_string()]);
        source
    }

    #[test]
    fn email_then_meeting_widens_range() {
        let source = fake_source();
        let messages: Vec<_> = source.messages["me@x.com"]
            .iter()
            .cloned()
            .map(|m| fetched("me@x.com", m))
            .collect();

        let batch = build_batch(&job(), &messages, &source.events, Some("me@x.com"), 5000);

        let emails: Vec<_> = batch.contacts.iter().map(|c| c.email.as_str()).collect();
        assert_eq!(emails, vec!["bob@x.com", "carol@x.com", "jane@x.com"]);

        let jane = batch.contacts.iter().find(|c| c.email == "jane@x.com").unwrap();
        assert_eq!(jane.name, "Jane Doe");
        assert_eq!(jane.first_seen, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
        assert_eq!(jane.last_seen, Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap());

        assert_eq!(batch.summary.events_fetched, 3);
        assert_eq!(batch.summary.relevant_events, 2);
        assert_eq!(batch.summary.emails, 1);
        assert_eq!(batch.summary.meetings, 2);
        assert_eq!(batch.interactions.len(), 3);
    }

    #[test]
    fn meeting_before_email_gives_same_range() {
        let late_email = message(
            "m2",
            "jane@x.com",
            "me@x.com",
            "",
            "Fri, 5 Jan 2024 10:00:00 +0000",
        );
        let early_meeting = event(
            "e1",
            "Cinderella sync",
            "2024-01-01T10:00:00Z",
            &[("jane@x.com", None)],
        );
        let batch = build_batch(
            &job(),
            &[fetched("me@x.com", late_email)],
            &[early_meeting],
            Some("me@x.com"),
            5000,
        );
        let jane = &batch.contacts[0];
        assert_eq!(jane.first_seen, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
        assert_eq!(jane.last_seen, Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap());
    }

    #[test]
    fn undated_messages_are_skipped_and_bodies_truncated() {
        let mut undated = message("m0", "jane@x.com", "me@x.com", "", "");
        undated.internal_date = None;
        let dated = message(
            "m1",
            "jane@x.com",
            "me@x.com",
            "",
            "Mon, 1 Jan 2024 10:00:00 +0000",
        );
        let batch = build_batch(
            &job(),
            &[fetched("me@x.com", undated), fetched("me@x.com", dated)],
            &[],
            None,
            5,
        );
        assert_eq!(batch.summary.messages_fetched, 2);
        assert_eq!(batch.summary.emails, 1);
        match &batch.interactions[0].kind {
            InteractionKind::Email(email) => assert_eq!(email.body, "Hello"),
            InteractionKind::Meeting(_) => panic!("expected email"),
        }
    }

    #[test]
    fn all_day_events_start_at_midnight() {
        let mut all_day = event("e", "x", "", &[]);
        all_day.start = Some(crate::models::EventTime {
            date_time: None,
            date: Some("2024-02-03".to_string()),
        });
        assert_eq!(
            event_start(&all_day),
            Some(Utc.with_ymd_and_hms(2024, 2, 3, 0, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn run_sync_persists_and_reports_failed_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path().join("data/relintel.db"));
        config.accounts = vec![account("me@x.com"), account("broken@x.com")];
        config.calendar_account = Some(account("me@x.com"));

        let source = fake_source();
        let summary = run_sync(&source, &config, &job()).await.unwrap();
        assert_eq!(summary.failed_sources, vec!["broken@x.com"]);
        assert_eq!(summary.contacts, 3);

        let conn = db::open(&config.db_path).unwrap();
        let jane = queries::get_contact(&conn, "jane@x.com").unwrap().unwrap();
        assert_eq!(
            jane.first_seen,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(
            jane.last_seen,
            Some(Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap())
        );
        assert!(queries::get_contact(&conn, "me@x.com").unwrap().is_none());

        let project = queries::get_project(&conn, "cinderella").unwrap().unwrap();
        assert_eq!(project.contact_count, 3);
        assert_eq!(project.interaction_count, 3);
    }

    fn state_with(config: Config) -> AppState {
        let (queue_tx, _queue_rx) = mpsc::channel(1);
        AppState {
            config,
            runs: Arc::new(RwLock::new(HashMap::new())),
            queue_tx,
        }
    }

    fn queued(run_id: &str, at: DateTime<Utc>) -> SyncRunRecord {
        SyncRunRecord {
            run_id: run_id.to_string(),
            created_at: at,
            updated_at: at,
            status: RunState::Queued,
            message: None,
            job: job(),
            summary: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn run_record_completes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path().join("relintel.db"));
        config.accounts = vec![account("me@x.com")];
        let state = state_with(config);
        state
            .runs
            .write()
            .await
            .insert("r1".to_string(), queued("r1", Utc::now()));

        process_sync_run(&state, &fake_source(), "r1").await;

        let runs = state.runs.read().await;
        let run = &runs["r1"];
        assert_eq!(run.status, RunState::Completed);
        assert_eq!(run.summary.as_ref().map(|s| s.emails), Some(1));
    }

    #[tokio::test]
    async fn persistence_failure_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let mut config = test_config(blocker.join("relintel.db"));
        config.accounts = vec![account("me@x.com")];
        let state = state_with(config);
        state
            .runs
            .write()
            .await
            .insert("r1".to_string(), queued("r1", Utc::now()));

        process_sync_run(&state, &fake_source(), "r1").await;

        let runs = state.runs.read().await;
        let run = &runs["r1"];
        assert_eq!(run.status, RunState::Failed);
        assert_eq!(run.error.as_ref().map(|e| e.code.as_str()), Some("SYNC_FAILED"));
    }

    #[test]
    fn prune_keeps_active_and_recent_runs() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let old = now - ChronoDuration::hours(2);

        let mut finished_old = queued("old", old);
        finished_old.status = RunState::Completed;
        let mut finished_new = queued("new", now);
        finished_new.status = RunState::Failed;
        let running_old = SyncRunRecord {
            status: RunState::Running,
            ..queued("running", old)
        };

        let mut runs = HashMap::from([
            ("old".to_string(), finished_old),
            ("new".to_string(), finished_new),
            ("running".to_string(), running_old),
        ]);
        assert_eq!(prune_finished_runs(&mut runs, now, 3600), 1);
        assert!(runs.contains_key("new"));
        assert!(runs.contains_key("running"));
    }

    #[test]
    fn prune_tolerates_unrepresentable_retention() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let mut finished = queued("old", now - ChronoDuration::days(365));
        finished.status = RunState::Completed;
        let mut runs = HashMap::from([("old".to_string(), finished)]);

        assert_eq!(prune_finished_runs(&mut runs, now, u64::MAX), 0);
        assert_eq!(prune_finished_runs(&mut runs, now, i64::MAX as u64), 0);
        assert!(runs.contains_key("old"));
    }

    #[test]
    fn lookback_start_rejects_overflow() {
        let now = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(
            lookback_start(now, 30).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert!(lookback_start(now, 200_000_000).is_err());
    }

    #[tokio::test]
    async fn oversized_lookback_fails_run_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path().join("relintel.db"));
        config.accounts = vec![account("me@x.com")];

        let mut huge = job();
        huge.lookback_days = 200_000_000;
        let source = fake_source();
        assert!(run_sync(&source, &config, &huge).await.is_err());

        let state = state_with(config);
        state.runs.write().await.insert(
            "r1".to_string(),
            SyncRunRecord {
                job: huge,
                ..queued("r1", Utc::now())
            },
        );
        process_sync_run(&state, &source, "r1").await;

        let runs = state.runs.read().await;
        assert_eq!(runs["r1"].status, RunState::Failed);
        assert!(runs["r1"].is_finished());
    }
}
