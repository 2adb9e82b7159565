use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A parsed `{name, email}` pair. `email` is always trimmed and lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub email: String,
}

// ----------------------------------------------------------------------------
// Raw source payloads (Gmail v1 / Calendar v3 shapes)
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageHeader {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<MessageHeader>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    /// Provider receive time, epoch milliseconds as a decimal string.
    #[serde(default)]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

/// A message together with the mailbox it was fetched from.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub account: String,
    pub message: RawMessage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    #[serde(default)]
    pub date_time: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAttendee {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start: Option<EventTime>,
    #[serde(default)]
    pub attendees: Vec<EventAttendee>,
}

// ----------------------------------------------------------------------------
// Sync pipeline records
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    pub message_id: String,
    pub thread_id: String,
    pub from: Option<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub subject: String,
    pub date: Option<DateTime<Utc>>,
    pub snippet: String,
    pub body: String,
}

/// One accumulated contact. `first_seen <= last_seen` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    pub email: String,
    pub name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    To,
    Cc,
    Attendee,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::To => "to",
            Self::Cc => "cc",
            Self::Attendee => "attendee",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailInteraction {
    pub message_id: String,
    pub thread_id: String,
    pub account: String,
    pub from: Option<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub subject: String,
    pub snippet: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct MeetingInteraction {
    pub event_id: String,
    pub title: String,
    pub description: String,
    pub attendees: Vec<Address>,
}

#[derive(Debug, Clone)]
pub enum InteractionKind {
    Email(EmailInteraction),
    Meeting(MeetingInteraction),
}

#[derive(Debug, Clone)]
pub struct Interaction {
    pub project_id: String,
    pub date: DateTime<Utc>,
    pub kind: InteractionKind,
}

impl Interaction {
    pub fn kind_str(&self) -> &'static str {
        match self.kind {
            InteractionKind::Email(_) => "email",
            InteractionKind::Meeting(_) => "meeting",
        }
    }

    /// Participant rows in insertion order: to, cc, then attendees.
    pub fn participants(&self) -> Vec<(&Address, ParticipantRole)> {
        match &self.kind {
            InteractionKind::Email(email) => email
                .to
                .iter()
                .map(|a| (a, ParticipantRole::To))
                .chain(email.cc.iter().map(|a| (a, ParticipantRole::Cc)))
                .collect(),
            InteractionKind::Meeting(meeting) => meeting
                .attendees
                .iter()
                .map(|a| (a, ParticipantRole::Attendee))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub keywords: Vec<String>,
}

// ----------------------------------------------------------------------------
// Stored rows as served by the API
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub contact_count: i64,
    pub interaction_count: i64,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRow {
    pub email: String,
    pub name: String,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub status: Option<String>,
    pub tags: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interaction_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDetail {
    #[serde(flatten)]
    pub contact: ContactRow,
    pub projects: Vec<ProjectRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRow {
    pub email: String,
    pub name: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRow {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub project_id: Option<String>,
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
    pub event_id: Option<String>,
    pub from_email: Option<String>,
    pub from_name: Option<String>,
    pub subject: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub snippet: Option<String>,
    pub body: Option<String>,
    pub account: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub participants: Vec<ParticipantRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagsInput {
    Text(String),
    List(Vec<String>),
}

impl TagsInput {
    pub fn joined(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::List(items) => items.join(","),
        }
    }
}

/// Annotation update. Only these fields are writable through the API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPatch {
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tags: Option<TagsInput>,
}

impl ContactPatch {
    pub fn is_empty(&self) -> bool {
        self.notes.is_none() && self.status.is_none() && self.tags.is_none()
    }
}

// ----------------------------------------------------------------------------
// Sync runs
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub lookback_days: Option<u32>,
}

/// A fully resolved sync job: request values merged over configured defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    pub project_id: String,
    pub project_name: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub lookback_days: u32,
}

impl SyncJob {
    pub fn project(&self) -> ProjectDescriptor {
        ProjectDescriptor {
            id: self.project_id.clone(),
            name: self.project_name.clone(),
            description: self.description.clone(),
            keywords: self.keywords.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub messages_fetched: usize,
    pub events_fetched: usize,
    pub relevant_events: usize,
    pub contacts: usize,
    pub interactions: usize,
    pub emails: usize,
    pub meetings: usize,
    pub failed_sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunResponse {
    pub run_id: String,
    pub status: RunState,
    pub project_id: String,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub summary: Option<SyncSummary>,
    pub error: Option<SyncErrorPayload>,
}

#[derive(Debug, Clone)]
pub struct SyncRunRecord {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: RunState,
    pub message: Option<String>,
    pub job: SyncJob,
    pub summary: Option<SyncSummary>,
    pub error: Option<SyncErrorPayload>,
}

impl SyncRunRecord {
    pub fn to_response(&self) -> SyncRunResponse {
        let elapsed = (self.updated_at - self.created_at).num_milliseconds().max(0) as u64;
        SyncRunResponse {
            run_id: self.run_id.clone(),
            status: self.status,
            project_id: self.job.project_id.clone(),
            message: self.message.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            elapsed_ms: elapsed,
            summary: self.summary.clone(),
            error: self.error.clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, RunState::Completed | RunState::Failed)
    }
}
