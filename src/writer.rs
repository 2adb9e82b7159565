use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::{
    db::{from_epoch, to_epoch},
    models::{ContactRecord, Interaction, InteractionKind, ProjectDescriptor},
};

/// Merge-relevant contact fields as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRange {
    pub name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Resolve the row to write for `incoming` given what is already stored.
///
/// The stored name survives unless the incoming one is non-empty; the seen
/// range only ever widens.
pub fn merge_contact_row(existing: Option<&StoredContact>, incoming: &ContactRecord) -> ContactRange {
    let Some(existing) = existing else {
        return ContactRange {
            name: incoming.name.clone(),
            first_seen: incoming.first_seen,
            last_seen: incoming.last_seen,
        };
    };

    let name = if incoming.name.trim().is_empty() {
        existing.name.clone()
    } else {
        incoming.name.clone()
    };
    let first_seen = existing
        .first_seen
        .map_or(incoming.first_seen, |v| v.min(incoming.first_seen));
    let last_seen = existing
        .last_seen
        .map_or(incoming.last_seen, |v| v.max(incoming.last_seen));

    ContactRange {
        name,
        first_seen,
        last_seen,
    }
}

#[derive(Debug, Clone)]
pub struct StoredContact {
    pub name: String,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct ProjectCounts {
    pub contacts: usize,
    pub interactions: usize,
}

/// Batch 1: project upsert, contact upserts and project links in one
/// transaction.
pub fn write_contacts(
    conn: &mut Connection,
    project: &ProjectDescriptor,
    contacts: &[ContactRecord],
    counts: ProjectCounts,
    synced_at: DateTime<Utc>,
) -> Result<usize> {
    let tx = conn.transaction().context("Failed to open contact batch")?;
    upsert_project(&tx, project, counts, synced_at)?;

    for contact in contacts {
        let existing = load_stored_contact(&tx, &contact.email)?;
        let merged = merge_contact_row(existing.as_ref(), contact);
        tx.execute(
            "INSERT INTO contacts (email, name, first_seen, last_seen, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(email) DO UPDATE SET
                name = excluded.name,
                first_seen = excluded.first_seen,
                last_seen = excluded.last_seen,
                updated_at = excluded.updated_at",
            params![
                contact.email,
                merged.name,
                to_epoch(merged.first_seen),
                to_epoch(merged.last_seen),
                to_epoch(synced_at)
            ],
        )
        .with_context(|| format!("Failed upserting contact {}", contact.email))?;
        tx.execute(
            "INSERT OR IGNORE INTO contact_projects (contact_email, project_id) VALUES (?1, ?2)",
            params![contact.email, project.id],
        )
        .with_context(|| format!("Failed linking contact {}", contact.email))?;
    }

    tx.commit().context("Failed to commit contact batch")?;
    Ok(contacts.len())
}

/// Batch 2: interactions and their participants in one transaction. Existing
/// interaction rows are never touched.
pub fn write_interactions(conn: &mut Connection, interactions: &[Interaction]) -> Result<usize> {
    let tx = conn
        .transaction()
        .context("Failed to open interaction batch")?;

    for interaction in interactions {
        let id = insert_interaction(&tx, interaction)?;
        for (person, role) in interaction.participants() {
            tx.execute(
                "INSERT INTO interaction_participants (interaction_id, email, name, role)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, person.email, person.name, role.as_str()],
            )?;
        }
    }

    tx.commit().context("Failed to commit interaction batch")?;
    Ok(interactions.len())
}

fn upsert_project(
    tx: &Transaction<'_>,
    project: &ProjectDescriptor,
    counts: ProjectCounts,
    synced_at: DateTime<Utc>,
) -> Result<()> {
    tx.execute(
        "INSERT INTO projects (id, name, description, keywords, last_sync, contact_count, interaction_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            last_sync = excluded.last_sync,
            contact_count = excluded.contact_count,
            interaction_count = excluded.interaction_count",
        params![
            project.id,
            project.name,
            project.description,
            project.keywords.join(","),
            to_epoch(synced_at),
            counts.contacts as i64,
            counts.interactions as i64
        ],
    )
    .with_context(|| format!("Failed upserting project {}", project.id))?;
    Ok(())
}

fn load_stored_contact(tx: &Transaction<'_>, email: &str) -> Result<Option<StoredContact>> {
    let row = tx
        .query_row(
            "SELECT name, first_seen, last_seen FROM contacts WHERE email = ?1",
            params![email],
            |row| {
                Ok(StoredContact {
                    name: row.get(0)?,
                    first_seen: from_epoch(row.get(1)?),
                    last_seen: from_epoch(row.get(2)?),
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn insert_interaction(tx: &Transaction<'_>, interaction: &Interaction) -> Result<i64> {
    let date = to_epoch(interaction.date);
    match &interaction.kind {
        InteractionKind::Email(email) => {
            tx.execute(
                "INSERT INTO interactions (
                    type, project_id, message_id, thread_id, from_email, from_name,
                    subject, date, snippet, body, account
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    interaction.kind_str(),
                    interaction.project_id,
                    email.message_id,
                    email.thread_id,
                    email.from.as_ref().map(|a| a.email.as_str()),
                    email.from.as_ref().map(|a| a.name.as_str()),
                    email.subject,
                    date,
                    email.snippet,
                    email.body,
                    email.account
                ],
            )
            .with_context(|| format!("Failed inserting email {}", email.message_id))?;
        }
        InteractionKind::Meeting(meeting) => {
            tx.execute(
                "INSERT INTO interactions (
                    type, project_id, event_id, title, description, date
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    interaction.kind_str(),
                    interaction.project_id,
                    meeting.event_id,
                    meeting.title,
                    meeting.description,
                    date
                ],
            )
            .with_context(|| format!("Failed inserting meeting {}", meeting.event_id))?;
        }
    }
    Ok(tx.last_insert_rowid())
}
