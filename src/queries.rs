use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{
    db::{from_epoch, split_list, to_epoch},
    models::{ContactDetail, ContactPatch, ContactRow, InteractionRow, ParticipantRow, ProjectRow},
};

pub const CONTACT_INTERACTION_LIMIT: i64 = 100;

const PROJECT_COLUMNS: &str =
    "p.id, p.name, p.description, p.keywords, p.last_sync, p.contact_count, p.interaction_count, p.created_at";

const CONTACT_COLUMNS: &str =
    "c.email, c.name, c.first_seen, c.last_seen, c.notes, c.status, c.tags, c.updated_at";

const INTERACTION_COLUMNS: &str = "i.id, i.type, i.project_id, i.message_id, i.thread_id, i.event_id, i.from_email, i.from_name, i.subject, i.title, i.description, i.date, i.snippet, i.body, i.account, i.created_at";

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectRow> {
    Ok(ProjectRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        keywords: split_list(row.get(3)?),
        last_sync: from_epoch(row.get(4)?),
        contact_count: row.get(5)?,
        interaction_count: row.get(6)?,
        created_at: from_epoch(row.get(7)?),
    })
}

fn contact_from_row(row: &Row<'_>) -> rusqlite::Result<ContactRow> {
    Ok(ContactRow {
        email: row.get(0)?,
        name: row.get(1)?,
        first_seen: from_epoch(row.get(2)?),
        last_seen: from_epoch(row.get(3)?),
        notes: row.get(4)?,
        status: row.get(5)?,
        tags: split_list(row.get(6)?),
        updated_at: from_epoch(row.get(7)?),
        interaction_count: None,
    })
}

fn interaction_from_row(row: &Row<'_>) -> rusqlite::Result<InteractionRow> {
    Ok(InteractionRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        project_id: row.get(2)?,
        message_id: row.get(3)?,
        thread_id: row.get(4)?,
        event_id: row.get(5)?,
        from_email: row.get(6)?,
        from_name: row.get(7)?,
        subject: row.get(8)?,
        title: row.get(9)?,
        description: row.get(10)?,
        date: from_epoch(row.get(11)?),
        snippet: row.get(12)?,
        body: row.get(13)?,
        account: row.get(14)?,
        created_at: from_epoch(row.get(15)?),
        participants: Vec::new(),
    })
}

pub fn list_projects(conn: &Connection) -> Result<Vec<ProjectRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {PROJECT_COLUMNS} FROM projects p ORDER BY p.id"))?;
    let rows = stmt.query_map([], project_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn get_project(conn: &Connection, project_id: &str) -> Result<Option<ProjectRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects p WHERE p.id = ?1"),
            params![project_id],
            project_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Contacts linked to a project, most recently seen first, each with the
/// number of project interactions they sent or took part in.
pub fn project_contacts(conn: &Connection, project_id: &str) -> Result<Vec<ContactRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONTACT_COLUMNS}, COUNT(DISTINCT i.id)
         FROM contacts c
         JOIN contact_projects cp ON c.email = cp.contact_email
         LEFT JOIN interactions i ON i.project_id = ?1
            AND (i.from_email = c.email OR EXISTS (
                SELECT 1 FROM interaction_participants ip
                WHERE ip.interaction_id = i.id AND ip.email = c.email
            ))
         WHERE cp.project_id = ?1
         GROUP BY c.email
         ORDER BY c.last_seen DESC, c.email"
    ))?;
    let rows = stmt.query_map(params![project_id], |row| {
        let mut contact = contact_from_row(row)?;
        contact.interaction_count = Some(row.get(8)?);
        Ok(contact)
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn get_contact(conn: &Connection, email: &str) -> Result<Option<ContactRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {CONTACT_COLUMNS} FROM contacts c WHERE c.email = ?1"),
            params![email],
            contact_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn contact_detail(conn: &Connection, email: &str) -> Result<Option<ContactDetail>> {
    let Some(contact) = get_contact(conn, email)? else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects p
         JOIN contact_projects cp ON p.id = cp.project_id
         WHERE cp.contact_email = ?1
         ORDER BY p.id"
    ))?;
    let projects = stmt
        .query_map(params![email], project_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Some(ContactDetail { contact, projects }))
}

/// Interactions a contact sent or took part in, newest first, with their
/// participant lists.
pub fn contact_interactions(
    conn: &Connection,
    email: &str,
    project_id: Option<&str>,
) -> Result<Vec<InteractionRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT {INTERACTION_COLUMNS}
         FROM interactions i
         LEFT JOIN interaction_participants ip ON i.id = ip.interaction_id
         WHERE (i.from_email = ?1 OR ip.email = ?1)
           AND (?2 IS NULL OR i.project_id = ?2)
         ORDER BY i.date DESC, i.id DESC
         LIMIT ?3"
    ))?;
    let mut interactions = stmt
        .query_map(
            params![email, project_id, CONTACT_INTERACTION_LIMIT],
            interaction_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut participants_stmt = conn.prepare(
        "SELECT email, name, role FROM interaction_participants
         WHERE interaction_id = ?1
         ORDER BY rowid",
    )?;
    for interaction in &mut interactions {
        interaction.participants = participants_stmt
            .query_map(params![interaction.id], |row| {
                Ok(ParticipantRow {
                    email: row.get(0)?,
                    name: row.get(1)?,
                    role: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
    }

    Ok(interactions)
}

/// Apply an annotation patch. Merge-derived fields are never written here.
/// Returns `None` when the contact does not exist.
pub fn update_contact_annotations(
    conn: &Connection,
    email: &str,
    patch: &ContactPatch,
    now: DateTime<Utc>,
) -> Result<Option<ContactRow>> {
    let tags = patch.tags.as_ref().map(|t| t.joined());
    let changed = conn.execute(
        "UPDATE contacts SET
            notes = CASE WHEN ?1 THEN ?2 ELSE notes END,
            status = CASE WHEN ?3 THEN ?4 ELSE status END,
            tags = CASE WHEN ?5 THEN ?6 ELSE tags END,
            updated_at = ?7
         WHERE email = ?8",
        params![
            patch.notes.is_some(),
            patch.notes,
            patch.status.is_some(),
            patch.status,
            tags.is_some(),
            tags,
            to_epoch(now),
            email
        ],
    )?;

    if changed == 0 {
        return Ok(None);
    }
    get_contact(conn, email)
}
