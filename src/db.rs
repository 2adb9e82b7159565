use std::{fs, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        keywords TEXT,
        last_sync INTEGER,
        contact_count INTEGER NOT NULL DEFAULT 0,
        interaction_count INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER DEFAULT (strftime('%s', 'now'))
    );
    CREATE TABLE IF NOT EXISTS contacts (
        email TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        first_seen INTEGER,
        last_seen INTEGER,
        notes TEXT,
        status TEXT,
        tags TEXT,
        updated_at INTEGER DEFAULT (strftime('%s', 'now'))
    );
    CREATE TABLE IF NOT EXISTS contact_projects (
        contact_email TEXT NOT NULL,
        project_id TEXT NOT NULL,
        PRIMARY KEY (contact_email, project_id),
        FOREIGN KEY (contact_email) REFERENCES contacts(email),
        FOREIGN KEY (project_id) REFERENCES projects(id)
    );
    CREATE TABLE IF NOT EXISTS interactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        type TEXT NOT NULL,
        project_id TEXT,
        message_id TEXT,
        thread_id TEXT,
        event_id TEXT,
        from_email TEXT,
        from_name TEXT,
        subject TEXT,
        title TEXT,
        description TEXT,
        date INTEGER,
        snippet TEXT,
        body TEXT,
        account TEXT,
        created_at INTEGER DEFAULT (strftime('%s', 'now')),
        FOREIGN KEY (project_id) REFERENCES projects(id)
    );
    CREATE TABLE IF NOT EXISTS interaction_participants (
        interaction_id INTEGER NOT NULL,
        email TEXT NOT NULL,
        name TEXT,
        role TEXT NOT NULL,
        FOREIGN KEY (interaction_id) REFERENCES interactions(id)
    );
    CREATE INDEX IF NOT EXISTS idx_contacts_last_seen ON contacts(last_seen DESC);
    CREATE INDEX IF NOT EXISTS idx_interactions_project ON interactions(project_id, date DESC);
    CREATE INDEX IF NOT EXISTS idx_interactions_date ON interactions(date DESC);
    CREATE INDEX IF NOT EXISTS idx_participants_email ON interaction_participants(email);
";

/// Open the store at `path`, creating parent directories and schema as needed.
pub fn open(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed creating database directory {}", parent.display()))?;
        }
    }

    let conn = Connection::open(path)
        .with_context(|| format!("Failed opening database {}", path.display()))?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )?;
    migrate(&conn)?;
    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(SCHEMA)
        .context("Failed applying database schema")
}

pub fn to_epoch(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
}

pub fn from_epoch(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

pub fn split_list(value: Option<String>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
pub fn open_in_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory sqlite");
    migrate(&conn).expect("schema");
    conn
}
