mod agents;
mod connections;
mod job_status;
mod ledger;

#[cfg(test)]
pub mod fixtures;

use anyhow::Result;
use chrono::DateTime;
use rusqlite::Connection;
use rusqlite::types::Type;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::model::Timestamp;
use crate::platform::{NativePlatform, Platform};

/// SQLite-backed store for the records the core reads (connections, agents,
/// triggers, scripts) and writes (file ledger, job status, last-run times).
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
                NativePlatform::restrict_dir_permissions(parent);
            }
        }

        let db = Connection::open(path)?;
        NativePlatform::restrict_file_permissions(path);
        init_schema(&db)?;
        info!("Opened store at {:?}", path);

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        init_schema(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

fn init_schema(db: &Connection) -> Result<()> {
    db.execute("PRAGMA foreign_keys = ON", [])?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS connections (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            api_version TEXT
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS scripts (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            content TEXT,
            executable_path TEXT,
            executable_arguments TEXT NOT NULL DEFAULT '[]',
            requires_connection INTEGER NOT NULL DEFAULT 0,
            unrestricted INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS agents (
            id INTEGER PRIMARY KEY,
            connection_id INTEGER NOT NULL REFERENCES connections(id),
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            archived INTEGER NOT NULL DEFAULT 0,
            run_order INTEGER,
            last_executed TEXT,
            host TEXT,
            port INTEGER,
            username TEXT,
            password TEXT,
            directory TEXT,
            file_pattern TEXT,
            script_id INTEGER REFERENCES scripts(id)
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS agent_triggers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_id INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
            day INTEGER NOT NULL,
            hour INTEGER NOT NULL,
            minute INTEGER NOT NULL
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_id INTEGER NOT NULL REFERENCES agents(id),
            file_name TEXT NOT NULL,
            url TEXT NOT NULL,
            rows INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // At most one live ledger entry per agent and file name.
    db.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_files_agent_file_name
            ON files(agent_id, file_name) WHERE status <> 'Deleted'",
        [],
    )?;

    db.execute(
        "CREATE INDEX IF NOT EXISTS idx_agents_connection ON agents(connection_id)",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS job_status (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            started TEXT,
            completed TEXT
        )",
        [],
    )?;

    Ok(())
}

fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339()
}

fn parse_timestamp(idx: usize, value: Option<String>) -> rusqlite::Result<Option<Timestamp>> {
    match value {
        None => Ok(None),
        Some(text) => DateTime::parse_from_rfc3339(&text)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
    }
}
