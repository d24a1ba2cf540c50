//! Seeding helpers standing in for the administrative layer in tests.

use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use super::{Store, parse_timestamp};
use crate::core::model::{AgentKind, FileStatus, Script, Timestamp};

pub struct AgentSeed {
    pub id: i64,
    pub connection_id: i64,
    pub kind: AgentKind,
    pub enabled: bool,
    pub archived: bool,
    pub run_order: Option<i64>,
    pub last_executed: Option<String>,
    pub host: Option<String>,
    pub port: Option<i64>,
    pub password: Option<String>,
    pub directory: Option<String>,
    pub file_pattern: Option<String>,
    pub script_id: Option<i64>,
}

impl AgentSeed {
    pub fn new(id: i64, connection_id: i64, kind: AgentKind) -> Self {
        Self {
            id,
            connection_id,
            kind,
            enabled: true,
            archived: false,
            run_order: None,
            last_executed: None,
            host: Some("files.example.org".into()),
            port: None,
            password: Some("secret".into()),
            directory: Some("/outbox".into()),
            file_pattern: Some("*.csv".into()),
            script_id: None,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn archived(mut self, archived: bool) -> Self {
        self.archived = archived;
        self
    }

    pub fn run_order(mut self, order: i64) -> Self {
        self.run_order = Some(order);
        self
    }

    pub fn last_executed(mut self, rfc3339: &str) -> Self {
        self.last_executed = Some(rfc3339.to_string());
        self
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    pub fn port(mut self, port: i64) -> Self {
        self.port = Some(port);
        self
    }

    pub fn file_pattern(mut self, pattern: &str) -> Self {
        self.file_pattern = Some(pattern.to_string());
        self
    }

    pub fn script(mut self, script_id: i64) -> Self {
        self.script_id = Some(script_id);
        self
    }
}

impl Store {
    pub async fn seed_connection(&self, id: i64, name: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO connections (id, name, url, api_version) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, format!("https://api{}.example.org", id), "5.3"],
        )?;
        Ok(())
    }

    pub async fn seed_agent(&self, seed: &AgentSeed) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO agents (id, connection_id, name, kind, enabled, archived, run_order,
                last_executed, host, port, username, password, directory, file_pattern, script_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'loader', ?11, ?12, ?13, ?14)",
            params![
                seed.id,
                seed.connection_id,
                format!("agent-{}", seed.id),
                seed.kind.as_str(),
                seed.enabled,
                seed.archived,
                seed.run_order,
                seed.last_executed,
                seed.host,
                seed.port,
                seed.password,
                seed.directory,
                seed.file_pattern,
                seed.script_id,
            ],
        )?;
        Ok(())
    }

    pub async fn seed_trigger(&self, agent_id: i64, day: i64, hour: i64, minute: i64) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO agent_triggers (agent_id, day, hour, minute) VALUES (?1, ?2, ?3, ?4)",
            params![agent_id, day, hour, minute],
        )?;
        Ok(())
    }

    pub async fn seed_script(&self, script: &Script) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO scripts (id, name, kind, content, executable_path, executable_arguments,
                requires_connection, unrestricted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                script.id,
                script.name,
                script.kind.as_str(),
                script.content,
                script.executable_path,
                serde_json::to_string(&script.executable_arguments)?,
                script.requires_connection,
                script.unrestricted,
            ],
        )?;
        Ok(())
    }

    /// Script row with kind and arguments written verbatim.
    pub async fn seed_raw_script(&self, id: i64, kind: &str, arguments: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO scripts (id, name, kind, content, executable_path, executable_arguments,
                requires_connection, unrestricted)
             VALUES (?1, ?2, ?3, NULL, '/opt/export', ?4, 0, 0)",
            params![id, format!("script-{}", id), kind, arguments],
        )?;
        Ok(())
    }

    pub async fn last_executed(&self, agent_id: i64) -> Result<Option<Timestamp>> {
        let db = self.db.lock().await;
        let value: Option<Option<String>> = db
            .query_row(
                "SELECT last_executed FROM agents WHERE id = ?1",
                params![agent_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(parse_timestamp(0, value.flatten())?)
    }

    pub async fn set_file_status(&self, file_id: i64, status: FileStatus) -> Result<bool> {
        let db = self.db.lock().await;
        let updated = db.execute(
            "UPDATE files SET status = ?1 WHERE id = ?2",
            params![status.as_str(), file_id],
        )?;
        Ok(updated > 0)
    }
}
