use anyhow::Result;
use rusqlite::params;
use tracing::warn;

use super::{Store, format_timestamp, parse_timestamp};
use crate::core::model::{Agent, AgentKind, Script, ScriptKind, Timestamp, Trigger};

const AGENT_COLUMNS: &str = "a.id, a.connection_id, a.name, a.kind, a.enabled, a.archived,
    a.run_order, a.last_executed, a.host, a.port, a.username, a.password,
    a.directory, a.file_pattern,
    s.id, s.name, s.kind, s.content, s.executable_path, s.executable_arguments,
    s.requires_connection, s.unrestricted";

/// Raw row before kind strings are interpreted.
struct AgentRow {
    agent: Agent,
    kind: String,
    script: Option<ScriptRow>,
}

struct ScriptRow {
    id: i64,
    name: String,
    kind: String,
    content: Option<String>,
    executable_path: Option<String>,
    executable_arguments: String,
    requires_connection: bool,
    unrestricted: bool,
}

fn read_agent_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRow> {
    let script_id: Option<i64> = row.get(14)?;
    let script = match script_id {
        Some(id) => Some(ScriptRow {
            id,
            name: row.get(15)?,
            kind: row.get(16)?,
            content: row.get(17)?,
            executable_path: row.get(18)?,
            executable_arguments: row.get(19)?,
            requires_connection: row.get(20)?,
            unrestricted: row.get(21)?,
        }),
        None => None,
    };

    Ok(AgentRow {
        agent: Agent {
            id: row.get(0)?,
            connection_id: row.get(1)?,
            name: row.get(2)?,
            kind: AgentKind::Manual,
            enabled: row.get(4)?,
            archived: row.get(5)?,
            run_order: row.get(6)?,
            last_executed: parse_timestamp(7, row.get(7)?)?,
            host: row.get(8)?,
            port: row.get(9)?,
            username: row.get(10)?,
            password: row.get(11)?,
            directory: row.get(12)?,
            file_pattern: row.get(13)?,
            script: None,
            script_error: None,
            triggers: Vec::new(),
        },
        kind: row.get(3)?,
        script,
    })
}

fn into_script(row: ScriptRow) -> Result<Script, String> {
    let kind = ScriptKind::parse(&row.kind)
        .ok_or_else(|| format!("script '{}' has unknown kind '{}'", row.name, row.kind))?;
    let executable_arguments = parse_arguments(&row.executable_arguments)
        .map_err(|e| format!("script '{}' has unreadable executable_arguments: {}", row.name, e))?;
    Ok(Script {
        id: row.id,
        name: row.name,
        kind,
        content: row.content,
        executable_path: row.executable_path,
        executable_arguments,
        requires_connection: row.requires_connection,
        unrestricted: row.unrestricted,
    })
}

/// Arguments are a JSON array of strings, or a plain whitespace-separated
/// command line for rows written by older tooling.
fn parse_arguments(raw: &str) -> Result<Vec<String>, serde_json::Error> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed);
    }
    Ok(trimmed.split_whitespace().map(str::to_string).collect())
}

fn valid_trigger(day: i64, hour: i64, minute: i64) -> Option<Trigger> {
    if !(0..=6).contains(&day) || !(0..=23).contains(&hour) || !(0..=59).contains(&minute) {
        return None;
    }
    Some(Trigger::new(day as u8, hour as u8, minute as u8))
}

impl Store {
    /// Enabled, non-archived agents of a connection whose kind is in `kinds`,
    /// ordered by run order (unset last) then id. Triggers and script are
    /// attached.
    pub async fn load_agents(&self, connection_id: i64, kinds: &[AgentKind]) -> Result<Vec<Agent>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM agents a
             LEFT JOIN scripts s ON s.id = a.script_id
             WHERE a.connection_id = ?1 AND a.enabled = 1 AND a.archived = 0
             ORDER BY (a.run_order IS NULL), a.run_order, a.id",
            AGENT_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![connection_id], read_agent_row)?;

        let mut agents = Vec::new();
        for row in rows {
            let AgentRow {
                mut agent,
                kind,
                script,
            } = row?;
            let Some(kind) = AgentKind::parse(&kind) else {
                warn!("Skipping agent '{}' with unknown kind '{}'", agent.name, kind);
                continue;
            };
            if !kinds.contains(&kind) {
                continue;
            }
            agent.kind = kind;
            match script.map(into_script) {
                Some(Ok(script)) => agent.script = Some(script),
                Some(Err(reason)) => {
                    warn!("Agent '{}' ({}): {}", agent.name, agent.id, reason);
                    agent.script_error = Some(reason);
                }
                None => {}
            }
            agents.push(agent);
        }

        let mut trigger_stmt =
            db.prepare("SELECT day, hour, minute FROM agent_triggers WHERE agent_id = ?1 ORDER BY id")?;
        for agent in &mut agents {
            let rows = trigger_stmt.query_map(params![agent.id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
            })?;
            for row in rows {
                let (day, hour, minute) = row?;
                match valid_trigger(day, hour, minute) {
                    Some(trigger) => agent.triggers.push(trigger),
                    None => warn!(
                        "Ignoring out-of-range trigger {}/{}:{} on agent '{}'",
                        day, hour, minute, agent.name
                    ),
                }
            }
        }

        Ok(agents)
    }

    /// Persist a pipeline's accumulated last-run updates in one transaction.
    pub async fn record_last_executed(&self, updates: &[(i64, Timestamp)]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE agents SET last_executed = ?1 WHERE id = ?2")?;
            for (agent_id, at) in updates {
                stmt.execute(params![format_timestamp(at), agent_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
