use anyhow::Result;
use rusqlite::params;

use super::{Store, format_timestamp, parse_timestamp};
use crate::core::model::{FileStatus, LedgerEntry, Timestamp};

const ENTRY_COLUMNS: &str = "id, agent_id, file_name, url, rows, status, created_at";

fn read_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let status: String = row.get(5)?;
    let created_at = parse_timestamp(6, row.get(6)?)?.ok_or(rusqlite::Error::InvalidColumnType(
        6,
        "created_at".into(),
        rusqlite::types::Type::Null,
    ))?;
    Ok(LedgerEntry {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        file_name: row.get(2)?,
        url: row.get(3)?,
        rows: row.get(4)?,
        status: FileStatus::parse(&status).unwrap_or(FileStatus::Uploaded),
        created_at,
    })
}

impl Store {
    /// Whether the agent already staged a file with this name. Deleted entries
    /// do not count.
    pub async fn file_exists_in_log(&self, agent_id: i64, file_name: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM files WHERE agent_id = ?1 AND file_name = ?2 AND status <> 'Deleted'",
            params![agent_id, file_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub async fn log_file(
        &self,
        agent_id: i64,
        file_name: &str,
        url: &str,
        rows: i64,
        status: FileStatus,
        created_at: Timestamp,
    ) -> Result<LedgerEntry> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO files (agent_id, file_name, url, rows, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                agent_id,
                file_name,
                url,
                rows,
                status.as_str(),
                format_timestamp(&created_at)
            ],
        )?;
        Ok(LedgerEntry {
            id: db.last_insert_rowid(),
            agent_id,
            file_name: file_name.to_string(),
            url: url.to_string(),
            rows,
            status,
            created_at,
        })
    }

    pub async fn recent_files(&self, limit: usize) -> Result<Vec<LedgerEntry>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM files ORDER BY id DESC LIMIT ?1", ENTRY_COLUMNS);
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], read_entry)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub async fn files_for_agent(&self, agent_id: i64) -> Result<Vec<LedgerEntry>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM files WHERE agent_id = ?1 ORDER BY id", ENTRY_COLUMNS);
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![agent_id], read_entry)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}
