use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use super::Store;
use crate::core::model::Connection;

fn read_connection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Connection> {
    Ok(Connection {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        api_version: row.get(3)?,
    })
}

impl Store {
    pub async fn list_connections(&self) -> Result<Vec<Connection>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT id, name, url, api_version FROM connections ORDER BY id")?;
        let rows = stmt.query_map([], read_connection)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub async fn get_connection(&self, id: i64) -> Result<Option<Connection>> {
        let db = self.db.lock().await;
        let connection = db
            .query_row(
                "SELECT id, name, url, api_version FROM connections WHERE id = ?1",
                params![id],
                read_connection,
            )
            .optional()?;
        Ok(connection)
    }
}
