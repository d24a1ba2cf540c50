use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use super::{Store, format_timestamp, parse_timestamp};
use crate::core::model::{JobStatus, Timestamp};

impl Store {
    /// Start of a cycle: `started = now`, `completed` cleared. Clamped so a
    /// clock stepping backwards never moves started behind the previous cycle.
    pub async fn mark_job_started(&self, now: Timestamp) -> Result<()> {
        let db = self.db.lock().await;
        let previous: Option<(Option<String>, Option<String>)> = db
            .query_row(
                "SELECT started, completed FROM job_status WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let mut started = now;
        if let Some((prev_started, prev_completed)) = previous {
            for prev in [parse_timestamp(0, prev_started)?, parse_timestamp(1, prev_completed)?]
                .into_iter()
                .flatten()
            {
                started = started.max(prev);
            }
        }
        db.execute(
            "INSERT INTO job_status (id, started, completed) VALUES (1, ?1, NULL)
             ON CONFLICT(id) DO UPDATE SET started = excluded.started, completed = NULL",
            params![format_timestamp(&started)],
        )?;
        Ok(())
    }

    /// End of a cycle: `completed = now`, `started` untouched. Clamped so
    /// completed never precedes started.
    pub async fn mark_job_completed(&self, now: Timestamp) -> Result<()> {
        let db = self.db.lock().await;
        let started: Option<Option<String>> = db
            .query_row("SELECT started FROM job_status WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        let completed = match parse_timestamp(0, started.flatten())? {
            Some(started) if started > now => started,
            _ => now,
        };
        db.execute(
            "INSERT INTO job_status (id, started, completed) VALUES (1, NULL, ?1)
             ON CONFLICT(id) DO UPDATE SET completed = excluded.completed",
            params![format_timestamp(&completed)],
        )?;
        Ok(())
    }

    pub async fn job_status(&self) -> Result<JobStatus> {
        let db = self.db.lock().await;
        let row: Option<(Option<String>, Option<String>)> = db
            .query_row(
                "SELECT started, completed FROM job_status WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((started, completed)) = row else {
            return Ok(JobStatus::default());
        };
        Ok(JobStatus {
            started: parse_timestamp(0, started)?,
            completed: parse_timestamp(1, completed)?,
        })
    }
}
