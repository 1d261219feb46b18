//! SQLite result backend for job state
//!
//! Keeps job state across restarts so pending work can be resumed and
//! terminal payloads stay pollable until their retention window expires.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, types::Type, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

use super::connection::SqliteConnector;
use crate::error::{Error, Result};
use crate::processing::{FailureKind, JobRecord, JobState};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS job_states (
        id TEXT PRIMARY KEY,
        state TEXT NOT NULL,
        query TEXT NOT NULL,
        file_path TEXT NOT NULL,
        username TEXT,
        result TEXT,
        error TEXT,
        failure_kind TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        completed_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_job_states_state ON job_states(state);
    CREATE INDEX IF NOT EXISTS idx_job_states_completed_at ON job_states(completed_at);
"#;

/// Persistent job state table
pub struct JobStateDb {
    connector: SqliteConnector,
}

impl JobStateDb {
    /// Open the backend at the given path and create the schema if needed
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let connector = SqliteConnector::new(path)?;
        connector.migrate(SCHEMA)?;
        Ok(Self { connector })
    }

    /// Insert or overwrite a job's state
    pub fn save(&self, job: &JobRecord) -> Result<()> {
        let conn = self.connector.open()?;

        conn.execute(
            r#"
            INSERT INTO job_states (
                id, state, query, file_path, username, result, error, failure_kind,
                attempts, created_at, updated_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                result = excluded.result,
                error = excluded.error,
                failure_kind = excluded.failure_kind,
                attempts = excluded.attempts,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at
            "#,
            params![
                job.id.to_string(),
                job.state.as_str(),
                job.query,
                job.file_path,
                job.username,
                job.result,
                job.error,
                job.failure_kind.map(FailureKind::as_str),
                job.attempts as i64,
                format_timestamp(job.created_at),
                format_timestamp(job.updated_at),
                job.completed_at.map(format_timestamp),
            ],
        )
        .map_err(|e| Error::database(format!("Failed to save job {}: {}", job.id, e)))?;

        Ok(())
    }

    /// Get a job by ID
    pub fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        let conn = self.connector.open()?;

        conn.query_row(
            "SELECT * FROM job_states WHERE id = ?1",
            params![job_id.to_string()],
            row_to_job_record,
        )
        .optional()
        .map_err(|e| Error::database(format!("Failed to get job {}: {}", job_id, e)))
    }

    /// Jobs that never reached a terminal state, oldest first
    pub fn incomplete(&self) -> Result<Vec<JobRecord>> {
        let conn = self.connector.open()?;

        let mut stmt = conn
            .prepare(
                "SELECT * FROM job_states WHERE state IN ('pending', 'running') ORDER BY created_at ASC",
            )
            .map_err(|e| Error::database(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], row_to_job_record)
            .map_err(|e| Error::database(format!("Failed to list incomplete jobs: {}", e)))?;

        // One unreadable row must not block resuming the rest
        let mut records = Vec::new();
        for row in rows {
            match row {
                Ok(record) => records.push(record),
                Err(e) => tracing::error!("Skipping unreadable incomplete job: {}", e),
            }
        }

        Ok(records)
    }

    /// Remove a job that was never dispatched
    pub fn delete(&self, job_id: Uuid) -> Result<bool> {
        let conn = self.connector.open()?;

        let count = conn
            .execute(
                "DELETE FROM job_states WHERE id = ?1",
                params![job_id.to_string()],
            )
            .map_err(|e| Error::database(format!("Failed to delete job {}: {}", job_id, e)))?;

        Ok(count > 0)
    }

    /// Delete terminal jobs completed before the cutoff
    pub fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.connector.open()?;

        let count = conn
            .execute(
                r#"
                DELETE FROM job_states
                WHERE state IN ('succeeded', 'failed') AND completed_at < ?1
                "#,
                params![format_timestamp(cutoff)],
            )
            .map_err(|e| Error::database(format!("Failed to purge jobs: {}", e)))?;

        Ok(count)
    }
}

// Fixed-width so completed_at compares correctly as text
fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_failure(column, e))
}

fn conversion_failure<E>(column: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e))
}

fn row_to_job_record(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
    let id_str: String = row.get(0)?;
    let state_str: String = row.get(1)?;
    let failure_kind: Option<String> = row.get(7)?;
    let attempts: i64 = row.get(8)?;
    let created_at_str: String = row.get(9)?;
    let updated_at_str: String = row.get(10)?;
    let completed_at_str: Option<String> = row.get(11)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| conversion_failure(0, e))?;

    Ok(JobRecord {
        id,
        // an unreadable state is treated as failed rather than re-run
        state: JobState::parse(&state_str).unwrap_or(JobState::Failed),
        query: row.get(2)?,
        file_path: row.get(3)?,
        username: row.get(4)?,
        result: row.get(5)?,
        error: row.get(6)?,
        failure_kind: failure_kind.as_deref().and_then(FailureKind::parse),
        attempts: attempts as u32,
        created_at: parse_timestamp(9, &created_at_str)?,
        updated_at: parse_timestamp(10, &updated_at_str)?,
        completed_at: completed_at_str
            .as_deref()
            .map(|s| parse_timestamp(11, s))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::Job;
    use std::path::PathBuf;

    fn record() -> JobRecord {
        JobRecord::pending(&Job {
            id: Uuid::new_v4(),
            query: "Summarize cash flow".to_string(),
            file_path: PathBuf::from("data/financial_document_x.pdf"),
            username: None,
        })
    }

    fn db() -> (tempfile::TempDir, JobStateDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = JobStateDb::new(dir.path().join("jobs.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_save_and_get() {
        let (_dir, db) = db();
        let mut job = record();
        db.save(&job).unwrap();

        job.state = JobState::Failed;
        job.error = Some("boom".to_string());
        job.failure_kind = Some(FailureKind::Timeout);
        job.completed_at = Some(Utc::now());
        db.save(&job).unwrap();

        let loaded = db.get(job.id).unwrap().unwrap();
        assert_eq!(loaded.state, JobState::Failed);
        assert_eq!(loaded.error.as_deref(), Some("boom"));
        assert_eq!(loaded.failure_kind, Some(FailureKind::Timeout));
        assert!(db.get(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_incomplete_skips_terminal_jobs() {
        let (_dir, db) = db();

        let pending = record();
        let mut running = record();
        running.state = JobState::Running;
        let mut done = record();
        done.state = JobState::Succeeded;
        done.result = Some("ok".to_string());
        done.completed_at = Some(Utc::now());

        for job in [&pending, &running, &done] {
            db.save(job).unwrap();
        }

        let ids: Vec<Uuid> = db.incomplete().unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&pending.id));
        assert!(ids.contains(&running.id));
    }

    #[test]
    fn test_corrupt_rows_are_reported_not_invented() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let db = JobStateDb::new(&path).unwrap();

        let healthy = record();
        let damaged = record();
        db.save(&healthy).unwrap();
        db.save(&damaged).unwrap();

        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE job_states SET created_at = 'not a time' WHERE id = ?1",
            params![damaged.id.to_string()],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO job_states (id, state, query, file_path, attempts, created_at, updated_at)
             VALUES ('garbage', 'pending', 'q', 'x.pdf', 0, ?1, ?1)",
            params![format_timestamp(Utc::now())],
        )
        .unwrap();

        assert!(matches!(db.get(damaged.id), Err(Error::Database(_))));

        let ids: Vec<Uuid> = db.incomplete().unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![healthy.id]);
    }

    #[test]
    fn test_purge_only_removes_old_terminal_jobs() {
        let (_dir, db) = db();

        let mut old = record();
        old.state = JobState::Succeeded;
        old.completed_at = Some(Utc::now() - chrono::Duration::hours(48));
        let mut fresh = record();
        fresh.state = JobState::Failed;
        fresh.completed_at = Some(Utc::now());
        let pending = record();

        for job in [&old, &fresh, &pending] {
            db.save(job).unwrap();
        }

        let removed = db
            .purge_completed_before(Utc::now() - chrono::Duration::hours(24))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(db.get(old.id).unwrap().is_none());
        assert!(db.get(fresh.id).unwrap().is_some());
        assert!(db.get(pending.id).unwrap().is_some());
    }
}
