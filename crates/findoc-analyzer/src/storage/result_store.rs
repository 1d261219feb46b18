//! Append-only store of completed analyses, plus the users table

use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use super::connection::SqliteConnector;
use crate::error::{Error, Result};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS analysis_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        query TEXT NOT NULL,
        analysis TEXT NOT NULL,
        file_path VARCHAR(256) NOT NULL,
        username VARCHAR(64),
        task_id TEXT UNIQUE,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_analysis_results_username ON analysis_results(username);

    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username VARCHAR(64) NOT NULL UNIQUE,
        email VARCHAR(128) UNIQUE,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);
"#;

/// A persisted analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: i64,
    pub query: String,
    pub analysis: String,
    pub file_path: String,
    pub username: Option<String>,
    pub task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when appending an analysis
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub query: String,
    pub analysis: String,
    pub file_path: String,
    pub username: Option<String>,
    /// Producing job; a second append with the same id is a no-op
    pub task_id: Option<Uuid>,
}

/// A registered user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed result store
pub struct ResultStore {
    connector: SqliteConnector,
}

impl ResultStore {
    /// Open the store at the given path and create the schema if needed
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let connector = SqliteConnector::new(path)?;
        connector.migrate(SCHEMA)?;
        Ok(Self { connector })
    }

    /// Append an analysis and return the stored record
    ///
    /// A task id that is already stored keeps its first record, which is
    /// returned unchanged.
    pub fn append(&self, record: &NewAnalysis) -> Result<AnalysisResult> {
        let conn = self.connector.open()?;
        let created_at = Utc::now();

        let inserted = conn
            .execute(
                r#"
                INSERT INTO analysis_results (query, analysis, file_path, username, task_id, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(task_id) DO NOTHING
                "#,
                params![
                    record.query,
                    record.analysis,
                    record.file_path,
                    record.username,
                    record.task_id.map(|id| id.to_string()),
                    created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| Error::database(format!("Failed to append analysis: {}", e)))?;

        if inserted > 0 {
            return Ok(AnalysisResult {
                id: conn.last_insert_rowid(),
                query: record.query.clone(),
                analysis: record.analysis.clone(),
                file_path: record.file_path.clone(),
                username: record.username.clone(),
                task_id: record.task_id,
                created_at,
            });
        }

        // Redelivered job: the record from the first delivery stands
        let task_id = record
            .task_id
            .ok_or_else(|| Error::internal("Append skipped without a task id"))?;
        tracing::info!("Analysis for task {} already stored, skipping append", task_id);

        self.get_by_task(task_id)?.ok_or_else(|| {
            Error::database(format!("Analysis for task {} vanished after conflict", task_id))
        })
    }

    /// All analyses submitted by a user, in insertion order
    pub fn list_for_user(&self, username: &str) -> Result<Vec<AnalysisResult>> {
        let conn = self.connector.open()?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, query, analysis, file_path, username, task_id, created_at
                FROM analysis_results WHERE username = ?1 ORDER BY id ASC
                "#,
            )
            .map_err(|e| Error::database(format!("Failed to prepare query: {}", e)))?;

        let records = stmt
            .query_map(params![username], row_to_analysis)
            .map_err(|e| Error::database(format!("Failed to list analyses: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::database(format!("Failed to read analysis row: {}", e)))?;

        Ok(records)
    }

    /// Get the analysis produced by a job
    fn get_by_task(&self, task_id: Uuid) -> Result<Option<AnalysisResult>> {
        let conn = self.connector.open()?;

        conn.query_row(
            r#"
            SELECT id, query, analysis, file_path, username, task_id, created_at
            FROM analysis_results WHERE task_id = ?1
            "#,
            params![task_id.to_string()],
            row_to_analysis,
        )
        .optional()
        .map_err(|e| Error::database(format!("Failed to get analysis: {}", e)))
    }

    #[cfg(test)]
    pub(crate) fn count(&self) -> Result<usize> {
        let conn = self.connector.open()?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM analysis_results", [], |row| row.get(0))
            .map_err(|e| Error::database(format!("Failed to count analyses: {}", e)))?;
        Ok(count as usize)
    }

    // ==================== Users ====================

    /// Register a user
    pub fn create_user(&self, username: &str, email: Option<&str>) -> Result<User> {
        let conn = self.connector.open()?;
        let created_at = Utc::now();

        conn.execute(
            "INSERT INTO users (username, email, created_at) VALUES (?1, ?2, ?3)",
            params![username, email, created_at.to_rfc3339()],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::Conflict(format!("User '{}' or its email already exists", username))
            }
            other => Error::database(format!("Failed to create user: {}", other)),
        })?;

        Ok(User {
            id: conn.last_insert_rowid(),
            username: username.to_string(),
            email: email.map(String::from),
            created_at,
        })
    }

    /// Look up a user by name
    pub fn get_user(&self, username: &str) -> Result<Option<User>> {
        let conn = self.connector.open()?;

        conn.query_row(
            "SELECT id, username, email, created_at FROM users WHERE username = ?1",
            params![username],
            |row| {
                let created_at: String = row.get(3)?;
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    email: row.get(2)?,
                    created_at: parse_timestamp(3, &created_at)?,
                })
            },
        )
        .optional()
        .map_err(|e| Error::database(format!("Failed to get user: {}", e)))
    }
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

fn row_to_analysis(row: &rusqlite::Row) -> rusqlite::Result<AnalysisResult> {
    let task_id: Option<String> = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(AnalysisResult {
        id: row.get(0)?,
        query: row.get(1)?,
        analysis: row.get(2)?,
        file_path: row.get(3)?,
        username: row.get(4)?,
        task_id: task_id
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|e| conversion_failure(5, e))?,
        created_at: parse_timestamp(6, &created_at)?,
    })
}
