//! Job descriptors, lifecycle states and poll results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    /// `succeeded` and `failed` admit no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobState::Pending),
            "running" => Some(JobState::Running),
            "succeeded" => Some(JobState::Succeeded),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }
}

/// Why a job failed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The collaborator (or the result store) returned an error
    Error,
    /// The per-attempt time budget ran out
    Timeout,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Error => "error",
            FailureKind::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "error" => Some(FailureKind::Error),
            "timeout" => Some(FailureKind::Timeout),
            _ => None,
        }
    }
}

/// Descriptor handed to workers through the dispatch channel
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub query: String,
    pub file_path: PathBuf,
    pub username: Option<String>,
}

/// Full tracked state of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub state: JobState,
    pub query: String,
    pub file_path: String,
    pub username: Option<String>,
    /// Present only when `succeeded`
    pub result: Option<String>,
    /// Present only when `failed`
    pub error: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// New pending record for a job descriptor
    pub fn pending(job: &Job) -> Self {
        let now = Utc::now();
        Self {
            id: job.id,
            state: JobState::Pending,
            query: job.query.clone(),
            file_path: job.file_path.to_string_lossy().to_string(),
            username: job.username.clone(),
            result: None,
            error: None,
            failure_kind: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Rebuild the descriptor, e.g. when resuming after restart
    pub fn to_job(&self) -> Job {
        Job {
            id: self.id,
            query: self.query.clone(),
            file_path: PathBuf::from(&self.file_path),
            username: self.username.clone(),
        }
    }

    /// Observable status of this record
    pub fn status(&self) -> JobStatus {
        match self.state {
            JobState::Pending => JobStatus::Pending,
            JobState::Running => JobStatus::Running,
            JobState::Succeeded => JobStatus::Succeeded {
                result: self.result.clone().unwrap_or_default(),
            },
            JobState::Failed => JobStatus::Failed {
                error: self.error.clone().unwrap_or_default(),
                kind: self.failure_kind.unwrap_or(FailureKind::Error),
            },
        }
    }
}

/// Result of polling a job id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Never submitted, or expired from the result backend
    Unknown,
    Pending,
    Running,
    Succeeded { result: String },
    Failed { error: String, kind: FailureKind },
}
