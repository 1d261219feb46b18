//! Job queue for background document analysis
//!
//! Job state lives in a `DashMap` for cheap concurrent polling and is mirrored
//! to the SQLite result backend when one is configured.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use super::job::{FailureKind, Job, JobRecord, JobState, JobStatus};
use crate::error::{Error, Result};
use crate::storage::JobStateDb;

/// Dispatch channel capacity
const CHANNEL_CAPACITY: usize = 1000;

/// Job queue for managing background analysis with optional persistence
pub struct JobQueue {
    /// Tracked jobs
    jobs: Arc<DashMap<Uuid, JobRecord>>,
    /// Channel for sending jobs to workers
    sender: mpsc::Sender<Job>,
    /// Number of workers
    worker_count: usize,
    /// Result backend; `None` keeps state in memory only
    backend: Option<Arc<JobStateDb>>,
}

impl JobQueue {
    /// Create a new job queue and the receiver its workers consume
    pub fn new(
        worker_count: usize,
        backend: Option<Arc<JobStateDb>>,
    ) -> (Self, mpsc::Receiver<Job>) {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);

        let queue = Self {
            jobs: Arc::new(DashMap::new()),
            sender,
            worker_count,
            backend,
        };

        (queue, receiver)
    }

    /// Submit an analysis job; returns as soon as the job is queued
    pub async fn submit(
        &self,
        query: String,
        file_path: PathBuf,
        username: Option<String>,
    ) -> Result<Uuid> {
        let job = Job {
            id: Uuid::new_v4(),
            query,
            file_path,
            username,
        };
        let job_id = job.id;
        let record = JobRecord::pending(&job);

        if let Some(backend) = &self.backend {
            backend
                .save(&record)
                .map_err(|e| Error::Queue(format!("Failed to persist job {}: {}", job_id, e)))?;
        }
        self.jobs.insert(job_id, record);

        // Never wait on a full channel; the caller gets an error instead
        if let Err(e) = self.sender.try_send(job) {
            tracing::error!("Failed to dispatch job {}: {}", job_id, e);
            self.forget(job_id);
            let message = match e {
                TrySendError::Full(_) => "Job queue is full, try again later".to_string(),
                TrySendError::Closed(_) => "Job queue is not accepting work".to_string(),
            };
            return Err(Error::Queue(message));
        }

        tracing::info!("Queued job {}", job_id);
        Ok(job_id)
    }

    /// Current status of a job; unknown ids yield [`JobStatus::Unknown`]
    pub fn poll(&self, job_id: Uuid) -> JobStatus {
        self.get(job_id)
            .map(|record| record.status())
            .unwrap_or(JobStatus::Unknown)
    }

    /// Full record for a job, falling back to the result backend
    pub fn get(&self, job_id: Uuid) -> Option<JobRecord> {
        if let Some(record) = self.jobs.get(&job_id) {
            return Some(record.clone());
        }

        let backend = self.backend.as_ref()?;
        match backend.get(job_id) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("Failed to read job {} from result backend: {}", job_id, e);
                None
            }
        }
    }

    /// Claim a pending job for execution
    pub fn mark_running(&self, job_id: Uuid) -> bool {
        self.transition(job_id, &[JobState::Pending], |record| {
            record.state = JobState::Running;
        })
    }

    /// Count one execution attempt of a running job
    pub fn begin_attempt(&self, job_id: Uuid) -> bool {
        self.transition(job_id, &[JobState::Running], |record| {
            record.attempts += 1;
        })
    }

    /// Complete a running job with its analysis text
    pub fn mark_succeeded(&self, job_id: Uuid, result: String) -> bool {
        self.transition(job_id, &[JobState::Running], |record| {
            record.state = JobState::Succeeded;
            record.result = Some(result);
            record.completed_at = Some(Utc::now());
        })
    }

    /// Fail a job that has not reached a terminal state
    pub fn mark_failed(&self, job_id: Uuid, error: String, kind: FailureKind) -> bool {
        self.transition(
            job_id,
            &[JobState::Pending, JobState::Running],
            |record| {
                record.state = JobState::Failed;
                record.error = Some(error);
                record.failure_kind = Some(kind);
                record.completed_at = Some(Utc::now());
            },
        )
    }

    /// Apply a state change if the job is in one of the `from` states
    fn transition<F>(&self, job_id: Uuid, from: &[JobState], apply: F) -> bool
    where
        F: FnOnce(&mut JobRecord),
    {
        let snapshot = {
            let Some(mut record) = self.jobs.get_mut(&job_id) else {
                tracing::warn!("Ignoring update for unknown job {}", job_id);
                return false;
            };

            if !from.contains(&record.state) {
                tracing::warn!(
                    "Ignoring update for job {} in state {}",
                    job_id,
                    record.state.as_str()
                );
                return false;
            }

            apply(record.value_mut());
            record.updated_at = Utc::now();
            record.clone()
        }; // Release lock before persisting

        self.persist(&snapshot);
        true
    }

    fn persist(&self, record: &JobRecord) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.save(record) {
                tracing::error!("Failed to persist job {} state: {}", record.id, e);
            }
        }
    }

    fn forget(&self, job_id: Uuid) {
        self.jobs.remove(&job_id);
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.delete(job_id) {
                tracing::error!("Failed to remove job {} from result backend: {}", job_id, e);
            }
        }
    }

    /// Re-dispatch jobs the backend holds as pending or running
    pub async fn resume_incomplete(&self) -> usize {
        let Some(backend) = &self.backend else {
            return 0;
        };

        let incomplete = match backend.incomplete() {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!("Failed to get incomplete jobs: {}", e);
                return 0;
            }
        };

        let mut resumed = 0;
        for mut record in incomplete {
            let job_id = record.id;
            // a job interrupted mid-run goes back to the queue
            record.state = JobState::Pending;
            record.updated_at = Utc::now();
            let job = record.to_job();

            self.persist(&record);
            self.jobs.insert(job_id, record);

            if let Err(e) = self.sender.send(job).await {
                tracing::error!("Failed to resume job {}: {}", job_id, e);
                self.mark_failed(job_id, e.to_string(), FailureKind::Error);
                continue;
            }
            resumed += 1;
        }

        if resumed > 0 {
            tracing::info!("Resumed {} incomplete jobs", resumed);
        }
        resumed
    }

    /// Drop terminal jobs that completed more than `ttl` ago
    pub fn purge_expired(&self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(ttl)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let before = self.jobs.len();
        self.jobs.retain(|_, record| {
            !(record.state.is_terminal() && record.completed_at.is_some_and(|t| t < cutoff))
        });
        let removed = before.saturating_sub(self.jobs.len());

        if let Some(backend) = &self.backend {
            match backend.purge_completed_before(cutoff) {
                Ok(count) if count > 0 => {
                    tracing::info!("Purged {} expired jobs from result backend", count)
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Failed to purge expired jobs: {}", e),
            }
        }

        removed
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total_jobs: 0,
            pending: 0,
            running: 0,
            succeeded: 0,
            failed: 0,
            worker_count: self.worker_count,
        };

        for job in self.jobs.iter() {
            stats.total_jobs += 1;
            match job.state {
                JobState::Pending => stats.pending += 1,
                JobState::Running => stats.running += 1,
                JobState::Succeeded => stats.succeeded += 1,
                JobState::Failed => stats.failed += 1,
            }
        }

        stats
    }

    /// Number of workers
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}

/// Queue statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total_jobs: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub worker_count: usize,
}
