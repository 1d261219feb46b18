//! Background worker pool for analysis jobs

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{sleep, timeout};

use super::job::{FailureKind, Job};
use super::job_queue::JobQueue;
use crate::analysis::AnalysisProvider;
use crate::config::QueueConfig;
use crate::storage::{NewAnalysis, ResultStore};

/// Limits applied to every job execution
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    /// Maximum jobs executing at once
    pub worker_count: usize,
    /// Per-attempt budget; `None` waits forever
    pub job_timeout: Option<Duration>,
    /// Extra attempts after the first failure
    pub max_retries: u32,
    /// Delay before the first retry, doubled per retry
    pub retry_backoff: Duration,
}

impl ExecutionPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            worker_count: config.workers(),
            job_timeout: config
                .job_timeout_secs
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Worker that runs analyses and records their outcome
pub struct AnalysisWorker {
    job_queue: Arc<JobQueue>,
    result_store: Arc<ResultStore>,
    analyst: Arc<dyn AnalysisProvider>,
    policy: ExecutionPolicy,
}

impl AnalysisWorker {
    /// Create a new analysis worker
    pub fn new(
        job_queue: Arc<JobQueue>,
        result_store: Arc<ResultStore>,
        analyst: Arc<dyn AnalysisProvider>,
        policy: ExecutionPolicy,
    ) -> Self {
        tracing::info!(
            "Worker configured: {} concurrent jobs, timeout {:?}, {} retries, analyst {}",
            policy.worker_count,
            policy.job_timeout,
            policy.max_retries,
            analyst.name()
        );

        Self {
            job_queue,
            result_store,
            analyst,
            policy,
        }
    }

    /// Consume jobs from the queue until the channel closes
    pub async fn run(self, mut receiver: mpsc::Receiver<Job>) {
        let worker = Arc::new(self);
        let semaphore = Arc::new(Semaphore::new(worker.policy.worker_count.max(1)));

        tracing::info!(
            "Analysis worker started with {} slots",
            worker.policy.worker_count
        );

        while let Some(job) = receiver.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let worker = worker.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let job_id = job.id;

                // a panicking analysis must not take the job down with it
                let outcome = AssertUnwindSafe(worker.execute(job)).catch_unwind().await;
                if outcome.is_err() {
                    tracing::error!("Job {} panicked during analysis", job_id);
                    worker.job_queue.mark_failed(
                        job_id,
                        "Analysis worker panicked".to_string(),
                        FailureKind::Error,
                    );
                }
            });
        }

        tracing::info!("Analysis worker stopped: dispatch channel closed");
    }

    /// Run one job to a terminal state
    pub async fn execute(&self, job: Job) {
        let job_id = job.id;

        if !self.job_queue.mark_running(job_id) {
            tracing::info!("Skipping job {}: already claimed or finished", job_id);
            return;
        }
        tracing::info!("Processing job {} for {}", job_id, job.file_path.display());

        let analysis = match self.analyze_with_retries(&job).await {
            Ok(analysis) => analysis,
            Err((kind, message)) => {
                tracing::error!("Job {} failed ({}): {}", job_id, kind.as_str(), message);
                self.job_queue.mark_failed(job_id, message, kind);
                return;
            }
        };

        let record = NewAnalysis {
            query: job.query,
            analysis,
            file_path: job.file_path.to_string_lossy().to_string(),
            username: job.username,
            task_id: Some(job_id),
        };

        // The result store is authoritative: a job only succeeds once its row exists
        let store = self.result_store.clone();
        let appended = tokio::task::spawn_blocking(move || store.append(&record)).await;

        match appended {
            Ok(Ok(stored)) => {
                // A redelivered job reports the text stored by its first run
                self.job_queue.mark_succeeded(job_id, stored.analysis);
                tracing::info!("Job {} completed, stored as analysis {}", job_id, stored.id);
            }
            Ok(Err(e)) => {
                tracing::error!("Job {} analysis could not be stored: {}", job_id, e);
                self.job_queue.mark_failed(
                    job_id,
                    format!("Failed to store analysis: {}", e),
                    FailureKind::Error,
                );
            }
            Err(e) => {
                tracing::error!("Job {} store task aborted: {}", job_id, e);
                self.job_queue.mark_failed(
                    job_id,
                    format!("Failed to store analysis: {}", e),
                    FailureKind::Error,
                );
            }
        }
    }

    async fn analyze_with_retries(&self, job: &Job) -> Result<String, (FailureKind, String)> {
        let attempts = self.policy.max_retries + 1;
        let mut last_failure = (FailureKind::Error, "Analysis did not run".to_string());

        for attempt in 0..attempts {
            self.job_queue.begin_attempt(job.id);

            match self.analyze_once(job).await {
                Ok(analysis) => return Ok(analysis),
                Err(failure) => {
                    last_failure = failure;
                    if attempt + 1 < attempts {
                        let delay = self
                            .policy
                            .retry_backoff
                            .saturating_mul(2u32.saturating_pow(attempt));
                        tracing::warn!(
                            "Job {} attempt {}/{} failed: {}, retrying in {:?}",
                            job.id,
                            attempt + 1,
                            attempts,
                            last_failure.1,
                            delay
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(last_failure)
    }

    async fn analyze_once(&self, job: &Job) -> Result<String, (FailureKind, String)> {
        let analysis = self.analyst.analyze(&job.file_path, &job.query);

        let result = match self.policy.job_timeout {
            Some(limit) => match timeout(limit, analysis).await {
                Ok(result) => result,
                Err(_) => {
                    return Err((
                        FailureKind::Timeout,
                        format!("Analysis timed out after {:.1}s", limit.as_secs_f64()),
                    ))
                }
            },
            None => analysis.await,
        };

        result.map_err(|e| (FailureKind::Error, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisError;
    use crate::processing::{JobRecord, JobState, JobStatus};
    use crate::storage::JobStateDb;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoAnalyst;

    #[async_trait]
    impl AnalysisProvider for EchoAnalyst {
        async fn analyze(&self, file_path: &Path, query: &str) -> Result<String, AnalysisError> {
            Ok(format!("{} -> {}", file_path.display(), query))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct FailingAnalyst;

    #[async_trait]
    impl AnalysisProvider for FailingAnalyst {
        async fn analyze(&self, file_path: &Path, _query: &str) -> Result<String, AnalysisError> {
            Err(AnalysisError::extraction(file_path, "not a PDF"))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct SlowAnalyst;

    #[async_trait]
    impl AnalysisProvider for SlowAnalyst {
        async fn analyze(&self, _file_path: &Path, _query: &str) -> Result<String, AnalysisError> {
            sleep(Duration::from_secs(30)).await;
            Ok("too late".to_string())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    /// Fails until `failures` calls have been made
    struct FlakyAnalyst {
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl AnalysisProvider for FlakyAnalyst {
        async fn analyze(&self, _file_path: &Path, _query: &str) -> Result<String, AnalysisError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(AnalysisError::Llm("connection reset".to_string()));
            }
            Ok("recovered".to_string())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    /// Returns the same text for every document
    struct FixedAnalyst(&'static str);

    #[async_trait]
    impl AnalysisProvider for FixedAnalyst {
        async fn analyze(&self, _file_path: &Path, _query: &str) -> Result<String, AnalysisError> {
            Ok(self.0.to_string())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct PanickingAnalyst;

    #[async_trait]
    impl AnalysisProvider for PanickingAnalyst {
        async fn analyze(&self, _file_path: &Path, _query: &str) -> Result<String, AnalysisError> {
            panic!("corrupt xref table")
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    fn policy() -> ExecutionPolicy {
        ExecutionPolicy {
            worker_count: 2,
            job_timeout: Some(Duration::from_secs(5)),
            max_retries: 0,
            retry_backoff: Duration::from_millis(1),
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        queue: Arc<JobQueue>,
        store: Arc<ResultStore>,
    }

    fn start(analyst: Arc<dyn AnalysisProvider>, policy: ExecutionPolicy) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ResultStore::new(dir.path().join("results.db")).unwrap());
        let (queue, receiver) = JobQueue::new(policy.worker_count, None);
        let queue = Arc::new(queue);

        let worker = AnalysisWorker::new(queue.clone(), store.clone(), analyst, policy);
        tokio::spawn(worker.run(receiver));

        Harness {
            _dir: dir,
            queue,
            store,
        }
    }

    async fn submit(harness: &Harness, username: Option<&str>) -> uuid::Uuid {
        harness
            .queue
            .submit(
                "Analyze this financial document for investment insights".to_string(),
                PathBuf::from("data/financial_document_1.pdf"),
                username.map(str::to_string),
            )
            .await
            .unwrap()
    }

    async fn wait_for_terminal(queue: &JobQueue, job_id: uuid::Uuid) -> JobStatus {
        for _ in 0..500 {
            match queue.poll(job_id) {
                JobStatus::Pending | JobStatus::Running => sleep(Duration::from_millis(10)).await,
                status => return status,
            }
        }
        panic!("job {} never finished", job_id);
    }

    #[test]
    fn test_zero_timeout_disables_limit() {
        let mut config = QueueConfig::default();
        assert_eq!(
            ExecutionPolicy::from_config(&config).job_timeout,
            Some(Duration::from_secs(900))
        );

        config.job_timeout_secs = Some(0);
        assert_eq!(ExecutionPolicy::from_config(&config).job_timeout, None);
    }

    #[tokio::test]
    async fn test_success_appends_exactly_one_record() {
        let harness = start(Arc::new(EchoAnalyst), policy());
        let job_id = submit(&harness, Some("alice")).await;

        let status = wait_for_terminal(&harness.queue, job_id).await;
        let JobStatus::Succeeded { result } = status else {
            panic!("unexpected status {:?}", status);
        };

        let records = harness.store.list_for_user("alice").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].analysis, result);
        assert_eq!(records[0].task_id, Some(job_id));
        assert_eq!(records[0].file_path, "data/financial_document_1.pdf");
    }

    #[tokio::test]
    async fn test_failure_writes_no_record() {
        let harness = start(Arc::new(FailingAnalyst), policy());
        let job_id = submit(&harness, Some("bob")).await;

        let status = wait_for_terminal(&harness.queue, job_id).await;
        let JobStatus::Failed { error, kind } = status else {
            panic!("unexpected status {:?}", status);
        };

        assert!(!error.is_empty());
        assert_eq!(kind, FailureKind::Error);
        assert_eq!(harness.store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_reported_as_timeout() {
        let policy = ExecutionPolicy {
            job_timeout: Some(Duration::from_millis(50)),
            ..policy()
        };
        let harness = start(Arc::new(SlowAnalyst), policy);
        let job_id = submit(&harness, None).await;

        let status = wait_for_terminal(&harness.queue, job_id).await;
        assert!(matches!(
            status,
            JobStatus::Failed {
                kind: FailureKind::Timeout,
                ..
            }
        ));
        assert_eq!(harness.store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let analyst = Arc::new(FlakyAnalyst {
            calls: AtomicUsize::new(0),
            failures: 2,
        });
        let policy = ExecutionPolicy {
            max_retries: 2,
            ..policy()
        };
        let harness = start(analyst.clone(), policy);
        let job_id = submit(&harness, None).await;

        let status = wait_for_terminal(&harness.queue, job_id).await;
        assert_eq!(
            status,
            JobStatus::Succeeded {
                result: "recovered".to_string()
            }
        );
        assert_eq!(analyst.calls.load(Ordering::SeqCst), 3);
        assert_eq!(harness.queue.get(job_id).unwrap().attempts, 3);
        assert_eq!(harness.store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_fails_job() {
        let analyst = Arc::new(FlakyAnalyst {
            calls: AtomicUsize::new(0),
            failures: 10,
        });
        let policy = ExecutionPolicy {
            max_retries: 1,
            ..policy()
        };
        let harness = start(analyst.clone(), policy);
        let job_id = submit(&harness, None).await;

        let status = wait_for_terminal(&harness.queue, job_id).await;
        assert!(matches!(status, JobStatus::Failed { .. }));
        assert_eq!(analyst.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panic_fails_job_and_worker_keeps_running() {
        let harness = start(Arc::new(PanickingAnalyst), policy());
        let first = submit(&harness, None).await;
        let second = submit(&harness, None).await;

        for job_id in [first, second] {
            let status = wait_for_terminal(&harness.queue, job_id).await;
            assert!(matches!(status, JobStatus::Failed { .. }));
        }
    }

    #[tokio::test]
    async fn test_redelivered_job_is_not_run_twice() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ResultStore::new(dir.path().join("results.db")).unwrap());
        let (queue, mut receiver) = JobQueue::new(1, None);
        let queue = Arc::new(queue);
        let worker = AnalysisWorker::new(queue.clone(), store.clone(), Arc::new(EchoAnalyst), policy());

        let job_id = queue
            .submit("q".to_string(), PathBuf::from("doc.pdf"), None)
            .await
            .unwrap();
        let job = receiver.recv().await.unwrap();

        worker.execute(job.clone()).await;
        worker.execute(job).await;

        assert!(matches!(queue.poll(job_id), JobStatus::Succeeded { .. }));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resume_after_append_reports_stored_text() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ResultStore::new(dir.path().join("results.db")).unwrap());
        let backend = Arc::new(JobStateDb::new(dir.path().join("jobs.db")).unwrap());

        // the process died after appending but before recording success
        let mut interrupted = JobRecord::pending(&Job {
            id: uuid::Uuid::new_v4(),
            query: "Summarize liquidity".to_string(),
            file_path: PathBuf::from("data/financial_document_2.pdf"),
            username: Some("dana".to_string()),
        });
        interrupted.state = JobState::Running;
        backend.save(&interrupted).unwrap();
        store
            .append(&NewAnalysis {
                query: interrupted.query.clone(),
                analysis: "first run text".to_string(),
                file_path: interrupted.file_path.clone(),
                username: interrupted.username.clone(),
                task_id: Some(interrupted.id),
            })
            .unwrap();

        let (queue, receiver) = JobQueue::new(1, Some(backend.clone()));
        let queue = Arc::new(queue);
        let worker = AnalysisWorker::new(
            queue.clone(),
            store.clone(),
            Arc::new(FixedAnalyst("second run text")),
            policy(),
        );
        tokio::spawn(worker.run(receiver));
        assert_eq!(queue.resume_incomplete().await, 1);

        let expected = JobStatus::Succeeded {
            result: "first run text".to_string(),
        };
        assert_eq!(wait_for_terminal(&queue, interrupted.id).await, expected);
        assert_eq!(
            backend.get(interrupted.id).unwrap().unwrap().result.as_deref(),
            Some("first run text")
        );

        let stored = store.list_for_user("dana").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].analysis, "first run text");
    }
}
