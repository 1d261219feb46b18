//! Application state for the analyzer server

use std::sync::Arc;
use std::time::Duration;

use crate::analysis::AnalysisProvider;
use crate::config::AnalyzerConfig;
use crate::error::Result;
use crate::processing::{AnalysisWorker, ExecutionPolicy, JobQueue};
use crate::storage::{DocumentStoreProvider, JobStateDb, LocalDocumentStore, ResultStore};

/// How often expired job state is swept
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: AnalyzerConfig,
    /// Job queue for async analysis
    job_queue: Arc<JobQueue>,
    /// Completed analyses and users
    result_store: Arc<ResultStore>,
    /// Uploaded documents
    document_store: Arc<dyn DocumentStoreProvider>,
}

impl AppState {
    /// Open the stores, start the worker pool and resume unfinished jobs
    pub async fn new(config: AnalyzerConfig, analyst: Arc<dyn AnalysisProvider>) -> Result<Self> {
        tracing::info!("Initializing analyzer state...");

        config.queue.validate_broker()?;

        let database_path = config.database.path()?;
        let result_store = Arc::new(ResultStore::new(&database_path)?);
        tracing::info!("Result store initialized at {}", database_path.display());

        let backend = match config.queue.result_backend_path()? {
            Some(path) => {
                let backend = JobStateDb::new(&path)?;
                tracing::info!("Result backend initialized at {}", path.display());
                Some(Arc::new(backend))
            }
            None => {
                tracing::info!("Result backend is in-memory; job state is lost on restart");
                None
            }
        };

        let document_store: Arc<dyn DocumentStoreProvider> =
            Arc::new(LocalDocumentStore::new(&config.storage.data_dir)?);
        tracing::info!(
            "Document store initialized ({}: {})",
            document_store.name(),
            config.storage.data_dir.display()
        );

        // Initialize job queue and start workers
        let policy = ExecutionPolicy::from_config(&config.queue);
        let (job_queue, receiver) = JobQueue::new(policy.worker_count, backend);
        let job_queue = Arc::new(job_queue);
        tracing::info!("Job queue initialized with {} workers", policy.worker_count);

        let worker = AnalysisWorker::new(job_queue.clone(), result_store.clone(), analyst, policy);
        tokio::spawn(async move {
            worker.run(receiver).await;
        });

        job_queue.resume_incomplete().await;
        spawn_sweeper(
            job_queue.clone(),
            Duration::from_secs(config.queue.result_ttl_secs),
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                job_queue,
                result_store,
                document_store,
            }),
        })
    }

    /// Get configuration
    pub fn config(&self) -> &AnalyzerConfig {
        &self.inner.config
    }

    /// Get job queue
    pub fn job_queue(&self) -> &Arc<JobQueue> {
        &self.inner.job_queue
    }

    /// Get result store
    pub fn result_store(&self) -> &Arc<ResultStore> {
        &self.inner.result_store
    }

    /// Get document store
    pub fn document_store(&self) -> &Arc<dyn DocumentStoreProvider> {
        &self.inner.document_store
    }
}

fn spawn_sweeper(job_queue: Arc<JobQueue>, ttl: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = job_queue.purge_expired(ttl);
            if removed > 0 {
                tracing::info!("Swept {} expired jobs", removed);
            }
        }
    });
}
