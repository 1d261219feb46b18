//! Background analysis with a job queue and a bounded worker pool

mod job;
mod job_queue;
mod worker;

pub use job::{FailureKind, Job, JobRecord, JobState, JobStatus};
pub use job_queue::{JobQueue, QueueStats};
pub use worker::{AnalysisWorker, ExecutionPolicy};
