//! findoc-analyzer: asynchronous financial document analysis service
//!
//! Uploaded PDFs become background jobs. Workers extract the document text,
//! ask an LLM for investment analysis and append the answer to a per-user
//! history. Clients poll jobs by id and query past analyses over HTTP.

pub mod analysis;
pub mod config;
pub mod error;
pub mod processing;
pub mod server;
pub mod storage;

pub use analysis::{AnalysisError, AnalysisProvider, FinancialAnalyst};
pub use config::AnalyzerConfig;
pub use error::{Error, Result};
pub use processing::{JobQueue, JobStatus};
pub use server::AnalyzerServer;
