//! Storage module for persistent data storage
//!
//! Uploaded documents live on the filesystem; analyses, users and job state
//! live in SQLite.

mod connection;
mod document_store;
mod job_backend;
mod result_store;

pub use connection::SqliteConnector;
pub use document_store::{DocumentStoreProvider, LocalDocumentStore, StoredDocument};
pub use job_backend::JobStateDb;
pub use result_store::{AnalysisResult, NewAnalysis, ResultStore, User};
