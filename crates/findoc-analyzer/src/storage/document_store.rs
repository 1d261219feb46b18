//! Raw document storage for uploaded files

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::Result;

/// Metadata about a stored document
#[derive(Debug, Clone)]
pub struct StoredDocument {
    /// Generated document ID
    pub id: Uuid,
    /// Filename supplied by the uploader
    pub original_filename: String,
    /// Where workers read the document from
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

/// Trait for document storage
///
/// Implementations:
/// - `LocalDocumentStore`: local filesystem
#[async_trait]
pub trait DocumentStoreProvider: Send + Sync {
    /// Persist an uploaded document under a fresh name
    async fn store_document(&self, original_filename: &str, data: &[u8]) -> Result<StoredDocument>;

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

/// Local document store using the filesystem
pub struct LocalDocumentStore {
    /// Directory to store documents
    storage_dir: PathBuf,
}

impl LocalDocumentStore {
    /// Create a new local document store
    pub fn new<P: AsRef<Path>>(storage_dir: P) -> Result<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;
        Ok(Self { storage_dir })
    }

    /// Get path for a document
    fn doc_path(&self, doc_id: &Uuid) -> PathBuf {
        self.storage_dir.join(format!("financial_document_{}.pdf", doc_id))
    }
}

#[async_trait]
impl DocumentStoreProvider for LocalDocumentStore {
    async fn store_document(&self, original_filename: &str, data: &[u8]) -> Result<StoredDocument> {
        let id = Uuid::new_v4();
        let path = self.doc_path(&id);

        // The directory may have been removed since startup
        tokio::fs::create_dir_all(&self.storage_dir).await?;
        tokio::fs::write(&path, data).await?;

        Ok(StoredDocument {
            id,
            original_filename: original_filename.to_string(),
            path,
            size: data.len() as u64,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.storage_dir.exists())
    }

    fn name(&self) -> &str {
        "local-filesystem"
    }
}
