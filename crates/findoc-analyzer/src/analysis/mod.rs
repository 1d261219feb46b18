//! Analysis collaborators: text extraction, LLM access and the analyst that
//! combines them.
//!
//! Workers only see [`AnalysisProvider`]; everything behind it can be swapped
//! for a stub.

mod analyst;
mod extractor;
mod llm;
mod ollama;
mod prompt;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

pub use analyst::FinancialAnalyst;
pub use extractor::{PdfExtractor, TextExtractor};
pub use llm::LlmProvider;
pub use ollama::OllamaLlm;
pub use prompt::PromptBuilder;

/// Failure raised by an analysis collaborator
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The document could not be read or parsed
    #[error("Failed to extract text from '{path}': {message}")]
    Extraction { path: String, message: String },

    /// The document parsed but contained no text
    #[error("No text content could be extracted from '{0}'")]
    EmptyDocument(String),

    /// The language model call failed
    #[error("LLM error: {0}")]
    Llm(String),
}

impl AnalysisError {
    /// Create an extraction error
    pub fn extraction(path: &Path, message: impl Into<String>) -> Self {
        Self::Extraction {
            path: path.display().to_string(),
            message: message.into(),
        }
    }
}

/// Turns a stored document and a question into analysis text
///
/// Implementations:
/// - `FinancialAnalyst`: PDF extraction + LLM prompt
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Analyze the document at `file_path` to answer `query`
    async fn analyze(&self, file_path: &Path, query: &str) -> Result<String, AnalysisError>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
