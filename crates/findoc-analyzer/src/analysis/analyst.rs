//! Financial analyst: extraction followed by an LLM prompt

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use super::extractor::TextExtractor;
use super::llm::LlmProvider;
use super::prompt::PromptBuilder;
use super::{AnalysisError, AnalysisProvider};
use crate::error::Error;

/// Analysis provider that reads the document and asks an LLM
pub struct FinancialAnalyst {
    extractor: Arc<dyn TextExtractor>,
    llm: Arc<dyn LlmProvider>,
    max_document_chars: usize,
}

impl FinancialAnalyst {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        llm: Arc<dyn LlmProvider>,
        max_document_chars: usize,
    ) -> Self {
        Self {
            extractor,
            llm,
            max_document_chars,
        }
    }
}

#[async_trait]
impl AnalysisProvider for FinancialAnalyst {
    async fn analyze(&self, file_path: &Path, query: &str) -> Result<String, AnalysisError> {
        let text = self.extractor.extract(file_path).await?;

        let document = PromptBuilder::truncate_document(&text, self.max_document_chars);
        if document.len() < text.len() {
            tracing::warn!(
                "Document {} truncated to {} characters for the prompt",
                file_path.display(),
                self.max_document_chars
            );
        }

        let prompt = PromptBuilder::build_analysis_prompt(
            query,
            &file_path.display().to_string(),
            document,
        );

        let answer = self
            .llm
            .generate(&prompt)
            .await
            .map_err(|e| match e {
                Error::Llm(message) => AnalysisError::Llm(message),
                other => AnalysisError::Llm(other.to_string()),
            })?;

        tracing::info!(
            "{} ({}) produced {} characters for {}",
            self.llm.name(),
            self.llm.model(),
            answer.len(),
            file_path.display()
        );
        Ok(answer)
    }

    fn name(&self) -> &str {
        "financial-analyst"
    }
}
