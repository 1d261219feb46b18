//! PDF text extraction

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::time::timeout;

use super::AnalysisError;

/// pdf-extract can spin on pathological fonts
const EXTRACTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Extracts plain text from a stored document
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract the document's text, or fail with an I/O or format error
    async fn extract(&self, file_path: &Path) -> Result<String, AnalysisError>;
}

/// Extractor for PDF files built on `pdf-extract`
#[derive(Debug, Default, Clone)]
pub struct PdfExtractor;

impl PdfExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextExtractor for PdfExtractor {
    async fn extract(&self, file_path: &Path) -> Result<String, AnalysisError> {
        let data = tokio::fs::read(file_path)
            .await
            .map_err(|e| AnalysisError::extraction(file_path, e.to_string()))?;

        tracing::debug!("Extracting text from {} ({} bytes)", file_path.display(), data.len());

        // Parsing is CPU-bound and may panic on malformed input
        let handle = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&data));

        let raw = match timeout(EXTRACTION_TIMEOUT, handle).await {
            Ok(Ok(Ok(text))) => text,
            Ok(Ok(Err(e))) => return Err(AnalysisError::extraction(file_path, e.to_string())),
            Ok(Err(join_err)) => {
                return Err(AnalysisError::extraction(
                    file_path,
                    format!("PDF parser crashed: {}", join_err),
                ))
            }
            Err(_) => {
                tracing::error!(
                    "PDF extraction timeout after {}s for {}",
                    EXTRACTION_TIMEOUT.as_secs(),
                    file_path.display()
                );
                return Err(AnalysisError::extraction(
                    file_path,
                    format!("extraction timed out after {}s", EXTRACTION_TIMEOUT.as_secs()),
                ));
            }
        };

        let text = clean_extracted_text(&raw);
        if text.is_empty() {
            return Err(AnalysisError::EmptyDocument(file_path.display().to_string()));
        }

        tracing::info!(
            "Extracted {} characters from {}",
            text.chars().count(),
            file_path.display()
        );
        Ok(text)
    }
}

/// Strip NULs, trim each line and drop blank lines
fn clean_extracted_text(text: &str) -> String {
    text.replace('\0', "")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_collapses_blank_lines() {
        let raw = "Revenue\n\n\n  Net income  \n\0\nAssets\n";
        assert_eq!(clean_extracted_text(raw), "Revenue\nNet income\nAssets");
    }

    #[test]
    fn test_clean_empty_input() {
        assert_eq!(clean_extracted_text("\n \n\t\n"), "");
    }

    #[tokio::test]
    async fn test_missing_file_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PdfExtractor::new()
            .extract(&dir.path().join("absent.pdf"))
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::Extraction { .. }));
    }

    #[tokio::test]
    async fn test_non_pdf_bytes_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"this is not a pdf").unwrap();

        let result = PdfExtractor::new().extract(&path).await;
        assert!(result.is_err());
    }
}
