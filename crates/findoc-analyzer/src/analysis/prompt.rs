//! Prompt template for financial document analysis

/// Prompt builder for document analysis
pub struct PromptBuilder;

impl PromptBuilder {
    /// Build the analysis prompt for a document's text and the user's query
    pub fn build_analysis_prompt(query: &str, file_path: &str, document: &str) -> String {
        format!(
            r#"You are a senior financial analyst reviewing a company's financial document.

Base every statement on the DOCUMENT below. When a figure is not in the document,
say that it is not reported instead of estimating it. Do not recommend specific
investment products.

DOCUMENT ({file_path}):
{document}

USER QUERY: {query}

Answer the query with structured financial insights using these sections:
- Executive Summary
- Financial Highlights
- Key Risks
- Investment Outlook"#,
            file_path = file_path,
            document = document,
            query = query
        )
    }

    /// Cut document text to at most `max_chars` characters on a char boundary
    pub fn truncate_document(text: &str, max_chars: usize) -> &str {
        match text.char_indices().nth(max_chars) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }
}
