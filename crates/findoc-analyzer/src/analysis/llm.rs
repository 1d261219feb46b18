//! LLM provider trait for generating analysis text

use async_trait::async_trait;

use crate::error::Result;

/// Trait for LLM-based text generation
///
/// Implementations:
/// - `OllamaLlm`: Local Ollama server (llama3.2, phi3, etc.)
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for a fully built prompt
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;
}
