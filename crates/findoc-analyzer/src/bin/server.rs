//! Analyzer server binary
//!
//! Run with: cargo run -p findoc-analyzer --bin findoc-analyzer-server

use std::sync::Arc;

use findoc_analyzer::{
    analysis::{FinancialAnalyst, LlmProvider, OllamaLlm, PdfExtractor},
    config::AnalyzerConfig,
    server::AnalyzerServer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "findoc_analyzer=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AnalyzerConfig::from_env()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Broker: {}", config.queue.broker_url);
    tracing::info!("  - Result backend: {}", config.queue.result_backend_url);
    tracing::info!("  - Database: {}", config.database.url);
    tracing::info!("  - Workers: {}", config.queue.workers());
    tracing::info!("  - LLM model: {}", config.llm.model);

    let llm = Arc::new(OllamaLlm::new(&config.llm)?);

    // Check Ollama
    tracing::info!("Checking Ollama at {}...", config.llm.base_url);
    match llm.health_check().await {
        Ok(true) => tracing::info!("Ollama is running"),
        _ => {
            tracing::warn!("Ollama not available at {}", config.llm.base_url);
            tracing::warn!("Jobs will fail until it is reachable:");
            tracing::warn!("  ollama serve && ollama pull {}", config.llm.model);
        }
    }

    let analyst = Arc::new(FinancialAnalyst::new(
        Arc::new(PdfExtractor::new()),
        llm,
        config.llm.max_document_chars,
    ));

    // Create and start server
    let server = AnalyzerServer::new(config, analyst).await?;
    tracing::info!("API: http://{}", server.address());

    server.start().await?;

    Ok(())
}
