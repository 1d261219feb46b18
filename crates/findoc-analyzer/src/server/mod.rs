//! HTTP server for the analyzer

pub mod routes;
pub mod state;

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::analysis::AnalysisProvider;
use crate::config::AnalyzerConfig;
use crate::error::{Error, Result};
use state::AppState;

/// Analyzer HTTP server
pub struct AnalyzerServer {
    config: AnalyzerConfig,
    state: AppState,
}

impl AnalyzerServer {
    /// Create a new server around the given analysis provider
    pub async fn new(config: AnalyzerConfig, analyst: Arc<dyn AnalysisProvider>) -> Result<Self> {
        let state = AppState::new(config.clone(), analyst).await?;
        Ok(Self { config, state })
    }

    /// Shared state, for callers that embed the router
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Start the server
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = self
            .address()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        let router = build_router(self.state.clone());

        tracing::info!("Starting analyzer server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| Error::internal(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Get the server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}

/// Build the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let enable_cors = state.config().server.enable_cors;
    let max_upload_size = state.config().server.max_upload_size;

    let router = routes::api_routes(max_upload_size)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}
