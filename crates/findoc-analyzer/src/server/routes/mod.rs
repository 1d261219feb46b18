//! API routes for the analyzer server

pub mod analyses;
pub mod analyze;
pub mod jobs;
pub mod result;
pub mod users;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        .route("/", get(health))
        // Submission - with larger body limit for file uploads
        .route(
            "/analyze",
            post(analyze::analyze_document).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/result/:task_id", get(result::get_result))
        .route("/user/:username/analyses", get(analyses::list_user_analyses))
        .route("/users", post(users::create_user))
        .route("/users/:username", get(users::get_user))
        .route("/jobs/stats", get(jobs::queue_stats))
}

/// GET / - Health check
async fn health() -> Json<Value> {
    Json(json!({ "message": "Financial Document Analyzer API is running" }))
}

/// Run a synchronous store call off the async runtime
pub(crate) async fn blocking<T, F>(operation: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|e| Error::internal(format!("Task join error: {}", e)))?
}
