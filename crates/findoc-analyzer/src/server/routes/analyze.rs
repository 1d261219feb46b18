//! Document submission endpoint

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::server::state::AppState;

/// Query used when the form leaves it blank
pub const DEFAULT_QUERY: &str = "Analyze this financial document for investment insights";

/// Response from a successful submission
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub status: &'static str,
    pub task_id: Uuid,
    pub file_processed: String,
}

struct UploadedFile {
    filename: String,
    data: Vec<u8>,
}

/// POST /analyze - Upload a document and queue its analysis
pub async fn analyze_document(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalyzeResponse>> {
    let mut multipart =
        multipart.map_err(|e| Error::InvalidRequest(format!("Expected a multipart form: {}", e)))?;

    let mut file = None;
    let mut query = None;
    let mut username = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::submission(format!("Failed to read multipart field: {}", e)))?
    {
        match field.name().unwrap_or("") {
            "file" => {
                let Some(filename) = field.file_name().map(str::to_string) else {
                    continue;
                };
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| Error::submission(format!("Failed to read file: {}", e)))?;
                file = Some(UploadedFile {
                    filename,
                    data: data.to_vec(),
                });
            }
            "query" => {
                query = Some(field.text().await.map_err(|e| {
                    Error::submission(format!("Failed to read query: {}", e))
                })?);
            }
            "username" => {
                username = Some(field.text().await.map_err(|e| {
                    Error::submission(format!("Failed to read username: {}", e))
                })?);
            }
            other => {
                tracing::debug!("Ignoring unexpected form field '{}'", other);
            }
        }
    }

    let file = file.ok_or_else(|| Error::InvalidRequest("field 'file' is required".to_string()))?;
    let query = normalize_query(query.as_deref());
    let username = normalize_username(username.as_deref());

    tracing::info!(
        "Received {} ({} bytes) from {}",
        file.filename,
        file.data.len(),
        username.as_deref().unwrap_or("anonymous")
    );

    let stored = state
        .document_store()
        .store_document(&file.filename, &file.data)
        .await
        .map_err(|e| Error::submission(e.to_string()))?;
    tracing::debug!(
        "Stored '{}' as document {} ({} bytes) at {}",
        stored.original_filename,
        stored.id,
        stored.size,
        stored.path.display()
    );

    let task_id = state
        .job_queue()
        .submit(query, stored.path, username)
        .await
        .map_err(|e| Error::submission(e.to_string()))?;

    Ok(Json(AnalyzeResponse {
        status: "processing",
        task_id,
        file_processed: file.filename,
    }))
}

fn normalize_query(query: Option<&str>) -> String {
    match query.map(str::trim) {
        Some(q) if !q.is_empty() => q.to_string(),
        _ => DEFAULT_QUERY.to_string(),
    }
}

fn normalize_username(username: Option<&str>) -> Option<String> {
    username
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
}
