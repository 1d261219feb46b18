//! Per-user analysis history

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use super::blocking;
use crate::error::Result;
use crate::server::state::AppState;
use crate::storage::AnalysisResult;

/// One entry of a user's history
#[derive(Debug, Serialize)]
pub struct AnalysisSummary {
    pub query: String,
    pub analysis: String,
    pub file_path: String,
    pub created_at: String,
}

impl From<AnalysisResult> for AnalysisSummary {
    fn from(result: AnalysisResult) -> Self {
        Self {
            query: result.query,
            analysis: result.analysis,
            file_path: result.file_path,
            created_at: result.created_at.to_rfc3339(),
        }
    }
}

/// GET /user/:username/analyses - List a user's analyses, oldest first
pub async fn list_user_analyses(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Vec<AnalysisSummary>>> {
    let store = state.result_store().clone();
    let results = blocking(move || store.list_for_user(&username)).await?;

    Ok(Json(results.into_iter().map(AnalysisSummary::from).collect()))
}
