//! Queue statistics endpoint

use axum::{extract::State, Json};

use crate::processing::QueueStats;
use crate::server::state::AppState;

/// GET /jobs/stats - Job counts by state
pub async fn queue_stats(State(state): State<AppState>) -> Json<QueueStats> {
    Json(state.job_queue().stats())
}
