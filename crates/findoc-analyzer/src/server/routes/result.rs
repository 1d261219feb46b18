//! Task result polling endpoint

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::processing::{FailureKind, JobStatus};
use crate::server::state::AppState;

/// Body of `GET /result/{task_id}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultResponse {
    Pending,
    Running,
    Success { analysis: String },
    Failed { error: String, reason: FailureKind },
    NotFound,
}

impl ResultResponse {
    fn from_status(status: JobStatus, strict_unknown: bool) -> Self {
        match status {
            JobStatus::Pending => ResultResponse::Pending,
            JobStatus::Running => ResultResponse::Running,
            JobStatus::Succeeded { result } => ResultResponse::Success { analysis: result },
            JobStatus::Failed { error, kind } => ResultResponse::Failed {
                error,
                reason: kind,
            },
            JobStatus::Unknown if strict_unknown => ResultResponse::NotFound,
            // an id we never issued looks the same as one not yet picked up
            JobStatus::Unknown => ResultResponse::Pending,
        }
    }
}

/// GET /result/:task_id - Poll a task
pub async fn get_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Json<ResultResponse> {
    let status = match Uuid::parse_str(task_id.trim()) {
        Ok(id) => state.job_queue().poll(id),
        Err(_) => {
            tracing::debug!("Poll for malformed task id '{}'", task_id);
            JobStatus::Unknown
        }
    };

    Json(ResultResponse::from_status(
        status,
        state.config().queue.strict_unknown_jobs,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::routes::test_support::*;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use tower::ServiceExt;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ResultResponse::from_status(JobStatus::Unknown, false),
            ResultResponse::Pending
        );
        assert_eq!(
            ResultResponse::from_status(JobStatus::Unknown, true),
            ResultResponse::NotFound
        );
        assert_eq!(
            ResultResponse::from_status(JobStatus::Running, true),
            ResultResponse::Running
        );
    }

    #[test]
    fn test_wire_shape() {
        let failed = ResultResponse::Failed {
            error: "timed out".to_string(),
            reason: FailureKind::Timeout,
        };
        assert_eq!(
            serde_json::to_value(failed).unwrap(),
            serde_json::json!({"status": "failed", "error": "timed out", "reason": "timeout"})
        );
        assert_eq!(
            serde_json::to_value(ResultResponse::Pending).unwrap(),
            serde_json::json!({"status": "pending"})
        );
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids_poll_as_pending() {
        let app = test_app(Arc::new(EchoAnalyst)).await;

        for id in [Uuid::new_v4().to_string(), "not-a-uuid".to_string()] {
            let response = app
                .router
                .clone()
                .oneshot(get(&format!("/result/{}", id)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(json_body(response).await["status"], "pending");
        }
    }

    #[tokio::test]
    async fn test_strict_mode_reports_not_found() {
        let app = test_app_with(Arc::new(EchoAnalyst), |config| {
            config.queue.strict_unknown_jobs = true;
        })
        .await;

        let response = app
            .router
            .oneshot(get(&format!("/result/{}", Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["status"], "not_found");
    }

    #[tokio::test]
    async fn test_failed_analysis_reports_error_and_writes_nothing() {
        let app = test_app(Arc::new(FailingAnalyst)).await;

        let request = multipart_request(
            "/analyze",
            &[("file", Some("broken.pdf"), "garbage"), ("username", None, "bob")],
        );
        let response = app.router.clone().oneshot(request).await.unwrap();
        let task_id = json_body(response).await["task_id"]
            .as_str()
            .unwrap()
            .to_string();

        let result = wait_for_result(&app.router, &task_id).await;
        assert_eq!(result["status"], "failed");
        assert_eq!(result["reason"], "error");
        assert!(!result["error"].as_str().unwrap().is_empty());

        let response = app
            .router
            .oneshot(get("/user/bob/analyses"))
            .await
            .unwrap();
        assert_eq!(json_body(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_terminal_result_is_stable_across_polls() {
        let app = test_app(Arc::new(EchoAnalyst)).await;

        let request = multipart_request("/analyze", &[("file", Some("a.pdf"), "x")]);
        let response = app.router.clone().oneshot(request).await.unwrap();
        let task_id = json_body(response).await["task_id"]
            .as_str()
            .unwrap()
            .to_string();

        let first = wait_for_result(&app.router, &task_id).await;
        let second = wait_for_result(&app.router, &task_id).await;
        let third = wait_for_result(&app.router, &task_id).await;

        assert_eq!(first["status"], "success");
        assert_eq!(first, second);
        assert_eq!(second, third);
    }
}
