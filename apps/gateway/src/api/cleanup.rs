//! `POST /api/cleanup` — synchronous invocation of the Janitor's sweep.

use crate::state::AppState;
use axum::extract::State;
use axum::{Json, Router};
use axum_helpers::AppError;
use broker::{CleanupReport, CleanupRequest};
use serde::Deserialize;
use utoipa::ToSchema;

pub fn router() -> Router<AppState> {
    Router::new().route("/cleanup", axum::routing::post(cleanup))
}

#[derive(Debug, Deserialize, Default, ToSchema)]
pub struct CleanupRequestBody {
    #[serde(default)]
    pub reset_workers: bool,
    #[serde(default)]
    pub cleanup_orphaned_jobs: bool,
    #[serde(default)]
    pub reset_specific_worker: Option<String>,
    #[serde(default)]
    pub max_job_age_minutes: Option<u64>,
}

impl From<CleanupRequestBody> for CleanupRequest {
    fn from(body: CleanupRequestBody) -> Self {
        Self {
            reset_workers: body.reset_workers,
            cleanup_orphaned_jobs: body.cleanup_orphaned_jobs,
            reset_specific_worker: body.reset_specific_worker,
            max_job_age_minutes: body.max_job_age_minutes,
        }
    }
}

#[utoipa::path(
    post,
    path = "/cleanup",
    request_body = CleanupRequestBody,
    responses((status = 200, description = "Cleanup report")),
    tag = "cleanup"
)]
pub async fn cleanup(
    State(state): State<AppState>,
    Json(body): Json<CleanupRequestBody>,
) -> Result<Json<CleanupReport>, AppError> {
    let report = state
        .janitor
        .run(body.into())
        .await
        .map_err(crate::api::jobs::broker_error_to_app_error)?;

    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_fields_carry_through_conversion() {
        let body = CleanupRequestBody {
            reset_workers: true,
            cleanup_orphaned_jobs: true,
            reset_specific_worker: Some("worker-1".into()),
            max_job_age_minutes: Some(120),
        };
        let request: CleanupRequest = body.into();
        assert!(request.reset_workers);
        assert!(request.cleanup_orphaned_jobs);
        assert_eq!(request.reset_specific_worker.as_deref(), Some("worker-1"));
        assert_eq!(request.max_job_age_minutes, Some(120));
    }

    #[test]
    fn defaults_are_all_off() {
        let body = CleanupRequestBody::default();
        assert!(!body.reset_workers);
        assert!(!body.cleanup_orphaned_jobs);
        assert!(body.reset_specific_worker.is_none());
    }
}
