//! Admission Gateway HTTP surface: submit, read, and stream job progress.

use crate::state::AppState;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::{Json, Router};
use axum_helpers::{AppError, UuidPath};
use broker::{Job, JobStatus, JobSubmission};
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use observability::QueueMetrics;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::str::FromStr;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use utoipa::ToSchema;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", axum::routing::post(submit_job).get(list_jobs))
        .route("/jobs/{job_id}", axum::routing::get(get_job))
        .route("/jobs/{job_id}/progress", axum::routing::get(job_progress))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitJobResponse {
    pub success: bool,
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
}

#[utoipa::path(
    post,
    path = "/jobs",
    request_body = broker::JobSubmission,
    responses((status = 201, description = "Job accepted", body = SubmitJobResponse)),
    tag = "jobs"
)]
pub async fn submit_job(
    State(state): State<AppState>,
    Json(submission): Json<JobSubmission>,
) -> Result<impl IntoResponse, AppError> {
    let job = state
        .broker
        .submit(submission)
        .await
        .map_err(broker_error_to_app_error)?;

    QueueMetrics::record_submitted(&job.service_required);
    if let Ok((_, total)) = state.broker.list(Some(JobStatus::Pending), 1, 0).await {
        QueueMetrics::set_depth("pending", total as f64);
    }

    Ok((
        axum::http::StatusCode::CREATED,
        Json(SubmitJobResponse {
            success: true,
            job_id: job.job_id.to_string(),
            timestamp: Utc::now(),
        }),
    ))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GetJobResponse {
    pub success: bool,
    pub job: Job,
    pub timestamp: DateTime<Utc>,
}

#[utoipa::path(
    get,
    path = "/jobs/{job_id}",
    responses(
        (status = 200, description = "Job found", body = GetJobResponse),
        (status = 404, description = "No such job"),
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    UuidPath(job_id): UuidPath,
) -> Result<Json<GetJobResponse>, AppError> {
    let job = state
        .broker
        .get(&job_id.to_string())
        .await
        .map_err(broker_error_to_app_error)?;

    Ok(Json(GetJobResponse {
        success: true,
        job,
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: isize,
    #[serde(default)]
    pub offset: isize,
}

fn default_limit() -> isize {
    50
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListJobsResponse {
    pub success: bool,
    pub jobs: Vec<Job>,
    pub total: usize,
    pub timestamp: DateTime<Utc>,
}

#[utoipa::path(
    get,
    path = "/jobs",
    responses((status = 200, description = "Jobs matching the filter", body = ListJobsResponse)),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<ListJobsResponse>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(JobStatus::from_str)
        .transpose()
        .map_err(AppError::Validation)?;

    let (jobs, total) = state
        .broker
        .list(status, query.limit.max(1), query.offset.max(0))
        .await
        .map_err(broker_error_to_app_error)?;

    Ok(Json(ListJobsResponse {
        success: true,
        jobs,
        total,
        timestamp: Utc::now(),
    }))
}

/// Drops the SSE connection from the registry when the response future is
/// dropped, whether that happens on terminal-frame completion or because
/// the client disconnected early.
struct SseGuard {
    connections: std::sync::Arc<crate::connections::ConnectionRegistry>,
    id: uuid::Uuid,
}

impl Drop for SseGuard {
    fn drop(&mut self) {
        self.connections.remove_sse(self.id);
    }
}

#[utoipa::path(
    get,
    path = "/jobs/{job_id}/progress",
    responses((status = 200, description = "SSE progress stream")),
    tag = "jobs"
)]
pub async fn job_progress(
    State(state): State<AppState>,
    UuidPath(job_id): UuidPath,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let job_id = job_id.to_string();
    let (conn_id, rx) = state.connections.register_sse(job_id.clone());
    let guard = SseGuard {
        connections: state.connections.clone(),
        id: conn_id,
    };

    let connected = serde_json::json!({
        "type": "connected",
        "job_id": job_id,
        "client_id": conn_id.to_string(),
    });

    let head = tokio_stream::once(Ok(Event::default().data(connected.to_string())));
    let body = UnboundedReceiverStream::new(rx).map(|frame| Ok(Event::default().data(frame)));
    let stream = head.chain(body).map(move |item| {
        let _ = &guard;
        item
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub(crate) fn broker_error_to_app_error(err: broker::BrokerError) -> AppError {
    use broker::ErrorCategory;
    match err.category() {
        ErrorCategory::NotFound => AppError::NotFound(err.to_string()),
        ErrorCategory::Contract => AppError::Validation(err.to_string()),
        ErrorCategory::Transient => AppError::StoreUnavailable(err.to_string()),
        ErrorCategory::Internal => AppError::Internal(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::BrokerError;

    #[test]
    fn not_found_maps_to_404() {
        let app_err = broker_error_to_app_error(BrokerError::JobNotFound("job-1".into()));
        assert!(matches!(app_err, AppError::NotFound(_)));
    }

    #[test]
    fn serialization_error_maps_to_validation() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let app_err = broker_error_to_app_error(BrokerError::Serialization(parse_err));
        assert!(matches!(app_err, AppError::Validation(_)));
    }

    #[test]
    fn default_limit_is_fifty() {
        assert_eq!(default_limit(), 50);
    }
}
