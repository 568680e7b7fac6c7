//! Worker-facing HTTP surface.
//!
//! The distilled interface list only names the client/monitor-facing
//! routes; workers still need a transport to register, heartbeat, pull
//! work, and report status, since the core explicitly says "workers pull"
//! rather than being dispatched to. This mirrors the Worker Registry's and
//! Broker's own operations one-to-one rather than inventing new semantics.

use crate::state::AppState;
use axum::extract::{Path, State};
use axum::{Json, Router};
use axum_helpers::AppError;
use broker::{Job, Worker, WorkerCapabilities, WorkerStatus};
use chrono::{DateTime, Utc};
use observability::QueueMetrics;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/workers", axum::routing::post(register).get(list_active))
        .route("/workers/{worker_id}", axum::routing::get(get_worker).delete(remove_worker))
        .route("/workers/{worker_id}/heartbeat", axum::routing::post(heartbeat))
        .route("/workers/{worker_id}/status", axum::routing::post(update_status))
        .route("/workers/{worker_id}/claim", axum::routing::post(claim_next))
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub worker: Worker,
    pub timestamp: DateTime<Utc>,
}

async fn register(
    State(state): State<AppState>,
    Json(capabilities): Json<WorkerCapabilities>,
) -> Result<Json<RegisterResponse>, AppError> {
    let worker_id = uuid::Uuid::new_v4().to_string();
    let worker = state
        .registry
        .register(worker_id, capabilities)
        .await
        .map_err(crate::api::jobs::broker_error_to_app_error)?;

    Ok(Json(RegisterResponse {
        success: true,
        worker,
        timestamp: Utc::now(),
    }))
}

async fn get_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
) -> Result<Json<Worker>, AppError> {
    state
        .registry
        .get(&worker_id)
        .await
        .map(Json)
        .map_err(crate::api::jobs::broker_error_to_app_error)
}

#[derive(Debug, Serialize)]
pub struct ListActiveResponse {
    pub success: bool,
    pub workers: Vec<Worker>,
}

async fn list_active(State(state): State<AppState>) -> Result<Json<ListActiveResponse>, AppError> {
    let workers = state
        .registry
        .list_active()
        .await
        .map_err(crate::api::jobs::broker_error_to_app_error)?;
    QueueMetrics::set_active_workers(workers.len() as f64);
    Ok(Json(ListActiveResponse { success: true, workers }))
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .registry
        .heartbeat(&worker_id)
        .await
        .map_err(crate::api::jobs::broker_error_to_app_error)?;
    Ok(Json(serde_json::json!({"success": true})))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusBody {
    pub status: String,
    #[serde(default)]
    pub current_job_id: Option<String>,
}

async fn update_status(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = WorkerStatus::from_str(&body.status)
        .map_err(AppError::Validation)?;
    state
        .registry
        .update_status(&worker_id, status, body.current_job_id)
        .await
        .map_err(crate::api::jobs::broker_error_to_app_error)?;
    Ok(Json(serde_json::json!({"success": true})))
}

async fn remove_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .registry
        .remove(&worker_id)
        .await
        .map_err(crate::api::jobs::broker_error_to_app_error)?;
    Ok(Json(serde_json::json!({"success": true})))
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub success: bool,
    pub job: Option<Job>,
}

/// Pull-model work acquisition: capability-filtered peek-and-claim over the
/// top of the pending queue.
async fn claim_next(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
    Json(capabilities): Json<WorkerCapabilities>,
) -> Result<Json<ClaimResponse>, AppError> {
    let job = state
        .broker
        .next_for_worker(&worker_id, &capabilities)
        .await
        .map_err(crate::api::jobs::broker_error_to_app_error)?;

    if let Some(job) = &job {
        QueueMetrics::record_claimed(&job.service_required);
    }

    Ok(Json(ClaimResponse { success: true, job }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_string_is_rejected() {
        assert!(WorkerStatus::from_str("NOT_A_STATUS").is_err());
    }

    #[test]
    fn known_status_strings_round_trip() {
        for status in ["IDLE", "BUSY", "OFFLINE", "ERROR"] {
            let parsed = WorkerStatus::from_str(status).unwrap();
            assert_eq!(parsed.as_str(), status);
        }
    }
}
