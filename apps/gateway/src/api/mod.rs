//! The Admission Gateway's HTTP surface, nested under `/api` by the
//! generic router builder.

pub mod cleanup;
pub mod jobs;
pub mod workers;

use crate::state::AppState;
use axum::Router;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(jobs::router())
        .merge(cleanup::router())
        .merge(workers::router())
        .with_state(state)
}
