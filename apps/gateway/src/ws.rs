//! WebSocket namespaces: monitor, client, and the legacy unprefixed socket.
//!
//! Token validation, per-connection registry bookkeeping, and the inbound
//! message dispatch loop live here; the Admission Gateway's actual
//! `broker.submit` call is shared with the HTTP path via
//! [`crate::api::jobs`].

use crate::connections::Namespace;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Router;
use broker::JobSubmission;
use futures::{SinkExt, StreamExt};
use observability::QueueMetrics;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws/monitor/{monitor_id}", axum::routing::get(monitor_ws))
        .route("/ws/client/{client_id}", axum::routing::get(client_ws))
        .route("/ws/", axum::routing::get(legacy_ws))
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Policy code 1008 ("policy violation") per RFC 6455, sent on a token
/// mismatch before the socket is closed.
const POLICY_VIOLATION: u16 = 1008;

fn token_is_valid(state: &AppState, supplied: &Option<String>) -> bool {
    token_is_valid_parts(&state.config.ws_token, supplied)
}

fn token_is_valid_parts(configured: &Option<String>, supplied: &Option<String>) -> bool {
    match (configured, supplied) {
        (Some(expected), Some(got)) => expected == got,
        (Some(_), None) => true, // anonymous connections are permitted
        (None, _) => true,
    }
}

async fn close_policy_violation(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(axum::extract::ws::CloseFrame {
            code: POLICY_VIOLATION,
            reason: "invalid token".into(),
        })))
        .await;
}

pub async fn monitor_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(monitor_id): Path<String>,
    Query(query): Query<WsQuery>,
) -> Response {
    if !token_is_valid(&state, &query.token) {
        return ws.on_upgrade(close_policy_violation);
    }
    ws.on_upgrade(move |socket| handle_monitor(socket, state, monitor_id))
}

pub async fn client_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Query(query): Query<WsQuery>,
) -> Response {
    if !token_is_valid(&state, &query.token) {
        return ws.on_upgrade(close_policy_violation);
    }
    ws.on_upgrade(move |socket| handle_client(socket, state, client_id, Namespace::Client))
}

pub async fn legacy_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    if !token_is_valid(&state, &query.token) {
        return ws.on_upgrade(close_policy_violation);
    }
    let connection_id = Uuid::new_v4().to_string();
    ws.on_upgrade(move |socket| handle_client(socket, state, connection_id, Namespace::Legacy))
}

async fn handle_monitor(socket: WebSocket, state: AppState, monitor_id: String) {
    QueueMetrics::record_connection_opened("monitor");
    let rx = state.connections.register_monitor(monitor_id.clone());
    let (mut sink, mut stream) = socket.split();
    let mut outbound = rx;

    let forward = async {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    };

    let receive = async {
        while let Some(Ok(msg)) = stream.next().await {
            let Message::Text(text) = msg else { continue };
            let Ok(value) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            handle_monitor_message(&state, &monitor_id, value).await;
        }
    };

    tokio::select! {
        _ = forward => {},
        _ = receive => {},
    }

    state.connections.remove_monitor(&monitor_id);
    QueueMetrics::record_connection_closed("monitor");
}

async fn handle_monitor_message(state: &AppState, monitor_id: &str, value: Value) {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "monitor_connect" => {
            if value.get("request_full_state").and_then(Value::as_bool).unwrap_or(false) {
                let snapshot = build_full_state_snapshot(state).await;
                state.connections.send_to_monitor(monitor_id, snapshot.to_string());
            }
        }
        "subscribe" => {
            let topics: HashSet<String> = value
                .get("topics")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            state.connections.set_monitor_topics(monitor_id, topics);
        }
        "heartbeat" => {
            state
                .connections
                .send_to_monitor(monitor_id, json!({"type": "heartbeat_ack"}).to_string());
        }
        other => {
            warn!(kind = other, "unrecognized monitor message kind");
            state.connections.send_to_monitor(
                monitor_id,
                json!({"type": "error", "reason": format!("unknown message kind: {other}")}).to_string(),
            );
        }
    }
}

/// Gathers workers (active-by-TTL) and a first page of jobs per bucket.
/// Bounded by pagination rather than a full-namespace scan, per the
/// orchestrator's connection-limits guidance.
async fn build_full_state_snapshot(state: &AppState) -> Value {
    const PAGE: isize = 200;

    let workers = state.registry.list_active().await.unwrap_or_default();
    let worker_ids: Vec<String> = workers.iter().map(|w| w.worker_id.clone()).collect();
    let active = state.broker.list_active_for_workers(&worker_ids).await.unwrap_or_default();
    let (pending, pending_total) = state.broker.list(Some(broker::JobStatus::Pending), PAGE, 0).await.unwrap_or_default();
    let (completed, completed_total) = state.broker.list(Some(broker::JobStatus::Completed), PAGE, 0).await.unwrap_or_default();
    let (failed, failed_total) = state.broker.list(Some(broker::JobStatus::Failed), PAGE, 0).await.unwrap_or_default();

    json!({
        "type": "full_state_snapshot",
        "workers": workers,
        "jobs": {
            "pending": pending,
            "active": active,
            "completed": completed,
            "failed": failed,
        },
        "counters": {
            "active_workers": workers.len(),
            "pending_total": pending_total,
            "active_total": active.len(),
            "completed_total": completed_total,
            "failed_total": failed_total,
        },
    })
}

async fn handle_client(socket: WebSocket, state: AppState, connection_id: String, namespace: Namespace) {
    QueueMetrics::record_connection_opened(namespace_label(namespace));
    let rx: UnboundedReceiver<String> = match namespace {
        Namespace::Client => state.connections.register_client(connection_id.clone()),
        Namespace::Legacy => state.connections.register_legacy(connection_id.clone()),
    };
    let (mut sink, mut stream) = socket.split();
    let mut outbound = rx;

    let forward = async {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    };

    let receive = async {
        while let Some(Ok(msg)) = stream.next().await {
            let Message::Text(text) = msg else { continue };
            let Ok(value) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            handle_client_message(&state, &connection_id, namespace, value).await;
        }
    };

    tokio::select! {
        _ = forward => {},
        _ = receive => {},
    }

    match namespace {
        Namespace::Client => state.connections.remove_client(&connection_id),
        Namespace::Legacy => state.connections.remove_legacy(&connection_id),
    }
    QueueMetrics::record_connection_closed(namespace_label(namespace));
}

fn namespace_label(namespace: Namespace) -> &'static str {
    match namespace {
        Namespace::Client => "client",
        Namespace::Legacy => "legacy",
    }
}

async fn handle_client_message(state: &AppState, connection_id: &str, namespace: Namespace, value: Value) {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
    let message_id = value.get("id").and_then(Value::as_str).map(str::to_string);

    match kind {
        "submit_job" => {
            let submission: Result<JobSubmission, _> = serde_json::from_value(
                value.get("payload").cloned().unwrap_or(Value::Null),
            );
            match submission {
                Ok(submission) => match state.broker.submit(submission).await {
                    Ok(job) => {
                        state.submitters.bind(job.job_id.to_string(), namespace, connection_id.to_string());
                        QueueMetrics::record_submitted(&job.service_required);
                        reply(state, namespace, connection_id, message_id, json!({
                            "type": "ack",
                            "job_id": job.job_id.to_string(),
                        }));
                    }
                    Err(e) => reply_error(state, namespace, connection_id, message_id, &e.to_string()),
                },
                Err(e) => reply_error(state, namespace, connection_id, message_id, &format!("invalid submission: {e}")),
            }
        }
        "subscribe_progress" => {
            if let Some(job_id) = value.get("job_id").and_then(Value::as_str) {
                state.connections.subscribe_job(namespace, connection_id, job_id);
                reply(state, namespace, connection_id, message_id, json!({"type": "ack"}));
            } else {
                reply_error(state, namespace, connection_id, message_id, "missing job_id");
            }
        }
        "unsubscribe_progress" => {
            if let Some(job_id) = value.get("job_id").and_then(Value::as_str) {
                state.connections.unsubscribe_job(namespace, connection_id, job_id);
                reply(state, namespace, connection_id, message_id, json!({"type": "ack"}));
            } else {
                reply_error(state, namespace, connection_id, message_id, "missing job_id");
            }
        }
        "get_job_status" => {
            let Some(job_id) = value.get("job_id").and_then(Value::as_str) else {
                reply_error(state, namespace, connection_id, message_id, "missing job_id");
                return;
            };
            match state.broker.get(job_id).await {
                Ok(job) => reply(state, namespace, connection_id, message_id, json!({"type": "ack", "job": job})),
                Err(e) => reply_error(state, namespace, connection_id, message_id, &e.to_string()),
            }
        }
        "cancel_job" => {
            let Some(job_id) = value.get("job_id").and_then(Value::as_str) else {
                reply_error(state, namespace, connection_id, message_id, "missing job_id");
                return;
            };
            let reason = value.get("reason").and_then(Value::as_str).unwrap_or("cancelled by client").to_string();
            match state.broker.cancel(job_id, reason).await {
                Ok(()) => reply(state, namespace, connection_id, message_id, json!({"type": "ack"})),
                Err(e) => reply_error(state, namespace, connection_id, message_id, &e.to_string()),
            }
        }
        other => {
            warn!(kind = other, "unrecognized client message kind");
            reply_error(state, namespace, connection_id, message_id, &format!("unknown message kind: {other}"));
        }
    }
}

fn reply(state: &AppState, namespace: Namespace, connection_id: &str, message_id: Option<String>, mut body: Value) {
    if let Some(id) = message_id {
        if let Value::Object(map) = &mut body {
            map.insert("message_id".to_string(), Value::String(id));
        }
    }
    state.connections.send_to_connection(namespace, connection_id, body.to_string());
}

fn reply_error(state: &AppState, namespace: Namespace, connection_id: &str, message_id: Option<String>, reason: &str) {
    reply(state, namespace, connection_id, message_id, json!({"type": "error", "reason": reason}));
}

#[cfg(test)]
mod token_tests {
    use super::token_is_valid_parts;

    #[test]
    fn no_configured_token_allows_anything() {
        assert!(token_is_valid_parts(&None, &None));
        assert!(token_is_valid_parts(&None, &Some("whatever".into())));
    }

    #[test]
    fn configured_token_permits_anonymous_connection() {
        assert!(token_is_valid_parts(&Some("secret".into()), &None));
    }

    #[test]
    fn configured_token_rejects_mismatch() {
        assert!(!token_is_valid_parts(&Some("secret".into()), &Some("wrong".into())));
    }

    #[test]
    fn configured_token_accepts_match() {
        assert!(token_is_valid_parts(&Some("secret".into()), &Some("secret".into())));
    }
}

