//! Observability utilities for the job orchestrator.
//!
//! This crate provides:
//! - Prometheus metrics recording and export
//! - Custom metrics for queue depth, claims, heartbeats, connections, and fanout
//! - Axum middleware for automatic request metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{init_metrics, metrics_handler, QueueMetrics};
//!
//! // Initialize metrics recorder
//! init_metrics();
//!
//! // Record queue operations
//! QueueMetrics::record_submitted("default");
//! QueueMetrics::record_claimed("default");
//!
//! // Add metrics endpoint to router
//! let app = Router::new()
//!     .route("/metrics", get(metrics_handler));
//! ```

pub mod middleware;
pub mod queue;

pub use middleware::MetricsLayer;
pub use queue::QueueMetrics;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize the Prometheus metrics recorder.
///
/// This should be called once at application startup.
/// Returns the PrometheusHandle for rendering metrics.
pub fn init_metrics() -> &'static PrometheusHandle {
    METRICS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");

        info!("Prometheus metrics recorder initialized");

        // Register metric descriptions
        register_metric_descriptions();

        handle
    })
}

/// Get the metrics handle (must call init_metrics first)
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Axum handler for /metrics endpoint
pub async fn metrics_handler() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

/// Register metric descriptions for documentation
fn register_metric_descriptions() {
    use metrics::describe_counter;
    use metrics::describe_gauge;
    use metrics::describe_histogram;

    // HTTP metrics
    describe_counter!(
        "http_requests_total",
        "Total number of HTTP requests"
    );
    describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "http_requests_errors_total",
        "Total number of HTTP request errors"
    );

    // Queue metrics
    describe_counter!("queue_jobs_submitted_total", "Total jobs submitted by queue");
    describe_counter!("queue_jobs_claimed_total", "Total jobs claimed by queue");
    describe_counter!(
        "queue_jobs_completed_total",
        "Total jobs completed by queue and status"
    );
    describe_counter!(
        "queue_jobs_requeued_total",
        "Total jobs requeued by queue and reason"
    );
    describe_histogram!(
        "queue_job_wait_duration_seconds",
        "Time a job spent queued before being claimed"
    );
    describe_histogram!(
        "queue_job_processing_duration_seconds",
        "Time a job spent being processed by a worker"
    );
    describe_gauge!("queue_depth", "Current number of queued jobs by queue");
    describe_gauge!("queue_active_workers", "Current number of registered workers");
    describe_counter!(
        "queue_worker_heartbeats_missed_total",
        "Total worker heartbeats that expired without renewal"
    );

    // Connection and fanout metrics
    describe_counter!(
        "queue_connections_opened_total",
        "Total WebSocket connections opened by namespace"
    );
    describe_counter!(
        "queue_connections_closed_total",
        "Total WebSocket connections closed by namespace"
    );
    describe_gauge!(
        "queue_connections_active",
        "Current number of open WebSocket connections by namespace"
    );
    describe_counter!(
        "queue_events_fanned_out_total",
        "Total domain events fanned out to connections by event type"
    );
    describe_counter!("queue_janitor_runs_total", "Total janitor sweeps by task");
    describe_counter!(
        "queue_janitor_items_affected_total",
        "Total items affected by janitor sweeps by task"
    );
}
