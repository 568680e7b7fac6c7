//! Queue and connection metrics for the job orchestrator.

use metrics::{counter, gauge, histogram};

/// Metrics recorded by the job broker and connection multiplexer.
///
/// Label values are kept low-cardinality: queue names, job status names,
/// event type names, and connection namespaces, never job or worker ids.
pub struct QueueMetrics;

impl QueueMetrics {
    pub fn record_submitted(queue: &str) {
        counter!("queue_jobs_submitted_total", "queue" => queue.to_string()).increment(1);
    }

    pub fn record_claimed(queue: &str) {
        counter!("queue_jobs_claimed_total", "queue" => queue.to_string()).increment(1);
    }

    pub fn record_completed(queue: &str, status: &str) {
        counter!(
            "queue_jobs_completed_total",
            "queue" => queue.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
    }

    pub fn record_requeued(queue: &str, reason: &str) {
        counter!(
            "queue_jobs_requeued_total",
            "queue" => queue.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    pub fn record_wait_duration(queue: &str, seconds: f64) {
        histogram!("queue_job_wait_duration_seconds", "queue" => queue.to_string())
            .record(seconds);
    }

    pub fn record_processing_duration(queue: &str, seconds: f64) {
        histogram!("queue_job_processing_duration_seconds", "queue" => queue.to_string())
            .record(seconds);
    }

    pub fn set_depth(queue: &str, depth: f64) {
        gauge!("queue_depth", "queue" => queue.to_string()).set(depth);
    }

    pub fn set_active_workers(count: f64) {
        gauge!("queue_active_workers").set(count);
    }

    pub fn record_heartbeat_missed() {
        counter!("queue_worker_heartbeats_missed_total").increment(1);
    }

    pub fn record_connection_opened(namespace: &str) {
        counter!("queue_connections_opened_total", "namespace" => namespace.to_string())
            .increment(1);
    }

    pub fn record_connection_closed(namespace: &str) {
        counter!("queue_connections_closed_total", "namespace" => namespace.to_string())
            .increment(1);
    }

    pub fn set_connections_active(namespace: &str, count: f64) {
        gauge!("queue_connections_active", "namespace" => namespace.to_string()).set(count);
    }

    pub fn record_event_fanned_out(event_type: &str) {
        counter!("queue_events_fanned_out_total", "event_type" => event_type.to_string())
            .increment(1);
    }

    pub fn record_janitor_run(task: &str, affected: u64) {
        counter!("queue_janitor_runs_total", "task" => task.to_string()).increment(1);
        counter!(
            "queue_janitor_items_affected_total",
            "task" => task.to_string()
        )
        .increment(affected);
    }
}
