//! Fanout Router: the single place that turns a `DomainEvent` into
//! deliveries against the connection registries and the submitter map.
//!
//! Never mutates store state — pub/sub and keyspace notifications can both
//! fire for the same transition, so duplicate fanout must be harmless.

use crate::connections::{ConnectionRegistry, Namespace};
use crate::submitter::SubmitterMap;
use broker::{DomainEvent, JobBroker};
use observability::QueueMetrics;
use std::sync::Arc;
use tracing::{info, warn};

pub fn spawn(broker: JobBroker, connections: Arc<ConnectionRegistry>, submitters: Arc<SubmitterMap>) {
    let mut events = broker.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => route(&event, &connections, &submitters),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "fanout router lagged, dropping buffered events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    info!("event bus closed, fanout router exiting");
                    return;
                }
            }
        }
    });
}

fn route(event: &DomainEvent, connections: &ConnectionRegistry, submitters: &SubmitterMap) {
    let frame = match serde_json::to_string(event) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "failed to serialize domain event for fanout");
            return;
        }
    };
    QueueMetrics::record_event_fanned_out(event.type_name());

    connections.broadcast_to_monitors(event.type_name(), frame.clone());

    let Some(job_id) = event.job_id() else {
        return;
    };

    if let Some((namespace, connection_id)) = submitters.lookup(job_id) {
        connections.send_to_connection(namespace, &connection_id, frame.clone());
    }

    connections.send_to_job_subscribers(Namespace::Client, job_id, frame.clone());
    connections.send_to_job_subscribers(Namespace::Legacy, job_id, frame.clone());

    let terminal = event.is_terminal_for_job();
    if matches!(event, DomainEvent::UpdateJobProgress { .. }) || terminal {
        connections.send_to_sse(job_id, frame, terminal);
    }

    if terminal {
        submitters.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn terminal_event_drops_submitter_binding() {
        let connections = ConnectionRegistry::new();
        let submitters = SubmitterMap::new();
        submitters.bind("job-1".to_string(), Namespace::Client, "c1".to_string());

        route(
            &DomainEvent::CompleteJob {
                job_id: "job-1".to_string(),
                result: None,
                timestamp: Utc::now(),
            },
            &connections,
            &submitters,
        );

        assert!(submitters.lookup("job-1").is_none());
    }

    #[test]
    fn non_terminal_event_keeps_submitter_binding() {
        let connections = ConnectionRegistry::new();
        let submitters = SubmitterMap::new();
        submitters.bind("job-1".to_string(), Namespace::Client, "c1".to_string());

        route(
            &DomainEvent::JobStatusChanged {
                job_id: "job-1".to_string(),
                status: "IN_PROGRESS".to_string(),
                timestamp: Utc::now(),
            },
            &connections,
            &submitters,
        );

        assert!(submitters.lookup("job-1").is_some());
    }
}
