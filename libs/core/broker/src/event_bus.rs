//! Event Bus: the single inbound boundary for state changes coming from
//! workers. Subscribes to the backend's fixed pub/sub channels plus
//! keyspace notifications on `job:*`/`worker:*`, and turns every message
//! into a `DomainEvent` on the shared broadcast bus.
//!
//! `worker_status` is translated, never re-driven through
//! `WorkerRegistry::update_status` — that method already republishes to
//! this same channel, so calling it again here would loop forever.
//! `complete_job` is the one channel that does mutate the store, via
//! `JobBroker::complete`/`fail`, since there is no dedicated failure
//! channel in the wire contract; a payload carrying an `error` field
//! routes to `fail` instead of `complete`.

use crate::broker::JobBroker;
use crate::event::DomainEvent;
use crate::keys;
use crate::registry::WorkerRegistry;
use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct EventBus {
    client: redis::Client,
    broker: JobBroker,
    registry: WorkerRegistry,
    events: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(
        client: redis::Client,
        broker: JobBroker,
        registry: WorkerRegistry,
        events: broadcast::Sender<DomainEvent>,
    ) -> Self {
        Self {
            client,
            broker,
            registry,
            events,
        }
    }

    /// Spawns the subscriber loop. A dropped pub/sub connection is retried
    /// rather than treated as fatal, since it shares nothing with the
    /// `ConnectionManager` the Broker and Registry use for their own reads
    /// and writes.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(e) = self.run().await {
                    warn!(error = %e, "event bus lost its subscription, reconnecting");
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        })
    }

    async fn run(&self) -> redis::RedisResult<()> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(keys::channels::UPDATE_JOB_PROGRESS).await?;
        pubsub.subscribe(keys::channels::WORKER_STATUS).await?;
        pubsub.subscribe(keys::channels::COMPLETE_JOB).await?;
        pubsub.subscribe(keys::channels::MACHINE_STARTUP_EVENTS).await?;
        pubsub.psubscribe("__keyspace@*__:job:*").await?;
        pubsub.psubscribe("__keyspace@*__:worker:*").await?;
        info!("event bus subscribed to backend channels");

        let mut messages = pubsub.into_on_message();
        while let Some(msg) = messages.next().await {
            let channel = msg.get_channel_name().to_string();
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, channel, "event bus payload was not a string, dropping");
                    continue;
                }
            };
            self.handle(&channel, &payload).await;
        }

        Ok(())
    }

    async fn handle(&self, channel: &str, payload: &str) {
        if channel.starts_with("__keyspace@") {
            if let Some(key) = channel.split_once("__:").map(|(_, key)| key) {
                self.handle_keyspace(key).await;
            }
            return;
        }

        let Ok(value) = serde_json::from_str::<Value>(payload) else {
            warn!(channel, "event bus payload was not valid JSON, dropping");
            return;
        };

        match channel {
            c if c == keys::channels::UPDATE_JOB_PROGRESS => {
                if let Some(event) = translate_progress(&value) {
                    let _ = self.events.send(event);
                }
            }
            c if c == keys::channels::WORKER_STATUS => {
                if let Some(event) = translate_worker_status(&value) {
                    let _ = self.events.send(event);
                }
            }
            c if c == keys::channels::COMPLETE_JOB => self.handle_complete(&value).await,
            c if c == keys::channels::MACHINE_STARTUP_EVENTS => {
                if let Some(event) = translate_startup(&value) {
                    let _ = self.events.send(event);
                }
            }
            other => warn!(channel = other, "event bus received message on unknown channel"),
        }
    }

    async fn handle_complete(&self, value: &Value) {
        let Some(job_id) = value.get("job_id").and_then(Value::as_str) else {
            warn!("complete_job payload missing job_id");
            return;
        };

        if let Some(error) = value.get("error").and_then(Value::as_str) {
            let can_retry = value.get("can_retry").and_then(Value::as_bool).unwrap_or(true);
            if let Err(e) = self.broker.fail(job_id, error.to_string(), can_retry).await {
                warn!(error = %e, job_id, "event bus failed to record job failure");
            }
            return;
        }

        let result = value.get("result").cloned().unwrap_or(Value::Null);
        if let Err(e) = self.broker.complete(job_id, result).await {
            warn!(error = %e, job_id, "event bus failed to record job completion");
        }
    }

    /// Keyspace notifications are a redundant out-of-band signal, not the
    /// primary path: they carry no job/worker snapshot, only the key that
    /// changed, so this re-fetches current state and emits an advisory
    /// event rather than trying to reconstruct the transition that caused it.
    async fn handle_keyspace(&self, key: &str) {
        if let Some(job_id) = key.strip_prefix("job:") {
            if let Ok(job) = self.broker.get(job_id).await {
                let _ = self.events.send(DomainEvent::JobStatusChanged {
                    job_id: job_id.to_string(),
                    status: job.status.as_str().to_string(),
                    timestamp: Utc::now(),
                });
            }
            return;
        }

        if let Some(rest) = key.strip_prefix("worker:") {
            let worker_id = rest.strip_suffix(":heartbeat").unwrap_or(rest);
            if let Ok(worker) = self.registry.get(worker_id).await {
                let status = worker.status.as_str().to_string();
                let _ = self.events.send(DomainEvent::WorkerStatusChanged {
                    worker_id: worker_id.to_string(),
                    old_status: status.clone(),
                    new_status: status,
                    current_job_id: worker.current_job_id.clone(),
                    timestamp: Utc::now(),
                });
            }
        }
    }
}

fn translate_progress(value: &Value) -> Option<DomainEvent> {
    let job_id = value.get("job_id").and_then(Value::as_str)?;
    let progress = value.get("progress").cloned().unwrap_or(Value::Null);
    Some(DomainEvent::UpdateJobProgress {
        job_id: job_id.to_string(),
        progress,
        timestamp: Utc::now(),
    })
}

/// Pure re-emit of the payload `WorkerRegistry::update_status` already
/// wrote; callers must never feed this back into the registry.
fn translate_worker_status(value: &Value) -> Option<DomainEvent> {
    let worker_id = value.get("worker_id").and_then(Value::as_str)?;
    let old_status = value.get("old_status").and_then(Value::as_str).unwrap_or("UNKNOWN");
    let new_status = value.get("new_status").and_then(Value::as_str).unwrap_or("UNKNOWN");
    let current_job_id = value.get("current_job_id").and_then(Value::as_str).map(str::to_string);

    Some(DomainEvent::WorkerStatusChanged {
        worker_id: worker_id.to_string(),
        old_status: old_status.to_string(),
        new_status: new_status.to_string(),
        current_job_id,
        timestamp: Utc::now(),
    })
}

fn translate_startup(value: &Value) -> Option<DomainEvent> {
    let worker_id = value.get("worker_id").and_then(Value::as_str)?;
    let stage = value.get("stage").and_then(Value::as_str).unwrap_or("unknown").to_string();

    Some(DomainEvent::MachineStartup {
        worker_id: worker_id.to_string(),
        stage,
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_payload_translates_job_id_and_progress() {
        let event = translate_progress(&json!({ "job_id": "job-1", "progress": { "pct": 50 } })).unwrap();
        match event {
            DomainEvent::UpdateJobProgress { job_id, progress, .. } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(progress, json!({ "pct": 50 }));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn progress_payload_missing_job_id_translates_to_nothing() {
        assert!(translate_progress(&json!({ "progress": 1 })).is_none());
    }

    #[test]
    fn worker_status_payload_round_trips_without_touching_the_registry() {
        let event = translate_worker_status(&json!({
            "worker_id": "w-1",
            "old_status": "IDLE",
            "new_status": "BUSY",
            "current_job_id": "job-1",
        }))
        .unwrap();

        match event {
            DomainEvent::WorkerStatusChanged { worker_id, old_status, new_status, current_job_id, .. } => {
                assert_eq!(worker_id, "w-1");
                assert_eq!(old_status, "IDLE");
                assert_eq!(new_status, "BUSY");
                assert_eq!(current_job_id, Some("job-1".to_string()));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn startup_payload_translates_to_machine_startup() {
        let event = translate_startup(&json!({ "worker_id": "w-1", "stage": "booting" })).unwrap();
        match event {
            DomainEvent::MachineStartup { worker_id, stage, .. } => {
                assert_eq!(worker_id, "w-1");
                assert_eq!(stage, "booting");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
