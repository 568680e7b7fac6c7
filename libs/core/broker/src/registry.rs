//! Worker Registry: identity, capabilities, heartbeat TTL, and status.

use crate::error::{BrokerError, BrokerResult};
use crate::event::DomainEvent;
use crate::keys;
use crate::worker::{Worker, WorkerCapabilities, WorkerStatus};
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct WorkerRegistry {
    conn: ConnectionManager,
    events: broadcast::Sender<DomainEvent>,
    heartbeat_ttl_seconds: u64,
}

impl WorkerRegistry {
    pub fn new(
        conn: ConnectionManager,
        events: broadcast::Sender<DomainEvent>,
        heartbeat_ttl_seconds: u64,
    ) -> Self {
        Self {
            conn,
            events,
            heartbeat_ttl_seconds,
        }
    }

    pub async fn register(&self, worker_id: String, capabilities: WorkerCapabilities) -> BrokerResult<Worker> {
        let now = Utc::now();
        let worker = Worker::new(worker_id.clone(), capabilities, now);
        let mut conn = self.conn.clone();

        let fields = crate::job::record_to_fields(&worker)?;
        let _: () = conn.hset_multiple(keys::worker(&worker_id), &fields.into_iter().collect::<Vec<_>>()).await?;
        let _: () = conn.set_ex(keys::worker_heartbeat(&worker_id), "1", self.heartbeat_ttl_seconds).await?;
        let _: () = conn.sadd(keys::WORKERS_ACTIVE, &worker_id).await?;
        let _: () = conn.srem(keys::WORKERS_OFFLINE, &worker_id).await?;

        Ok(worker)
    }

    pub async fn get(&self, worker_id: &str) -> BrokerResult<Worker> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(keys::worker(worker_id)).await?;
        if fields.is_empty() {
            return Err(BrokerError::WorkerNotFound(worker_id.to_string()));
        }
        Ok(crate::job::record_from_fields(&fields)?)
    }

    /// Two writes, per the orchestrator's active-is-TTL-not-status design:
    /// the cached `last_heartbeat` field, and a separate TTL key whose mere
    /// presence is what "active" actually means.
    pub async fn heartbeat(&self, worker_id: &str) -> BrokerResult<()> {
        let mut conn = self.conn.clone();
        let now = Utc::now().to_rfc3339();
        let _: () = conn.hset(keys::worker(worker_id), "last_heartbeat", now).await?;
        let _: () = conn.set_ex(keys::worker_heartbeat(worker_id), "1", self.heartbeat_ttl_seconds).await?;
        Ok(())
    }

    pub async fn is_active(&self, worker_id: &str) -> BrokerResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(keys::worker_heartbeat(worker_id)).await?;
        Ok(exists)
    }

    pub async fn update_status(
        &self,
        worker_id: &str,
        new_status: WorkerStatus,
        current_job_id: Option<String>,
    ) -> BrokerResult<()> {
        let worker = self.get(worker_id).await?;
        let old_status = worker.status;

        let mut conn = self.conn.clone();
        let entries = [
            ("status", new_status.as_str().to_string()),
            (
                "current_job_id",
                current_job_id.clone().unwrap_or_default(),
            ),
        ];
        let _: () = conn.hset_multiple(keys::worker(worker_id), &entries).await?;

        if new_status == WorkerStatus::Offline {
            let _: () = conn.smove(keys::WORKERS_ACTIVE, keys::WORKERS_OFFLINE, worker_id).await?;
        } else {
            let _: () = conn.smove(keys::WORKERS_OFFLINE, keys::WORKERS_ACTIVE, worker_id).await?;
        }

        let payload = serde_json::json!({
            "worker_id": worker_id,
            "old_status": old_status.as_str(),
            "new_status": new_status.as_str(),
            "current_job_id": current_job_id,
        });
        let _: () = conn.publish(keys::channels::WORKER_STATUS, payload.to_string()).await?;

        let _ = self.events.send(DomainEvent::WorkerStatusChanged {
            worker_id: worker_id.to_string(),
            old_status: old_status.as_str().to_string(),
            new_status: new_status.as_str().to_string(),
            current_job_id,
            timestamp: Utc::now(),
        });

        Ok(())
    }

    /// Active as defined by TTL presence, not the cached status field.
    pub async fn list_active(&self) -> BrokerResult<Vec<Worker>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(keys::WORKERS_ACTIVE).await?;

        let mut active = Vec::with_capacity(ids.len());
        for id in ids {
            if !self.is_active(&id).await? {
                continue;
            }
            match self.get(&id).await {
                Ok(worker) => active.push(worker),
                Err(BrokerError::WorkerNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(active)
    }

    pub async fn remove(&self, worker_id: &str) -> BrokerResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(keys::worker(worker_id)).await?;
        let _: () = conn.del(keys::worker_heartbeat(worker_id)).await?;
        let _: () = conn.srem(keys::WORKERS_ACTIVE, worker_id).await?;
        let _: () = conn.srem(keys::WORKERS_OFFLINE, worker_id).await?;
        Ok(())
    }

    pub fn parse_status(raw: &str) -> WorkerStatus {
        WorkerStatus::from_str(raw).unwrap_or(WorkerStatus::Offline)
    }
}
