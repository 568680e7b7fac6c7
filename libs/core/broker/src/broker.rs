//! The Job Broker: submit, claim, release, complete, fail, cancel, and the
//! workflow-aware priority queue.

use crate::error::{BrokerError, BrokerResult};
use crate::event::DomainEvent;
use crate::job::{score_for, Job, JobStatus, JobSubmission};
use crate::keys;
use crate::worker::{matches as worker_matches, WorkerCapabilities};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Atomically removes `job_id` from the pending sorted set and, if it was
/// present, writes the assignment fields on the job hash and adds it to the
/// worker's active bucket. The caller that observes `1` from `ZREM` is the
/// only one that runs the write half, so two workers racing on the same id
/// can never both win.
const CLAIM_SCRIPT: &str = r#"
local pending_key = KEYS[1]
local job_key = KEYS[2]
local active_key = KEYS[3]
local job_id = ARGV[1]
local worker_id = ARGV[2]
local assigned_at = ARGV[3]
local job_json = ARGV[4]

local removed = redis.call('ZREM', pending_key, job_id)
if removed == 0 then
    return 0
end

redis.call('HSET', job_key, 'status', 'ASSIGNED', 'worker_id', worker_id, 'assigned_at', assigned_at)
redis.call('HSET', active_key, job_id, job_json)
return 1
"#;

#[derive(Clone)]
pub struct JobBroker {
    conn: ConnectionManager,
    events: broadcast::Sender<DomainEvent>,
    completed_ttl_seconds: u64,
    failed_ttl_seconds: u64,
    workflow_ttl_seconds: u64,
    claim_scan_window: usize,
}

impl JobBroker {
    pub fn new(
        conn: ConnectionManager,
        events: broadcast::Sender<DomainEvent>,
        config: &crate::config::BrokerConfig,
    ) -> Self {
        Self {
            conn,
            events,
            completed_ttl_seconds: config.completed_ttl_seconds,
            failed_ttl_seconds: config.failed_ttl_seconds,
            workflow_ttl_seconds: config.workflow_ttl_seconds,
            claim_scan_window: config.claim_scan_window,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: DomainEvent) {
        // No subscribers is a legitimate state (e.g. no monitors connected yet).
        let _ = self.events.send(event);
    }

    /// Resolves workflow inheritance and persists the job, pending.
    pub async fn submit(&self, submission: JobSubmission) -> BrokerResult<Job> {
        let mut conn = self.conn.clone();
        let now = Utc::now();

        let (workflow_priority, workflow_datetime) = match &submission.workflow_id {
            Some(workflow_id) => self.resolve_workflow(&mut conn, workflow_id, &submission, now).await?,
            None => (submission.priority, now),
        };

        let job = Job::new(submission, workflow_priority, workflow_datetime, now);
        let job_key = keys::job(&job.job_id.to_string());
        let fields = job.to_fields()?;

        let _: () = conn.hset_multiple(&job_key, &fields.into_iter().collect::<Vec<_>>()).await?;
        let _: () = conn.zadd(keys::PENDING, job.job_id.to_string(), job.score()).await?;

        self.publish(DomainEvent::JobSubmitted {
            job_id: job.job_id.to_string(),
            timestamp: now,
        });

        Ok(job)
    }

    async fn resolve_workflow(
        &self,
        conn: &mut ConnectionManager,
        workflow_id: &str,
        submission: &JobSubmission,
        now: DateTime<Utc>,
    ) -> BrokerResult<(i64, DateTime<Utc>)> {
        let meta_key = keys::workflow_metadata(workflow_id);
        let fields: HashMap<String, String> = conn.hgetall(&meta_key).await?;

        if let (Some(priority), Some(submitted_at)) =
            (fields.get("priority"), fields.get("submitted_at"))
        {
            let priority: i64 = priority.parse().map_err(|_| {
                BrokerError::InvalidRecord(format!("workflow {workflow_id} has non-numeric priority"))
            })?;
            let submitted_at_ms: i64 = submitted_at.parse().map_err(|_| {
                BrokerError::InvalidRecord(format!("workflow {workflow_id} has non-numeric submitted_at"))
            })?;
            let submitted_at = DateTime::from_timestamp_millis(submitted_at_ms).unwrap_or(now);
            return Ok((priority, submitted_at));
        }

        let priority = submission.priority;
        let entries = [
            ("priority", priority.to_string()),
            ("submitted_at", now.timestamp_millis().to_string()),
            ("status", "active".to_string()),
        ];
        let _: () = conn.hset_multiple(&meta_key, &entries).await?;
        let _: () = conn.expire(&meta_key, self.workflow_ttl_seconds as i64).await?;

        Ok((priority, now))
    }

    pub async fn get(&self, job_id: &str) -> BrokerResult<Job> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(keys::job(job_id)).await?;
        if fields.is_empty() {
            return Err(BrokerError::JobNotFound(job_id.to_string()));
        }
        Ok(Job::from_fields(&fields)?)
    }

    /// Atomic; returns `true` iff this caller won the claim.
    pub async fn claim(&self, job_id: &str, worker_id: &str) -> BrokerResult<bool> {
        let mut job = match self.get(job_id).await {
            Ok(job) => job,
            Err(BrokerError::JobNotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        if job.status != JobStatus::Pending {
            return Ok(false);
        }

        let now = Utc::now();
        job.status = JobStatus::Assigned;
        job.worker_id = Some(worker_id.to_string());
        job.assigned_at = Some(now);
        let job_json = serde_json::to_string(&job)?;

        let mut conn = self.conn.clone();
        let won: i32 = redis::Script::new(CLAIM_SCRIPT)
            .key(keys::PENDING)
            .key(keys::job(job_id))
            .key(keys::active(worker_id))
            .arg(job_id)
            .arg(worker_id)
            .arg(now.to_rfc3339())
            .arg(job_json)
            .invoke_async(&mut conn)
            .await?;

        if won == 1 {
            self.publish(DomainEvent::JobAssigned {
                job_id: job_id.to_string(),
                worker_id: worker_id.to_string(),
                timestamp: now,
            });
        }

        Ok(won == 1)
    }

    /// Peek the top-N pending jobs in score order, attempt claim on the
    /// first capability match; on a lost race, keep scanning.
    pub async fn next_for_worker(
        &self,
        worker_id: &str,
        capabilities: &WorkerCapabilities,
    ) -> BrokerResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let candidate_ids: Vec<String> = conn
            .zrevrange(keys::PENDING, 0, self.claim_scan_window as isize - 1)
            .await?;

        for job_id in candidate_ids {
            let job = match self.get(&job_id).await {
                Ok(job) => job,
                Err(BrokerError::JobNotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            if !worker_matches(&job, capabilities, worker_id) {
                continue;
            }

            if self.claim(&job_id, worker_id).await? {
                return self.get(&job_id).await.map(Some);
            }
        }

        Ok(None)
    }

    /// Resets the worker binding and re-inserts into pending at the job's
    /// original score.
    pub async fn release(&self, job_id: &str) -> BrokerResult<()> {
        let mut job = self.get(job_id).await?;
        let worker_id = job.worker_id.take();

        job.status = JobStatus::Pending;
        job.assigned_at = None;
        job.started_at = None;

        self.move_to_pending(&job, worker_id.as_deref()).await
    }

    async fn move_to_pending(&self, job: &Job, former_worker: Option<&str>) -> BrokerResult<()> {
        let mut conn = self.conn.clone();
        let fields = job.to_fields()?;
        let job_id = job.job_id.to_string();

        let _: () = conn.hset_multiple(keys::job(&job_id), &fields.into_iter().collect::<Vec<_>>()).await?;
        let _: () = conn.zadd(keys::PENDING, &job_id, job.score()).await?;

        if let Some(worker_id) = former_worker {
            let _: () = conn.hdel(keys::active(worker_id), &job_id).await?;
        }

        self.publish(DomainEvent::JobStatusChanged {
            job_id,
            status: job.status.as_str().to_string(),
            timestamp: Utc::now(),
        });

        Ok(())
    }

    /// Terminal transition; no-op if already completed.
    pub async fn complete(&self, job_id: &str, result: serde_json::Value) -> BrokerResult<()> {
        let mut job = self.get(job_id).await?;
        if job.status.is_terminal() {
            return Ok(());
        }

        let now = Utc::now();
        let worker_id = job.worker_id.clone();
        job.status = JobStatus::Completed;
        job.completed_at = Some(now);
        job.result = Some(result.clone());

        let mut conn = self.conn.clone();
        let fields = job.to_fields()?;
        let _: () = conn.hset_multiple(keys::job(job_id), &fields.into_iter().collect::<Vec<_>>()).await?;
        let _: () = conn.expire(keys::job(job_id), self.completed_ttl_seconds as i64).await?;
        let _: () = conn.hset(keys::COMPLETED, job_id, serde_json::to_string(&job)?).await?;
        let _: () = conn.expire(keys::COMPLETED, self.completed_ttl_seconds as i64).await?;
        if let Some(worker_id) = &worker_id {
            let _: () = conn.hdel(keys::active(worker_id), job_id).await?;
        }

        self.publish(DomainEvent::CompleteJob {
            job_id: job_id.to_string(),
            result: Some(result),
            timestamp: now,
        });

        Ok(())
    }

    /// If retryable, behaves like `release` but stamps `last_failed_worker`
    /// and keeps the same score; otherwise terminal. No-op on a cancelled job.
    pub async fn fail(&self, job_id: &str, error: String, can_retry: bool) -> BrokerResult<()> {
        let mut job = self.get(job_id).await?;
        if job.status == JobStatus::Cancelled {
            return Ok(());
        }

        let now = Utc::now();
        let former_worker = job.worker_id.clone();

        if can_retry && job.retry_count + 1 < job.max_retries {
            job.retry_count += 1;
            job.last_failed_worker = former_worker.clone();
            job.status = JobStatus::Pending;
            job.worker_id = None;
            job.assigned_at = None;
            job.started_at = None;
            job.error = Some(error);
            return self.move_to_pending(&job, former_worker.as_deref()).await;
        }

        job.status = JobStatus::Failed;
        job.failed_at = Some(now);
        job.error = Some(error.clone());

        let mut conn = self.conn.clone();
        let fields = job.to_fields()?;
        let _: () = conn.hset_multiple(keys::job(job_id), &fields.into_iter().collect::<Vec<_>>()).await?;
        let _: () = conn.expire(keys::job(job_id), self.failed_ttl_seconds as i64).await?;
        let _: () = conn.hset(keys::FAILED, job_id, serde_json::to_string(&job)?).await?;
        let _: () = conn.expire(keys::FAILED, self.failed_ttl_seconds as i64).await?;
        if let Some(worker_id) = &former_worker {
            let _: () = conn.hdel(keys::active(worker_id), job_id).await?;
        }

        self.publish(DomainEvent::JobFailed {
            job_id: job_id.to_string(),
            error,
            reason: None,
            timestamp: now,
        });

        Ok(())
    }

    /// Terminal. Idempotent: a no-op on an already-terminal job. If the job
    /// is currently on a worker, publishes `cancel_job` so the worker can
    /// abort; delivery is fire-and-forget.
    pub async fn cancel(&self, job_id: &str, reason: String) -> BrokerResult<()> {
        let mut job = self.get(job_id).await?;
        if job.status.is_terminal() {
            return Ok(());
        }

        let now = Utc::now();
        let worker_id = job.worker_id.clone();
        job.status = JobStatus::Cancelled;
        job.failed_at = Some(now);
        job.error = Some(reason.clone());

        let mut conn = self.conn.clone();
        let fields = job.to_fields()?;
        let _: () = conn.hset_multiple(keys::job(job_id), &fields.into_iter().collect::<Vec<_>>()).await?;
        let _: () = conn.zrem(keys::PENDING, job_id).await?;

        if let Some(worker_id) = &worker_id {
            let _: () = conn.hdel(keys::active(worker_id), job_id).await?;
            let payload = serde_json::json!({ "job_id": job_id, "reason": reason });
            let _: () = conn.publish(keys::channels::CANCEL_JOB, payload.to_string()).await?;
        }

        self.publish(DomainEvent::JobFailed {
            job_id: job_id.to_string(),
            error: reason,
            reason: Some("cancelled by user".to_string()),
            timestamp: now,
        });

        Ok(())
    }

    /// Moves a job from unworkable back to pending if a live capable worker
    /// now exists. `capable` is supplied by the caller (the Janitor already
    /// has the live worker set loaded).
    pub async fn requeue_unworkable(&self, job_id: &str, capable: bool) -> BrokerResult<bool> {
        if !capable {
            return Ok(false);
        }

        let mut conn = self.conn.clone();
        let removed: i32 = conn.zrem(keys::UNWORKABLE, job_id).await?;
        if removed == 0 {
            return Ok(false);
        }

        let mut job = self.get(job_id).await?;
        job.status = JobStatus::Pending;
        let score = score_for(job.workflow_priority, job.workflow_datetime);
        let job_fields = job.to_fields()?;
        let _: () = conn.hset_multiple(keys::job(job_id), &job_fields.into_iter().collect::<Vec<_>>()).await?;
        let _: () = conn.zadd(keys::PENDING, job_id, score).await?;

        Ok(true)
    }

    pub async fn list_pending(&self, limit: isize, offset: isize) -> BrokerResult<Vec<Job>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .zrevrange(keys::PENDING, offset, offset + limit - 1)
            .await?;
        self.hydrate(ids).await
    }

    /// Cursor/offset-paginated read across buckets. `status` narrows to one
    /// bucket; `None` reads pending (the common "what's in the queue" case).
    /// Never a full blocking scan: sorted-set buckets page via `ZREVRANGE`,
    /// hash buckets (completed/failed) via `HVALS` sliced in memory, which is
    /// bounded by each bucket's own TTL-driven size rather than unbounded.
    pub async fn list(
        &self,
        status: Option<JobStatus>,
        limit: isize,
        offset: isize,
    ) -> BrokerResult<(Vec<Job>, usize)> {
        let mut conn = self.conn.clone();
        match status {
            None | Some(JobStatus::Pending) => {
                let total: usize = conn.zcard(keys::PENDING).await?;
                let ids: Vec<String> = conn
                    .zrevrange(keys::PENDING, offset, offset + limit - 1)
                    .await?;
                Ok((self.hydrate(ids).await?, total))
            }
            Some(JobStatus::Completed) => {
                let raw: Vec<String> = conn.hvals(keys::COMPLETED).await?;
                Ok(page_snapshots(raw, limit, offset)?)
            }
            Some(JobStatus::Failed) => {
                let raw: Vec<String> = conn.hvals(keys::FAILED).await?;
                Ok(page_snapshots(raw, limit, offset)?)
            }
            Some(JobStatus::Unworkable) => {
                let total: usize = conn.zcard(keys::UNWORKABLE).await?;
                let ids: Vec<String> = conn
                    .zrevrange(keys::UNWORKABLE, offset, offset + limit - 1)
                    .await?;
                Ok((self.hydrate(ids).await?, total))
            }
            // Assigned/in-progress/cancelled jobs have no dedicated bucket
            // index (they live only in per-worker `active:<worker_id>`
            // hashes, or have already expired off the canonical hash); bulk
            // listing by these statuses is not supported, by design.
            Some(JobStatus::Assigned) | Some(JobStatus::InProgress) | Some(JobStatus::Cancelled) => {
                Ok((Vec::new(), 0))
            }
        }
    }

    /// Jobs currently assigned to any of `worker_ids`, read straight from
    /// each worker's own `jobs:active:<id>` hash — the same bucket
    /// `Janitor::recover_orphans` scans, since ASSIGNED/IN_PROGRESS jobs
    /// have no sorted-set index of their own.
    pub async fn list_active_for_workers(&self, worker_ids: &[String]) -> BrokerResult<Vec<Job>> {
        let mut conn = self.conn.clone();
        let mut jobs = Vec::new();
        for worker_id in worker_ids {
            let entries: HashMap<String, String> = conn.hgetall(keys::active(worker_id)).await?;
            for job_json in entries.values() {
                if let Ok(job) = serde_json::from_str::<Job>(job_json) {
                    jobs.push(job);
                }
            }
        }
        Ok(jobs)
    }

    async fn hydrate(&self, ids: Vec<String>) -> BrokerResult<Vec<Job>> {
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&id).await {
                Ok(job) => jobs.push(job),
                Err(BrokerError::JobNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(jobs)
    }

    pub fn raw_connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

/// Hash buckets store JSON snapshots, not ids, so pagination happens over
/// the already-fetched values rather than a second round trip per page.
fn page_snapshots(raw: Vec<String>, limit: isize, offset: isize) -> BrokerResult<(Vec<Job>, usize)> {
    let total = raw.len();
    let page = raw
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .map(|s| serde_json::from_str::<Job>(&s).map_err(BrokerError::from))
        .collect::<BrokerResult<Vec<Job>>>()?;
    Ok((page, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_is_clone_and_send() {
        fn assert_send<T: Send>() {}
        assert_send::<JobBroker>();
    }
}
