//! Periodic and on-demand cleanup: orphan detection, worker reset,
//! unworkable marking, stale-age cleanup.

use crate::broker::JobBroker;
use crate::error::BrokerResult;
use crate::job::{score_for, Job, JobStatus};
use crate::keys;
use crate::registry::WorkerRegistry;
use crate::worker::{matches as worker_matches, WorkerStatus};
use chrono::Utc;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct CleanupRequest {
    pub reset_workers: bool,
    pub cleanup_orphaned_jobs: bool,
    pub reset_specific_worker: Option<String>,
    pub max_job_age_minutes: Option<u64>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CleanupReport {
    pub orphans_recovered: u64,
    pub workers_reset: u64,
    pub jobs_marked_unworkable: u64,
    pub stale_jobs_released: u64,
}

pub struct Janitor {
    broker: JobBroker,
    registry: WorkerRegistry,
    default_max_job_age_minutes: u64,
}

impl Janitor {
    pub fn new(broker: JobBroker, registry: WorkerRegistry, default_max_job_age_minutes: u64) -> Self {
        Self {
            broker,
            registry,
            default_max_job_age_minutes,
        }
    }

    /// Spawns the periodic sweep; returns the join handle so callers can
    /// await it during shutdown if they want to.
    pub fn spawn_periodic(self: std::sync::Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match self.run(CleanupRequest {
                    reset_workers: false,
                    cleanup_orphaned_jobs: true,
                    reset_specific_worker: None,
                    max_job_age_minutes: None,
                }).await {
                    Ok(report) => info!(?report, "janitor sweep complete"),
                    Err(e) => warn!(error = %e, "janitor sweep failed"),
                }
            }
        })
    }

    pub async fn run(&self, request: CleanupRequest) -> BrokerResult<CleanupReport> {
        let mut report = CleanupReport::default();

        if let Some(worker_id) = &request.reset_specific_worker {
            self.reset_worker(worker_id, &mut report).await?;
        }

        if request.reset_workers {
            let active = self.registry.list_active().await?;
            for worker in active {
                self.reset_worker(&worker.worker_id, &mut report).await?;
            }
        }

        if request.cleanup_orphaned_jobs {
            self.recover_orphans(&mut report).await?;
        }

        self.mark_unworkable(&mut report).await?;

        let max_age = request
            .max_job_age_minutes
            .unwrap_or(self.default_max_job_age_minutes);
        self.release_stale(max_age, &mut report).await?;

        Ok(report)
    }

    /// Task 1: for each active:<worker_id> bucket, if the worker's
    /// heartbeat has expired, move its jobs back to pending at their
    /// original score and clear the bucket.
    async fn recover_orphans(&self, report: &mut CleanupReport) -> BrokerResult<()> {
        let mut conn = self.broker.raw_connection();
        let worker_ids: Vec<String> = conn.smembers(keys::WORKERS_ACTIVE).await?;

        for worker_id in worker_ids {
            if self.registry.is_active(&worker_id).await? {
                continue;
            }

            let bucket_key = keys::active(&worker_id);
            let entries: HashMap<String, String> = conn.hgetall(&bucket_key).await?;
            for (job_id, job_json) in entries {
                let Ok(mut job) = serde_json::from_str::<Job>(&job_json) else {
                    continue;
                };
                job.status = JobStatus::Pending;
                job.worker_id = None;
                job.assigned_at = None;
                job.started_at = None;

                let score = score_for(job.workflow_priority, job.workflow_datetime);
                let fields = job.to_fields().unwrap_or_default();
                let _: () = conn.hset_multiple(keys::job(&job_id), &fields.into_iter().collect::<Vec<_>>()).await?;
                let _: () = conn.zadd(keys::PENDING, &job_id, score).await?;
                report.orphans_recovered += 1;
            }
            let _: () = conn.del(&bucket_key).await?;
        }

        Ok(())
    }

    /// Task 2: mark a specific worker IDLE, release its active jobs via the
    /// same orphan logic, and clear its current_job_id.
    async fn reset_worker(&self, worker_id: &str, report: &mut CleanupReport) -> BrokerResult<()> {
        let mut conn = self.broker.raw_connection();
        let bucket_key = keys::active(worker_id);
        let entries: HashMap<String, String> = conn.hgetall(&bucket_key).await?;

        for (job_id, job_json) in entries {
            let Ok(mut job) = serde_json::from_str::<Job>(&job_json) else {
                continue;
            };
            job.status = JobStatus::Pending;
            job.worker_id = None;
            job.assigned_at = None;
            job.started_at = None;

            let score = score_for(job.workflow_priority, job.workflow_datetime);
            let fields = job.to_fields().unwrap_or_default();
            let _: () = conn.hset_multiple(keys::job(&job_id), &fields.into_iter().collect::<Vec<_>>()).await?;
            let _: () = conn.zadd(keys::PENDING, &job_id, score).await?;
            report.orphans_recovered += 1;
        }
        let _: () = conn.del(&bucket_key).await?;

        self.registry
            .update_status(worker_id, WorkerStatus::Idle, None)
            .await?;
        report.workers_reset += 1;

        Ok(())
    }

    /// Task 3: scan pending; if no live worker satisfies a job's
    /// requirements, move it to unworkable, preserving its score.
    async fn mark_unworkable(&self, report: &mut CleanupReport) -> BrokerResult<()> {
        let active_workers = self.registry.list_active().await?;
        let mut conn = self.broker.raw_connection();

        let pending_ids: Vec<(String, f64)> = conn.zrange_withscores(keys::PENDING, 0, -1).await?;

        for (job_id, score) in pending_ids {
            let job = match self.broker.get(&job_id).await {
                Ok(job) => job,
                Err(_) => continue,
            };

            let has_capable_worker = active_workers
                .iter()
                .any(|w| worker_matches(&job, &w.capabilities, &w.worker_id));

            if !has_capable_worker {
                let removed: i32 = conn.zrem(keys::PENDING, &job_id).await?;
                if removed == 1 {
                    let _: () = conn.zadd(keys::UNWORKABLE, &job_id, score).await?;
                    let _: () = conn
                        .hset(keys::job(&job_id), "status", JobStatus::Unworkable.as_str())
                        .await?;
                    report.jobs_marked_unworkable += 1;
                }
            }
        }

        Ok(())
    }

    /// Task 4: jobs in ACTIVE/ASSIGNED whose `max(started_at, assigned_at)`
    /// is older than `max_job_age_minutes` and whose worker is not
    /// heartbeating are released back to pending.
    async fn release_stale(&self, max_job_age_minutes: u64, report: &mut CleanupReport) -> BrokerResult<()> {
        let mut conn = self.broker.raw_connection();
        let worker_ids: Vec<String> = conn.smembers(keys::WORKERS_ACTIVE).await?;
        let cutoff = Utc::now() - chrono::Duration::minutes(max_job_age_minutes as i64);

        for worker_id in worker_ids {
            let bucket_key = keys::active(&worker_id);
            let entries: HashMap<String, String> = conn.hgetall(&bucket_key).await?;

            for (job_id, job_json) in entries {
                let Ok(job) = serde_json::from_str::<Job>(&job_json) else {
                    continue;
                };
                let reference_time = job.started_at.or(job.assigned_at);
                let Some(reference_time) = reference_time else {
                    continue;
                };
                if reference_time >= cutoff {
                    continue;
                }
                if self.registry.is_active(&worker_id).await? {
                    continue;
                }

                self.broker.release(&job_id).await?;
                report.stale_jobs_released += 1;
            }
        }

        Ok(())
    }
}
