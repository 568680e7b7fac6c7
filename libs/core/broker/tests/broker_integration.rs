//! Integration coverage against a real Redis container: submit → claim →
//! complete, capability-based rejection, and janitor orphan recovery.

use broker::{BrokerConfig, CapabilitySet, CleanupRequest, HardwareCapabilities, Janitor, JobBroker, JobStatus, JobSubmission, Worker, WorkerCapabilities, WorkerRegistry};
use redis::aio::ConnectionManager;
use redis::Client;
use test_utils::TestRedis;

async fn connection_manager(redis: &TestRedis) -> ConnectionManager {
    let client = Client::open(redis.connection_string.clone()).expect("valid redis url");
    ConnectionManager::new(client).await.expect("connect")
}

fn capabilities(services: &[&str]) -> WorkerCapabilities {
    WorkerCapabilities {
        services: services.iter().map(|s| s.to_string()).collect(),
        components: CapabilitySet::all(),
        workflows: CapabilitySet::all(),
        hardware: HardwareCapabilities::default(),
        models: Default::default(),
        customer_access: Default::default(),
    }
}

fn submission(service: &str) -> JobSubmission {
    JobSubmission {
        service_required: service.to_string(),
        priority: 50,
        payload: serde_json::json!({"task": "noop"}),
        requirements: None,
        customer_id: None,
        max_retries: 3,
        workflow_id: None,
        step_number: None,
    }
}

#[tokio::test]
async fn submit_claim_complete_round_trip() {
    let redis = TestRedis::new().await;
    let conn = connection_manager(&redis).await;
    let (tx, _rx) = tokio::sync::broadcast::channel(16);
    let broker = JobBroker::new(conn, tx, &BrokerConfig::default());

    let job = broker.submit(submission("gpu-inference")).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let claimed = broker.claim(&job.job_id.to_string(), "worker-1").await.unwrap();
    assert!(claimed);

    let reread = broker.get(&job.job_id.to_string()).await.unwrap();
    assert_eq!(reread.status, JobStatus::Assigned);
    assert_eq!(reread.worker_id.as_deref(), Some("worker-1"));

    broker
        .complete(&job.job_id.to_string(), serde_json::json!({"ok": true}))
        .await
        .unwrap();

    let (completed, total) = broker.list(Some(JobStatus::Completed), 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(completed[0].job_id, job.job_id);
}

#[tokio::test]
async fn next_for_worker_skips_jobs_outside_capability() {
    let redis = TestRedis::new().await;
    let conn = connection_manager(&redis).await;
    let (tx, _rx) = tokio::sync::broadcast::channel(16);
    let broker = JobBroker::new(conn, tx, &BrokerConfig::default());

    broker.submit(submission("cpu-transcode")).await.unwrap();

    let gpu_only = capabilities(&["gpu-inference"]);
    assert!(broker.next_for_worker("worker-gpu", &gpu_only).await.unwrap().is_none());

    let cpu_worker = capabilities(&["cpu-transcode"]);
    let job = broker.next_for_worker("worker-cpu", &cpu_worker).await.unwrap();
    assert!(job.is_some());
}

#[tokio::test]
async fn janitor_recovers_orphaned_assigned_job() {
    let redis = TestRedis::new().await;
    let conn = connection_manager(&redis).await;
    let (tx, _rx) = tokio::sync::broadcast::channel(16);
    let broker = JobBroker::new(conn.clone(), tx.clone(), &BrokerConfig::default());
    let registry = WorkerRegistry::new(conn, tx, 1);

    let caps = capabilities(&["gpu-inference"]);
    let worker: Worker = registry.register("ghost-worker".to_string(), caps).await.unwrap();
    assert_eq!(worker.worker_id, "ghost-worker");

    let job = broker.submit(submission("gpu-inference")).await.unwrap();
    broker.claim(&job.job_id.to_string(), "ghost-worker").await.unwrap();

    // Let the heartbeat TTL expire without ever sending one, simulating a
    // worker that vanished mid-job.
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let janitor = Janitor::new(broker.clone(), registry, 60);
    let report = janitor
        .run(CleanupRequest {
            reset_workers: false,
            cleanup_orphaned_jobs: true,
            reset_specific_worker: None,
            max_job_age_minutes: None,
        })
        .await
        .unwrap();

    assert_eq!(report.orphans_recovered, 1);

    let recovered = broker.get(&job.job_id.to_string()).await.unwrap();
    assert_eq!(recovered.status, JobStatus::Pending);
}
