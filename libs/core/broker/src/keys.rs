//! Store key layout. This is the wire contract with Redis; every key name
//! used anywhere in the broker is minted here so the layout stays in one place.

pub fn job(job_id: &str) -> String {
    format!("job:{job_id}")
}

pub const PENDING: &str = "jobs:pending";

pub fn active(worker_id: &str) -> String {
    format!("jobs:active:{worker_id}")
}

pub const COMPLETED: &str = "jobs:completed";
pub const FAILED: &str = "jobs:failed";
pub const UNWORKABLE: &str = "jobs:unworkable";

pub fn worker(worker_id: &str) -> String {
    format!("worker:{worker_id}")
}

pub fn worker_heartbeat(worker_id: &str) -> String {
    format!("worker:{worker_id}:heartbeat")
}

pub const WORKERS_ACTIVE: &str = "workers:active";
pub const WORKERS_OFFLINE: &str = "workers:offline";

pub fn workflow_metadata(workflow_id: &str) -> String {
    format!("workflow:{workflow_id}:metadata")
}

pub mod channels {
    pub const UPDATE_JOB_PROGRESS: &str = "update_job_progress";
    pub const WORKER_STATUS: &str = "worker_status";
    pub const COMPLETE_JOB: &str = "complete_job";
    pub const MACHINE_STARTUP_EVENTS: &str = "machine:startup:events";
    pub const CANCEL_JOB: &str = "cancel_job";
}
