//! Worker data model and the capability-match predicate used by
//! `next_for_worker`.

use crate::job::{Job, JobRequirements};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
    Error,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Busy => "BUSY",
            Self::Offline => "OFFLINE",
            Self::Error => "ERROR",
        }
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(Self::Idle),
            "BUSY" => Ok(Self::Busy),
            "OFFLINE" => Ok(Self::Offline),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unknown worker status: {other}")),
        }
    }
}

/// Either a fixed list of string values or the sentinel "all", which waives
/// the corresponding capability check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilitySet {
    All(AllSentinel),
    List(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllSentinel(String);

impl CapabilitySet {
    pub fn all() -> Self {
        Self::All(AllSentinel("all".to_string()))
    }

    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::All(_) => true,
            Self::List(items) => items.iter().any(|i| i == value),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareCapabilities {
    #[serde(default)]
    pub gpu_count: u32,
    #[serde(default)]
    pub gpu_memory_gb: f64,
    #[serde(default)]
    pub cpu_cores: u32,
    #[serde(default)]
    pub ram_gb: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationPolicy {
    Open,
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerAccess {
    #[serde(default = "default_isolation")]
    pub policy: IsolationPolicy,
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub denied: Vec<String>,
}

fn default_isolation() -> IsolationPolicy {
    IsolationPolicy::Open
}

impl Default for CustomerAccess {
    fn default() -> Self {
        Self {
            policy: IsolationPolicy::Open,
            allowed: Vec::new(),
            denied: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCapabilities {
    pub services: Vec<String>,
    #[serde(default = "CapabilitySet::all")]
    pub components: CapabilitySet,
    #[serde(default = "CapabilitySet::all")]
    pub workflows: CapabilitySet,
    #[serde(default)]
    pub hardware: HardwareCapabilities,
    /// Models supported per service name.
    #[serde(default)]
    pub models: std::collections::HashMap<String, Vec<String>>,
    #[serde(default)]
    pub customer_access: CustomerAccess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: String,
    pub capabilities: WorkerCapabilities,
    pub status: WorkerStatus,
    pub current_job_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub jobs_completed: u64,
    #[serde(default)]
    pub jobs_failed: u64,
}

impl Worker {
    pub fn new(worker_id: String, capabilities: WorkerCapabilities, now: DateTime<Utc>) -> Self {
        Self {
            worker_id,
            capabilities,
            status: WorkerStatus::Idle,
            current_job_id: None,
            connected_at: now,
            last_heartbeat: now,
            jobs_completed: 0,
            jobs_failed: 0,
        }
    }
}

/// Runs the eight sequential rejection rules from the worker-match
/// predicate. Returns `true` only if every rule passes.
pub fn matches(job: &Job, worker: &WorkerCapabilities, worker_id: &str) -> bool {
    // 1. avoid re-assigning to the worker that just failed this job
    if job.last_failed_worker.as_deref() == Some(worker_id) {
        return false;
    }

    // 2. the job's primary required service
    if !worker.services.iter().any(|s| s == &job.service_required) {
        return false;
    }

    let Some(req) = job.requirements.as_ref() else {
        return true;
    };

    // 3. explicit service_type override
    if let Some(service_type) = &req.service_type {
        if service_type != "all" && !worker.services.iter().any(|s| s == service_type) {
            return false;
        }
    }

    // 4. component constraint
    if let Some(component) = &req.component {
        if component != "all" && !worker.components.contains(component) {
            return false;
        }
    }

    // 5. workflow constraint
    if let Some(workflow) = &req.workflow {
        if workflow != "all" && !worker.workflows.contains(workflow) {
            return false;
        }
    }

    // 6. hardware minimums
    if !hardware_satisfies(req, &worker.hardware) {
        return false;
    }

    // 7. model subsumption for the required service
    if !req.models.is_empty() {
        let available = worker
            .models
            .get(&job.service_required)
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        if !req.models.iter().all(|m| available.iter().any(|a| a == m)) {
            return false;
        }
    }

    // 8. customer isolation
    if let Some(customer_id) = &job.customer_id {
        if worker.customer_access.policy == IsolationPolicy::Strict {
            let allowed = worker.customer_access.allowed.iter().any(|c| c == customer_id);
            let denied = worker.customer_access.denied.iter().any(|c| c == customer_id);
            if denied || !allowed {
                return false;
            }
        }
    }

    true
}

fn hardware_satisfies(req: &JobRequirements, hw: &HardwareCapabilities) -> bool {
    if let Some(min_gpu) = req.min_gpu_memory_gb {
        if hw.gpu_memory_gb < min_gpu {
            return false;
        }
    }
    if let Some(min_cpu) = req.min_cpu_cores {
        if hw.cpu_cores < min_cpu {
            return false;
        }
    }
    if let Some(min_ram) = req.min_ram_gb {
        if hw.ram_gb < min_ram {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobSubmission;
    use std::collections::HashMap;

    fn worker_caps(services: &[&str]) -> WorkerCapabilities {
        WorkerCapabilities {
            services: services.iter().map(|s| s.to_string()).collect(),
            components: CapabilitySet::all(),
            workflows: CapabilitySet::all(),
            hardware: HardwareCapabilities {
                gpu_count: 1,
                gpu_memory_gb: 24.0,
                cpu_cores: 16,
                ram_gb: 64.0,
            },
            models: HashMap::new(),
            customer_access: CustomerAccess::default(),
        }
    }

    fn job_with_service(service: &str) -> Job {
        Job::new(
            JobSubmission {
                service_required: service.to_string(),
                priority: 50,
                payload: serde_json::Value::Null,
                requirements: None,
                customer_id: None,
                max_retries: 3,
                workflow_id: None,
                step_number: None,
            },
            50,
            Utc::now(),
            Utc::now(),
        )
    }

    #[test]
    fn rejects_missing_service() {
        let job = job_with_service("gpu-inference");
        let worker = worker_caps(&["cpu-inference"]);
        assert!(!matches(&job, &worker, "w1"));
    }

    #[test]
    fn rejects_same_worker_that_just_failed_it() {
        let mut job = job_with_service("gpu-inference");
        job.last_failed_worker = Some("w1".to_string());
        let worker = worker_caps(&["gpu-inference"]);
        assert!(!matches(&job, &worker, "w1"));
        assert!(matches(&job, &worker, "w2"));
    }

    #[test]
    fn rejects_insufficient_hardware() {
        let mut job = job_with_service("gpu-inference");
        job.requirements = Some(JobRequirements {
            min_gpu_memory_gb: Some(48.0),
            ..Default::default()
        });
        let worker = worker_caps(&["gpu-inference"]);
        assert!(!matches(&job, &worker, "w1"));
    }

    #[test]
    fn strict_isolation_rejects_unlisted_customer() {
        let mut job = job_with_service("gpu-inference");
        job.customer_id = Some("acme".to_string());
        let mut worker = worker_caps(&["gpu-inference"]);
        worker.customer_access = CustomerAccess {
            policy: IsolationPolicy::Strict,
            allowed: vec!["globex".to_string()],
            denied: vec![],
        };
        assert!(!matches(&job, &worker, "w1"));
    }
}
