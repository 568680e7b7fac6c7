//! Job data model, status lifecycle, capability requirements, and the
//! queue score formula.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

/// A job's position in its lifecycle. Mutation is the Broker's exclusive
/// responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Unworkable,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Assigned => "ASSIGNED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Unworkable => "UNWORKABLE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "ASSIGNED" => Ok(Self::Assigned),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            "UNWORKABLE" => Ok(Self::Unworkable),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Capability constraints a job may impose on the worker that claims it.
/// A value of `"all"` (or an absent field) waives that particular check.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct JobRequirements {
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default)]
    pub min_gpu_memory_gb: Option<f64>,
    #[serde(default)]
    pub min_cpu_cores: Option<u32>,
    #[serde(default)]
    pub min_ram_gb: Option<f64>,
    #[serde(default)]
    pub models: Vec<String>,
}

/// Fields a client supplies at submission time.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobSubmission {
    pub service_required: String,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: Value,
    #[serde(default)]
    pub requirements: Option<JobRequirements>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub step_number: Option<u32>,
}

fn default_priority() -> i64 {
    50
}

fn default_max_retries() -> u32 {
    3
}

/// Full job record, as stored under `job:<job_id>`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Job {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub service_required: String,
    pub priority: i64,
    #[schema(value_type = Object)]
    pub payload: Value,
    pub requirements: Option<JobRequirements>,
    pub customer_id: Option<String>,
    pub max_retries: u32,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub workflow_id: Option<String>,
    pub workflow_priority: i64,
    pub workflow_datetime: DateTime<Utc>,
    pub step_number: Option<u32>,
    pub worker_id: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub last_failed_worker: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl Job {
    /// Builds a new pending job from a submission, having already resolved
    /// `workflow_priority`/`workflow_datetime` via workflow inheritance.
    pub fn new(
        submission: JobSubmission,
        workflow_priority: i64,
        workflow_datetime: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            status: JobStatus::Pending,
            service_required: submission.service_required,
            priority: submission.priority,
            payload: submission.payload,
            requirements: submission.requirements,
            customer_id: submission.customer_id,
            max_retries: submission.max_retries,
            retry_count: 0,
            created_at: now,
            workflow_id: submission.workflow_id,
            workflow_priority,
            workflow_datetime,
            step_number: submission.step_number,
            worker_id: None,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
            last_failed_worker: None,
            result: None,
            error: None,
        }
    }

    /// Queue score: `workflow_priority * 10^15 - floor(workflow_datetime_ms / 1000)`.
    ///
    /// The multiplier dominates the time term so priority always wins ties;
    /// subtracting the timestamp makes older jobs score higher at equal
    /// priority. Using `workflow_datetime` (not `created_at`) keeps every
    /// step of a workflow clustered at the workflow's original position.
    pub fn score(&self) -> f64 {
        score_for(self.workflow_priority, self.workflow_datetime)
    }

    pub fn to_fields(&self) -> Result<HashMap<String, String>, serde_json::Error> {
        record_to_fields(self)
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, serde_json::Error> {
        record_from_fields(fields)
    }
}

/// Score for a job with the given inherited priority and workflow time,
/// without requiring a fully materialized [`Job`].
pub fn score_for(workflow_priority: i64, workflow_datetime: DateTime<Utc>) -> f64 {
    const PRIORITY_MULTIPLIER: f64 = 1e15;
    let seconds = (workflow_datetime.timestamp_millis() / 1000) as f64;
    workflow_priority as f64 * PRIORITY_MULTIPLIER - seconds
}

/// Serializes a type to a flat hash map for a Redis hash, via JSON.
///
/// Every value is stored as its JSON-encoded text so one hash layout
/// works for scalar and nested fields alike without a second format.
pub fn record_to_fields<T: Serialize>(value: &T) -> Result<HashMap<String, String>, serde_json::Error> {
    let json = serde_json::to_value(value)?;
    let Value::Object(map) = json else {
        return Ok(HashMap::new());
    };
    let mut fields = HashMap::with_capacity(map.len());
    for (k, v) in map {
        let encoded = match v {
            Value::String(s) => s,
            other => other.to_string(),
        };
        fields.insert(k, encoded);
    }
    Ok(fields)
}

/// Inverse of [`record_to_fields`].
pub fn record_from_fields<T: for<'de> Deserialize<'de>>(
    fields: &HashMap<String, String>,
) -> Result<T, serde_json::Error> {
    let mut map = serde_json::Map::with_capacity(fields.len());
    for (k, v) in fields {
        let value = serde_json::from_str(v).unwrap_or_else(|_| Value::String(v.clone()));
        map.insert(k.clone(), value);
    }
    serde_json::from_value(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn priority_dominates_time() {
        let t_low_priority_old = Utc.timestamp_opt(0, 0).unwrap();
        let t_high_priority_new = Utc.timestamp_opt(1_000_000, 0).unwrap();

        let low = score_for(10, t_low_priority_old);
        let high = score_for(50, t_high_priority_new);

        assert!(high > low, "higher priority must outrank older low-priority job");
    }

    #[test]
    fn older_job_wins_at_equal_priority() {
        let older = Utc.timestamp_opt(0, 0).unwrap();
        let newer = Utc.timestamp_opt(60, 0).unwrap();

        assert!(score_for(50, older) > score_for(50, newer));
    }

    #[test]
    fn roundtrips_through_fields() {
        let job = Job::new(
            JobSubmission {
                service_required: "gpu-inference".into(),
                priority: 42,
                payload: serde_json::json!({"k": "v"}),
                requirements: None,
                customer_id: Some("cust-1".into()),
                max_retries: 3,
                workflow_id: None,
                step_number: None,
            },
            42,
            Utc::now(),
            Utc::now(),
        );

        let fields = job.to_fields().unwrap();
        let restored = Job::from_fields(&fields).unwrap();

        assert_eq!(restored.job_id, job.job_id);
        assert_eq!(restored.service_required, job.service_required);
        assert_eq!(restored.status, JobStatus::Pending);
    }
}
