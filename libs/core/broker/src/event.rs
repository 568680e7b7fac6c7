//! The domain event sum type that replaces ad hoc pub/sub payloads.
//!
//! The Event Bus is the single inbound boundary for state changes coming
//! from workers; it translates raw backend pub/sub messages and keyspace
//! notifications into one of these variants and pushes them onto a
//! broadcast channel. Everything downstream (Fanout Router, SSE writers)
//! only ever sees this type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum DomainEvent {
    JobSubmitted {
        job_id: String,
        timestamp: DateTime<Utc>,
    },
    JobAssigned {
        job_id: String,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    JobStatusChanged {
        job_id: String,
        status: String,
        timestamp: DateTime<Utc>,
    },
    UpdateJobProgress {
        job_id: String,
        progress: Value,
        timestamp: DateTime<Utc>,
    },
    CompleteJob {
        job_id: String,
        result: Option<Value>,
        timestamp: DateTime<Utc>,
    },
    JobFailed {
        job_id: String,
        error: String,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    WorkerStatusChanged {
        worker_id: String,
        old_status: String,
        new_status: String,
        current_job_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    MachineStartup {
        worker_id: String,
        stage: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// The event type discriminator as it appears on the wire, e.g.
    /// `"update_job_progress"`. Used by the Fanout Router's topic filter.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::JobSubmitted { .. } => "job_submitted",
            Self::JobAssigned { .. } => "job_assigned",
            Self::JobStatusChanged { .. } => "job_status_changed",
            Self::UpdateJobProgress { .. } => "update_job_progress",
            Self::CompleteJob { .. } => "complete_job",
            Self::JobFailed { .. } => "job_failed",
            Self::WorkerStatusChanged { .. } => "worker_status_changed",
            Self::MachineStartup { .. } => "machine_startup",
        }
    }

    /// The job id this event concerns, if any. Used to route events to
    /// submitter bindings and SSE subscriptions.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::JobSubmitted { job_id, .. }
            | Self::JobAssigned { job_id, .. }
            | Self::JobStatusChanged { job_id, .. }
            | Self::UpdateJobProgress { job_id, .. }
            | Self::CompleteJob { job_id, .. }
            | Self::JobFailed { job_id, .. } => Some(job_id),
            Self::WorkerStatusChanged { .. } | Self::MachineStartup { .. } => None,
        }
    }

    pub fn is_terminal_for_job(&self) -> bool {
        matches!(self, Self::CompleteJob { .. } | Self::JobFailed { .. })
    }
}
