//! Job Broker — the distributed job-queue orchestrator's core.
//!
//! This crate owns:
//! - the job and worker data model and the workflow-aware priority score
//! - the atomic claim protocol between workers and the queue
//! - the Worker Registry (heartbeat TTL is truth, status is cached)
//! - the typed domain-event bus that decouples backend state changes from
//!   the connections that fan them out
//! - the Janitor (orphan recovery, worker reset, unworkable marking, stale
//!   age cleanup)
//!
//! # Example
//!
//! ```ignore
//! use broker::{BrokerConfig, JobBroker, JobSubmission};
//! use tokio::sync::broadcast;
//!
//! let (tx, _rx) = broadcast::channel(1024);
//! let broker = JobBroker::new(conn, tx, &BrokerConfig::default());
//! let job = broker.submit(submission).await?;
//! ```

mod broker;
mod config;
mod error;
mod event;
mod event_bus;
mod janitor;
mod job;
mod keys;
mod registry;
mod worker;

pub use broker::JobBroker;
pub use config::BrokerConfig;
pub use error::{BrokerError, BrokerResult, ErrorCategory};
pub use event::DomainEvent;
pub use event_bus::EventBus;
pub use janitor::{CleanupReport, CleanupRequest, Janitor};
pub use job::{
    record_from_fields, record_to_fields, score_for, Job, JobRequirements, JobStatus, JobSubmission,
};
pub use registry::WorkerRegistry;
pub use worker::{
    matches, CapabilitySet, CustomerAccess, HardwareCapabilities, IsolationPolicy, Worker,
    WorkerCapabilities, WorkerStatus,
};

pub mod channels {
    pub use crate::keys::channels::*;
}
