//! Broker configuration.

use core_config::{env_or_default, ConfigError, FromEnv};

/// Configuration for the Job Broker, Worker Registry, and Janitor.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// TTL (seconds) on a worker's heartbeat key. Absence means offline.
    pub heartbeat_ttl_seconds: u64,

    /// How often the Janitor sweeps for orphans, unworkable jobs, and stale age.
    pub janitor_interval_seconds: u64,

    /// Default `max_job_age_minutes` used by the Janitor's stale-age task
    /// when a `POST /api/cleanup` request does not override it.
    pub default_max_job_age_minutes: u64,

    /// Number of top-scored pending jobs `next_for_worker` scans per attempt.
    pub claim_scan_window: usize,

    /// TTL (seconds) on completed jobs.
    pub completed_ttl_seconds: u64,

    /// TTL (seconds) on failed jobs.
    pub failed_ttl_seconds: u64,

    /// TTL (seconds) on workflow metadata.
    pub workflow_ttl_seconds: u64,
}

impl BrokerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_heartbeat_ttl_seconds(mut self, seconds: u64) -> Self {
        self.heartbeat_ttl_seconds = seconds;
        self
    }

    pub fn with_janitor_interval_seconds(mut self, seconds: u64) -> Self {
        self.janitor_interval_seconds = seconds;
        self
    }

    pub fn with_claim_scan_window(mut self, window: usize) -> Self {
        self.claim_scan_window = window.max(1);
        self
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            heartbeat_ttl_seconds: 60,
            janitor_interval_seconds: 30,
            default_max_job_age_minutes: 60,
            claim_scan_window: 15,
            completed_ttl_seconds: 24 * 3600,
            failed_ttl_seconds: 7 * 24 * 3600,
            workflow_ttl_seconds: 24 * 3600,
        }
    }
}

fn parse_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    env_or_default(key, &default.to_string())
        .parse()
        .map_err(|e| ConfigError::ParseError {
            key: key.to_string(),
            details: format!("{e}"),
        })
}

impl FromEnv for BrokerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            heartbeat_ttl_seconds: parse_env("HEARTBEAT_TTL_SECONDS", 60)?,
            janitor_interval_seconds: parse_env("JANITOR_INTERVAL_SECONDS", 30)?,
            default_max_job_age_minutes: parse_env("MAX_JOB_AGE_MINUTES", 60)?,
            claim_scan_window: parse_env("CLAIM_SCAN_WINDOW", 15)? as usize,
            completed_ttl_seconds: parse_env("COMPLETED_TTL_SECONDS", 24 * 3600)?,
            failed_ttl_seconds: parse_env("FAILED_TTL_SECONDS", 7 * 24 * 3600)?,
            workflow_ttl_seconds: parse_env("WORKFLOW_TTL_SECONDS", 24 * 3600)?,
        })
    }
}
