//! Connection management for the store backing the job queue.
//!
//! The orchestrator has exactly one durable dependency: Redis, used as a
//! key/value + sorted-set + pub/sub primitive store. `common` holds the
//! error and retry types shared by any future store adapter.
//!
//! # Example
//!
//! ```ignore
//! use database::redis;
//!
//! let conn = redis::connect("redis://127.0.0.1:6379").await?;
//! ```

pub mod common;
pub mod redis;

pub use common::{DatabaseError, DatabaseResult};
