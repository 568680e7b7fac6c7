//! Shared application state passed to every request handler.

use crate::config::Config;
use crate::connections::ConnectionRegistry;
use crate::submitter::SubmitterMap;
use axum_helpers::ShutdownCoordinator;
use broker::{JobBroker, Janitor, WorkerRegistry};
use std::sync::Arc;

/// Cloned for each handler (an `Arc`/cheap-clone bundle), giving access to
/// the Broker, the Worker Registry, and the process-local connection state
/// the Connection Multiplexer and Fanout Router read and write.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub broker: JobBroker,
    pub registry: WorkerRegistry,
    pub janitor: Arc<Janitor>,
    pub connections: Arc<ConnectionRegistry>,
    pub submitters: Arc<SubmitterMap>,
    pub shutdown: ShutdownCoordinator,
}
