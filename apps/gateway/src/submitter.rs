//! The `(job_id -> client connection id)` submitter map.
//!
//! Process-local; the Admission Gateway inserts on submission, the Fanout
//! Router deletes on the job's terminal event. Both sides only ever touch
//! this type, never the connection registries directly.

use crate::connections::Namespace;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct SubmitterMap {
    bindings: Mutex<HashMap<String, (Namespace, String)>>,
}

impl SubmitterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, job_id: String, namespace: Namespace, connection_id: String) {
        self.bindings.lock().unwrap().insert(job_id, (namespace, connection_id));
    }

    pub fn lookup(&self, job_id: &str) -> Option<(Namespace, String)> {
        self.bindings.lock().unwrap().get(job_id).cloned()
    }

    pub fn remove(&self, job_id: &str) -> Option<(Namespace, String)> {
        self.bindings.lock().unwrap().remove(job_id)
    }
}
