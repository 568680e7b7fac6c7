//! Connection Multiplexer: process-local registries for the three
//! WebSocket namespaces and for SSE progress subscriptions.
//!
//! Locked iteration over a sharded-by-kind map, per the orchestrator's
//! concurrency model: each registry is mutated by its own accept/close path
//! and read by the Fanout Router during event delivery. A connection whose
//! send fails is dropped from its registry rather than blocking its siblings.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One fanned-out frame, pre-serialized so the router never blocks on a
/// slow consumer's own JSON encoding.
pub type Frame = String;

struct Monitor {
    sender: mpsc::UnboundedSender<Frame>,
    subscribed_topics: HashSet<String>,
}

struct Subscriber {
    sender: mpsc::UnboundedSender<Frame>,
    subscribed_jobs: HashSet<String>,
}

struct SseConn {
    sender: mpsc::UnboundedSender<Frame>,
    job_id: String,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    monitors: Mutex<HashMap<String, Monitor>>,
    clients: Mutex<HashMap<String, Subscriber>>,
    legacy: Mutex<HashMap<String, Subscriber>>,
    sse: Mutex<HashMap<Uuid, SseConn>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_monitor(&self, monitor_id: String) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.monitors.lock().unwrap().insert(
            monitor_id,
            Monitor {
                sender: tx,
                subscribed_topics: HashSet::new(),
            },
        );
        rx
    }

    pub fn set_monitor_topics(&self, monitor_id: &str, topics: HashSet<String>) {
        if let Some(monitor) = self.monitors.lock().unwrap().get_mut(monitor_id) {
            monitor.subscribed_topics = topics;
        }
    }

    pub fn remove_monitor(&self, monitor_id: &str) {
        self.monitors.lock().unwrap().remove(monitor_id);
    }

    pub fn register_client(&self, client_id: String) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.lock().unwrap().insert(
            client_id,
            Subscriber {
                sender: tx,
                subscribed_jobs: HashSet::new(),
            },
        );
        rx
    }

    pub fn remove_client(&self, client_id: &str) {
        self.clients.lock().unwrap().remove(client_id);
    }

    pub fn register_legacy(&self, connection_id: String) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.legacy.lock().unwrap().insert(
            connection_id,
            Subscriber {
                sender: tx,
                subscribed_jobs: HashSet::new(),
            },
        );
        rx
    }

    pub fn remove_legacy(&self, connection_id: &str) {
        self.legacy.lock().unwrap().remove(connection_id);
    }

    pub fn subscribe_job(&self, namespace: Namespace, connection_id: &str, job_id: &str) {
        let table = self.table_for(namespace);
        if let Some(conn) = table.lock().unwrap().get_mut(connection_id) {
            conn.subscribed_jobs.insert(job_id.to_string());
        }
    }

    pub fn unsubscribe_job(&self, namespace: Namespace, connection_id: &str, job_id: &str) {
        let table = self.table_for(namespace);
        if let Some(conn) = table.lock().unwrap().get_mut(connection_id) {
            conn.subscribed_jobs.remove(job_id);
        }
    }

    fn table_for(&self, namespace: Namespace) -> &Mutex<HashMap<String, Subscriber>> {
        match namespace {
            Namespace::Client => &self.clients,
            Namespace::Legacy => &self.legacy,
        }
    }

    pub fn register_sse(&self, job_id: String) -> (Uuid, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.sse.lock().unwrap().insert(id, SseConn { sender: tx, job_id });
        (id, rx)
    }

    pub fn remove_sse(&self, id: Uuid) {
        self.sse.lock().unwrap().remove(&id);
    }

    /// Sends `frame` to a single monitor by id, dropping it if the send fails.
    pub fn send_to_monitor(&self, monitor_id: &str, frame: Frame) {
        let dead = matches!(
            self.monitors.lock().unwrap().get(monitor_id).map(|m| m.sender.send(frame)),
            Some(Err(_))
        );
        if dead {
            self.monitors.lock().unwrap().remove(monitor_id);
        }
    }

    /// Sends `frame` to every monitor whose topic filter matches
    /// `event_type`, dropping any connection whose send fails.
    pub fn broadcast_to_monitors(&self, event_type: &str, frame: Frame) {
        let mut dead = Vec::new();
        {
            let monitors = self.monitors.lock().unwrap();
            for (id, monitor) in monitors.iter() {
                if !topic_matches(&monitor.subscribed_topics, event_type) {
                    continue;
                }
                if monitor.sender.send(frame.clone()).is_err() {
                    dead.push(id.clone());
                }
            }
        }
        if !dead.is_empty() {
            let mut monitors = self.monitors.lock().unwrap();
            for id in dead {
                monitors.remove(&id);
            }
        }
    }

    /// Sends `frame` to every client/legacy connection subscribed to
    /// `job_id`, dropping dead connections.
    pub fn send_to_job_subscribers(&self, namespace: Namespace, job_id: &str, frame: Frame) {
        let table = self.table_for(namespace);
        let mut dead = Vec::new();
        {
            let conns = table.lock().unwrap();
            for (id, conn) in conns.iter() {
                if !conn.subscribed_jobs.contains(job_id) {
                    continue;
                }
                if conn.sender.send(frame.clone()).is_err() {
                    dead.push(id.clone());
                }
            }
        }
        if !dead.is_empty() {
            let mut conns = table.lock().unwrap();
            for id in dead {
                conns.remove(&id);
            }
        }
    }

    pub fn send_to_connection(&self, namespace: Namespace, connection_id: &str, frame: Frame) {
        let table = self.table_for(namespace);
        let dead = matches!(
            table.lock().unwrap().get(connection_id).map(|c| c.sender.send(frame)),
            Some(Err(_))
        );
        if dead {
            table.lock().unwrap().remove(connection_id);
        }
    }

    /// Fans `frame` out to every SSE connection bound to `job_id`. When
    /// `terminal` is set, the connection is also dropped from the registry
    /// so the writer task ends the response and closes.
    pub fn send_to_sse(&self, job_id: &str, frame: Frame, terminal: bool) {
        let mut to_remove = Vec::new();
        {
            let sse = self.sse.lock().unwrap();
            for (id, conn) in sse.iter() {
                if conn.job_id != job_id {
                    continue;
                }
                let _ = conn.sender.send(frame.clone());
                if terminal {
                    to_remove.push(*id);
                }
            }
        }
        if !to_remove.is_empty() {
            let mut sse = self.sse.lock().unwrap();
            for id in to_remove {
                sse.remove(&id);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Client,
    Legacy,
}

/// Empty topic set means "all events"; otherwise matches on the literal
/// `"jobs"` or on `jobs:<event-type-tail>` (e.g. `jobs:progress` for
/// `update_job_progress`, derived from the part of the type name after the
/// first underscore-delimited verb).
fn topic_matches(topics: &HashSet<String>, event_type: &str) -> bool {
    if topics.is_empty() {
        return true;
    }
    if topics.contains("jobs") {
        return true;
    }
    let suffix = event_type.split_once('_').map(|(_, rest)| rest).unwrap_or(event_type);
    topics.contains(&format!("jobs:{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_topic_set_matches_everything() {
        assert!(topic_matches(&HashSet::new(), "job_submitted"));
    }

    #[test]
    fn jobs_literal_matches_any_event() {
        let topics: HashSet<String> = ["jobs".to_string()].into_iter().collect();
        assert!(topic_matches(&topics, "worker_status_changed"));
    }

    #[test]
    fn suffix_topic_matches_only_its_event() {
        let topics: HashSet<String> = ["jobs:submitted".to_string()].into_iter().collect();
        assert!(topic_matches(&topics, "job_submitted"));
        assert!(!topic_matches(&topics, "job_failed"));
    }
}
