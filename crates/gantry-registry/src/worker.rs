//! Worker membership records
//!
//! TigerStyle: Explicit worker lifecycle with last-seen staleness.

use gantry_core::message::AgentTypeManifest;
use gantry_core::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Information about a connected worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Unique worker identifier
    pub worker_id: WorkerId,
    /// Agent types this worker can host
    pub supported_types: HashSet<String>,
    /// Event types each supported agent type declares a handler for
    pub handled_events: HashMap<String, HashSet<String>>,
    /// Time when the worker registered (Unix timestamp ms)
    pub joined_at_ms: u64,
    /// Time of the last frame seen from this worker (Unix timestamp ms)
    pub last_seen_ms: u64,
}

impl WorkerInfo {
    /// Create a worker record with a specific timestamp
    pub fn with_timestamp(worker_id: WorkerId, timestamp_ms: u64) -> Self {
        Self {
            worker_id,
            supported_types: HashSet::new(),
            handled_events: HashMap::new(),
            joined_at_ms: timestamp_ms,
            last_seen_ms: timestamp_ms,
        }
    }

    /// Record the agent type described by a manifest
    ///
    /// Re-applying the same manifest is a no-op.
    pub fn apply_manifest(&mut self, manifest: &AgentTypeManifest) {
        self.supported_types.insert(manifest.agent_type.clone());
        let events = self
            .handled_events
            .entry(manifest.agent_type.clone())
            .or_default();
        for event_type in &manifest.handled_events {
            events.insert(event_type.clone());
        }
    }

    /// Forget an agent type
    pub fn remove_type(&mut self, agent_type: &str) {
        self.supported_types.remove(agent_type);
        self.handled_events.remove(agent_type);
    }

    /// Refresh the last-seen timestamp
    ///
    /// Older timestamps are ignored so out-of-order observations cannot
    /// rewind liveness.
    pub fn touch(&mut self, timestamp_ms: u64) {
        if timestamp_ms >= self.last_seen_ms {
            self.last_seen_ms = timestamp_ms;
        }
    }

    /// Check whether this worker has been silent past the timeout
    pub fn is_stale(&self, now_ms: u64, timeout_ms: u64) -> bool {
        debug_assert!(timeout_ms > 0);
        now_ms.saturating_sub(self.last_seen_ms) > timeout_ms
    }

    /// Check whether an agent type on this worker handles an event type
    pub fn handles_event(&self, agent_type: &str, event_type: &str) -> bool {
        self.handled_events
            .get(agent_type)
            .map(|events| events.contains(event_type))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_worker_id(n: u32) -> WorkerId {
        WorkerId::new(format!("worker-{}", n)).unwrap()
    }

    #[test]
    fn test_apply_manifest_idempotent() {
        let mut info = WorkerInfo::with_timestamp(test_worker_id(1), 1000);
        let manifest = AgentTypeManifest::new("auditor").with_handled_event("created");

        info.apply_manifest(&manifest);
        info.apply_manifest(&manifest);

        assert_eq!(info.supported_types.len(), 1);
        assert!(info.handles_event("auditor", "created"));
        assert!(!info.handles_event("auditor", "deleted"));
        assert!(!info.handles_event("other", "created"));
    }

    #[test]
    fn test_remove_type() {
        let mut info = WorkerInfo::with_timestamp(test_worker_id(1), 1000);
        info.apply_manifest(&AgentTypeManifest::new("echo"));

        info.remove_type("echo");
        assert!(info.supported_types.is_empty());

        // Removing again is a no-op
        info.remove_type("echo");
        assert!(info.supported_types.is_empty());
    }

    #[test]
    fn test_staleness() {
        let mut info = WorkerInfo::with_timestamp(test_worker_id(1), 1000);

        assert!(!info.is_stale(2000, 5000));
        assert!(info.is_stale(7000, 5000));

        info.touch(4000);
        assert!(!info.is_stale(7000, 5000));

        // Older timestamps never rewind last-seen
        info.touch(100);
        assert_eq!(info.last_seen_ms, 4000);
    }
}
