//! Agent state store facade
//!
//! Agents persist one opaque blob each. Absent state is reported as `None`,
//! distinct from an empty stored payload.

use crate::error::Result;
use crate::ident::AgentId;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::instrument;

/// Per-agent opaque state store
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store the agent's state blob, replacing any previous one
    async fn put(&self, agent_id: &AgentId, payload: Bytes) -> Result<()>;

    /// Read the agent's state blob
    ///
    /// Returns `Ok(None)` when no state was ever stored for this agent.
    async fn get(&self, agent_id: &AgentId) -> Result<Option<Bytes>>;

    /// Check whether any state is stored for this agent
    async fn exists(&self, agent_id: &AgentId) -> Result<bool> {
        Ok(self.get(agent_id).await?.is_some())
    }
}

/// In-memory state store
///
/// For testing and single-process deployments.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    data: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryStateStore {
    /// Create a new in-memory state store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    #[instrument(skip(self, payload), fields(agent_id = %agent_id.qualified_name(), payload_len = payload.len()))]
    async fn put(&self, agent_id: &AgentId, payload: Bytes) -> Result<()> {
        let mut data = self.data.write().await;
        data.insert(agent_id.qualified_name(), payload);
        Ok(())
    }

    #[instrument(skip(self), fields(agent_id = %agent_id.qualified_name()))]
    async fn get(&self, agent_id: &AgentId) -> Result<Option<Bytes>> {
        let data = self.data.read().await;
        Ok(data.get(&agent_id.qualified_name()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStateStore::new();
        let agent = AgentId::new("echo", "alice").unwrap();

        store.put(&agent, Bytes::from("v1")).await.unwrap();
        assert_eq!(store.get(&agent).await.unwrap(), Some(Bytes::from("v1")));

        store.put(&agent, Bytes::from("v2")).await.unwrap();
        assert_eq!(store.get(&agent).await.unwrap(), Some(Bytes::from("v2")));
    }

    #[tokio::test]
    async fn test_memory_store_absent_vs_empty() {
        let store = MemoryStateStore::new();
        let absent = AgentId::new("echo", "nobody").unwrap();
        let empty = AgentId::new("echo", "blank").unwrap();

        // Never stored: not found
        assert!(store.get(&absent).await.unwrap().is_none());
        assert!(!store.exists(&absent).await.unwrap());

        // Stored empty payload: found, and empty
        store.put(&empty, Bytes::new()).await.unwrap();
        let read = store.get(&empty).await.unwrap();
        assert_eq!(read, Some(Bytes::new()));
        assert!(store.exists(&empty).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_isolation() {
        let store = MemoryStateStore::new();
        let a = AgentId::new("echo", "a").unwrap();
        let b = AgentId::new("echo", "b").unwrap();

        store.put(&a, Bytes::from("for-a")).await.unwrap();
        store.put(&b, Bytes::from("for-b")).await.unwrap();

        assert_eq!(store.get(&a).await.unwrap(), Some(Bytes::from("for-a")));
        assert_eq!(store.get(&b).await.unwrap(), Some(Bytes::from("for-b")));
    }
}
