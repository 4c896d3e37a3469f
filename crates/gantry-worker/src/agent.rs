//! Agent trait and the static agent type registry
//!
//! A worker declares every agent type it hosts up front, with a factory per
//! type. There is no runtime discovery: the registry is built before the
//! worker connects and is immutable afterwards.

use async_trait::async_trait;
use bytes::Bytes;
use gantry_core::message::AgentTypeManifest;
use gantry_core::{AgentId, Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// One hosted agent instance
///
/// Instances are created lazily on first message and live until the worker
/// stops. The runtime serializes all messages to one instance, so handlers
/// take `&mut self` and never observe concurrent calls.
#[async_trait]
pub trait Agent: Send {
    /// Handle an RPC method call, returning the response payload
    async fn handle_rpc(&mut self, method: &str, payload: Bytes) -> Result<Bytes>;

    /// Handle a delivered event
    ///
    /// Default implementation ignores the event. Only event types declared
    /// in the manifest are ever delivered.
    async fn handle_event(&mut self, event_type: &str, payload: Bytes) -> Result<()> {
        let _ = (event_type, payload);
        Ok(())
    }
}

/// Factory creating a fresh agent instance for an ID
pub type AgentFactory = Arc<dyn Fn(&AgentId) -> Box<dyn Agent> + Send + Sync>;

struct AgentTypeEntry {
    manifest: AgentTypeManifest,
    factory: AgentFactory,
}

/// Static registry of the agent types a worker hosts
#[derive(Default)]
pub struct AgentTypeRegistry {
    entries: HashMap<String, AgentTypeEntry>,
}

impl AgentTypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register an agent type with its manifest and instance factory
    ///
    /// # Errors
    /// Returns `DuplicateAgentType` if the type is already registered.
    pub fn register<F>(&mut self, manifest: AgentTypeManifest, factory: F) -> Result<()>
    where
        F: Fn(&AgentId) -> Box<dyn Agent> + Send + Sync + 'static,
    {
        if self.entries.contains_key(&manifest.agent_type) {
            return Err(Error::DuplicateAgentType {
                agent_type: manifest.agent_type.clone(),
            });
        }

        self.entries.insert(
            manifest.agent_type.clone(),
            AgentTypeEntry {
                manifest,
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    /// Manifests for every registered type, sorted by type name
    pub fn manifests(&self) -> Vec<AgentTypeManifest> {
        let mut manifests: Vec<_> = self
            .entries
            .values()
            .map(|entry| entry.manifest.clone())
            .collect();
        manifests.sort_by(|a, b| a.agent_type.cmp(&b.agent_type));
        manifests
    }

    /// Look up the factory for an agent type
    pub fn factory(&self, agent_type: &str) -> Option<AgentFactory> {
        self.entries
            .get(agent_type)
            .map(|entry| Arc::clone(&entry.factory))
    }

    /// Number of registered agent types
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no agent types are registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
