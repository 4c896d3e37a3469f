//! Agent placement directory
//!
//! The directory is the single authority for worker membership, agent type
//! support sets, sticky placements, and topic subscriptions. All mutations
//! take the one state lock, so every operation is linearized.

use crate::error::{RegistryError, RegistryResult};
use crate::worker::WorkerInfo;
use gantry_core::message::AgentTypeManifest;
use gantry_core::{AgentId, IoContext, RngProvider, TimeProvider, TopicId, WorkerId};
use gantry_core::constants::WORKERS_COUNT_MAX;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct DirectoryState {
    /// Connected workers by ID
    workers: HashMap<WorkerId, WorkerInfo>,
    /// Agent type to the workers supporting it
    support: HashMap<String, HashSet<WorkerId>>,
    /// Sticky placements: agent instance to hosting worker
    placements: HashMap<AgentId, WorkerId>,
    /// Topic type to the agent types subscribed to it
    subscriptions: HashMap<String, HashSet<String>>,
}

/// Placement directory service
pub struct AgentDirectory {
    state: RwLock<DirectoryState>,
    time: Arc<dyn TimeProvider>,
    rng: Arc<dyn RngProvider>,
}

impl AgentDirectory {
    /// Create a directory with the given I/O providers
    pub fn new(io: IoContext) -> Self {
        Self {
            state: RwLock::new(DirectoryState::default()),
            time: io.time,
            rng: io.rng,
        }
    }

    /// Create a directory with production providers
    pub fn production() -> Self {
        Self::new(IoContext::production())
    }

    // =========================================================================
    // Worker Membership
    // =========================================================================

    /// Add a worker to the directory
    ///
    /// Adding an already-present worker refreshes its last-seen and is
    /// otherwise a no-op.
    pub async fn add_worker(&self, worker_id: WorkerId) -> RegistryResult<()> {
        let now_ms = self.time.now_ms();
        let mut state = self.state.write().await;

        if let Some(info) = state.workers.get_mut(&worker_id) {
            info.touch(now_ms);
            return Ok(());
        }

        if state.workers.len() >= WORKERS_COUNT_MAX {
            return Err(RegistryError::WorkerLimitReached {
                count: state.workers.len(),
                limit: WORKERS_COUNT_MAX,
            });
        }

        info!(worker = %worker_id, "Worker joined");
        state
            .workers
            .insert(worker_id.clone(), WorkerInfo::with_timestamp(worker_id, now_ms));
        Ok(())
    }

    /// Remove a worker, stripping it from every support set and dropping its
    /// placements
    ///
    /// Removing an unknown worker is a no-op.
    pub async fn remove_worker(&self, worker_id: &WorkerId) {
        let mut state = self.state.write().await;

        if state.workers.remove(worker_id).is_none() {
            return;
        }

        for workers in state.support.values_mut() {
            workers.remove(worker_id);
        }
        state.support.retain(|_, workers| !workers.is_empty());

        let before = state.placements.len();
        state.placements.retain(|_, placed| placed != worker_id);
        let dropped = before - state.placements.len();

        info!(worker = %worker_id, placements_dropped = dropped, "Worker removed");
    }

    /// Refresh a worker's last-seen timestamp
    ///
    /// Unknown workers are ignored; the caller learns about eviction when it
    /// next routes through the directory.
    pub async fn touch_worker(&self, worker_id: &WorkerId) {
        let now_ms = self.time.now_ms();
        let mut state = self.state.write().await;
        if let Some(info) = state.workers.get_mut(worker_id) {
            info.touch(now_ms);
        }
    }

    /// Evict every worker silent past the timeout
    ///
    /// Returns the evicted worker IDs.
    pub async fn evict_stale_workers(&self, timeout_ms: u64) -> Vec<WorkerId> {
        let now_ms = self.time.now_ms();
        let stale: Vec<WorkerId> = {
            let state = self.state.read().await;
            state
                .workers
                .values()
                .filter(|info| info.is_stale(now_ms, timeout_ms))
                .map(|info| info.worker_id.clone())
                .collect()
        };

        for worker_id in &stale {
            warn!(worker = %worker_id, timeout_ms, "Evicting stale worker");
            self.remove_worker(worker_id).await;
        }

        stale
    }

    /// Number of live workers
    pub async fn worker_count(&self) -> usize {
        self.state.read().await.workers.len()
    }

    // =========================================================================
    // Agent Type Support
    // =========================================================================

    /// Register an agent type on a worker
    ///
    /// Applies the manifest's handled events and topic subscriptions.
    /// Re-registering the same type is a no-op.
    pub async fn register_agent_type(
        &self,
        worker_id: &WorkerId,
        manifest: &AgentTypeManifest,
    ) -> RegistryResult<()> {
        let mut state = self.state.write().await;

        let info = state
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| RegistryError::worker_not_found(worker_id.as_str()))?;
        info.apply_manifest(manifest);

        state
            .support
            .entry(manifest.agent_type.clone())
            .or_default()
            .insert(worker_id.clone());

        for topic_type in &manifest.subscriptions {
            state
                .subscriptions
                .entry(topic_type.clone())
                .or_default()
                .insert(manifest.agent_type.clone());
        }

        debug!(worker = %worker_id, agent_type = %manifest.agent_type, "Agent type registered");
        Ok(())
    }

    /// Unregister an agent type from a worker
    ///
    /// Unregistering a type that was never registered is a no-op.
    pub async fn unregister_agent_type(&self, worker_id: &WorkerId, agent_type: &str) {
        let mut state = self.state.write().await;

        if let Some(info) = state.workers.get_mut(worker_id) {
            info.remove_type(agent_type);
        }

        if let Some(workers) = state.support.get_mut(agent_type) {
            workers.remove(worker_id);
            if workers.is_empty() {
                state.support.remove(agent_type);
            }
        }
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Pick a uniformly random worker supporting the agent type
    pub async fn get_compatible_worker(&self, agent_type: &str) -> Option<WorkerId> {
        let state = self.state.read().await;
        Self::select_random(&state, agent_type, &*self.rng)
    }

    /// Resolve an agent to its hosting worker, placing it if needed
    ///
    /// Returns `(worker, is_new_placement)`:
    /// - an existing placement on a live supporting worker is sticky;
    /// - a placement on a vanished worker is lazily invalidated and the agent
    ///   re-placed at random;
    /// - with no compatible worker the result is `(None, false)`.
    pub async fn get_or_place_agent(&self, agent_id: &AgentId) -> (Option<WorkerId>, bool) {
        let mut state = self.state.write().await;

        if let Some(placed) = state.placements.get(agent_id) {
            let live = state
                .workers
                .get(placed)
                .map(|info| info.supported_types.contains(agent_id.agent_type()))
                .unwrap_or(false);
            if live {
                return (Some(placed.clone()), false);
            }

            let stale = placed.clone();
            debug!(agent = %agent_id, worker = %stale, "Invalidating stale placement");
            state.placements.remove(agent_id);
        }

        match Self::select_random(&state, agent_id.agent_type(), &*self.rng) {
            Some(worker_id) => {
                state
                    .placements
                    .insert(agent_id.clone(), worker_id.clone());
                debug!(agent = %agent_id, worker = %worker_id, "Agent placed");
                (Some(worker_id), true)
            }
            None => (None, false),
        }
    }

    /// Current placement of an agent, if any
    pub async fn placement_of(&self, agent_id: &AgentId) -> Option<WorkerId> {
        self.state.read().await.placements.get(agent_id).cloned()
    }

    fn select_random(
        state: &DirectoryState,
        agent_type: &str,
        rng: &dyn RngProvider,
    ) -> Option<WorkerId> {
        let workers = state.support.get(agent_type)?;
        if workers.is_empty() {
            return None;
        }

        // Sort for a stable index order under a seeded RNG.
        let mut candidates: Vec<&WorkerId> = workers.iter().collect();
        candidates.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        let index = rng.gen_range(0, candidates.len() as u64) as usize;
        Some(candidates[index].clone())
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe an agent type to a topic type
    ///
    /// Subscribing twice is a no-op.
    pub async fn subscribe(&self, topic_type: &str, agent_type: &str) {
        let mut state = self.state.write().await;
        state
            .subscriptions
            .entry(topic_type.to_string())
            .or_default()
            .insert(agent_type.to_string());
    }

    /// Unsubscribe an agent type from a topic type
    ///
    /// Unsubscribing a type that was never subscribed is a no-op.
    pub async fn unsubscribe(&self, topic_type: &str, agent_type: &str) {
        let mut state = self.state.write().await;
        if let Some(types) = state.subscriptions.get_mut(topic_type) {
            types.remove(agent_type);
            if types.is_empty() {
                state.subscriptions.remove(topic_type);
            }
        }
    }

    /// Agent types both subscribed to the topic's type and declaring a
    /// handler for the event type
    ///
    /// Subscribed types without a matching handler are excluded.
    pub async fn subscribed_and_handling(
        &self,
        topic: &TopicId,
        event_type: &str,
    ) -> Vec<String> {
        let state = self.state.read().await;

        let Some(subscribed) = state.subscriptions.get(topic.topic_type()) else {
            return Vec::new();
        };

        let mut matching: Vec<String> = subscribed
            .iter()
            .filter(|agent_type| {
                state.support.get(*agent_type).is_some_and(|workers| {
                    workers.iter().any(|worker_id| {
                        state
                            .workers
                            .get(worker_id)
                            .is_some_and(|info| info.handles_event(agent_type, event_type))
                    })
                })
            })
            .cloned()
            .collect();

        matching.sort();
        matching
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{MockClock, StdRngProvider};
    use std::collections::HashMap as StdHashMap;

    fn test_worker_id(n: u32) -> WorkerId {
        WorkerId::new(format!("worker-{}", n)).unwrap()
    }

    fn test_directory() -> (Arc<AgentDirectory>, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new(1_000_000));
        let io = IoContext::new(clock.clone(), Arc::new(StdRngProvider::with_seed(42)));
        (Arc::new(AgentDirectory::new(io)), clock)
    }

    async fn add_echo_worker(directory: &AgentDirectory, n: u32) -> WorkerId {
        let worker = test_worker_id(n);
        directory.add_worker(worker.clone()).await.unwrap();
        directory
            .register_agent_type(&worker, &AgentTypeManifest::new("echo"))
            .await
            .unwrap();
        worker
    }

    #[tokio::test]
    async fn test_add_worker_idempotent() {
        let (directory, _) = test_directory();
        let worker = test_worker_id(1);

        directory.add_worker(worker.clone()).await.unwrap();
        directory.add_worker(worker.clone()).await.unwrap();

        assert_eq!(directory.worker_count().await, 1);
    }

    #[tokio::test]
    async fn test_register_agent_type_idempotent() {
        let (directory, _) = test_directory();
        let worker = add_echo_worker(&directory, 1).await;

        // Double register leaves one support entry
        directory
            .register_agent_type(&worker, &AgentTypeManifest::new("echo"))
            .await
            .unwrap();

        assert!(directory.get_compatible_worker("echo").await.is_some());

        // Unregister of a never-registered pair is fine
        directory.unregister_agent_type(&worker, "nonexistent").await;

        directory.unregister_agent_type(&worker, "echo").await;
        assert!(directory.get_compatible_worker("echo").await.is_none());
    }

    #[tokio::test]
    async fn test_register_agent_type_unknown_worker() {
        let (directory, _) = test_directory();
        let result = directory
            .register_agent_type(&test_worker_id(9), &AgentTypeManifest::new("echo"))
            .await;
        assert!(matches!(result, Err(RegistryError::WorkerNotFound { .. })));
    }

    #[tokio::test]
    async fn test_placement_is_sticky() {
        let (directory, _) = test_directory();
        add_echo_worker(&directory, 1).await;
        add_echo_worker(&directory, 2).await;

        let agent = AgentId::new("echo", "alice").unwrap();
        let (first, new) = directory.get_or_place_agent(&agent).await;
        assert!(new);
        let first = first.unwrap();

        for _ in 0..20 {
            let (worker, new) = directory.get_or_place_agent(&agent).await;
            assert_eq!(worker.as_ref(), Some(&first));
            assert!(!new);
        }
    }

    #[tokio::test]
    async fn test_placement_spreads_across_workers() {
        let (directory, _) = test_directory();
        for n in 1..=4 {
            add_echo_worker(&directory, n).await;
        }

        let mut counts: StdHashMap<WorkerId, usize> = StdHashMap::new();
        for i in 0..200 {
            let agent = AgentId::new("echo", format!("key-{}", i)).unwrap();
            let (worker, new) = directory.get_or_place_agent(&agent).await;
            assert!(new);
            *counts.entry(worker.unwrap()).or_default() += 1;
        }

        // Every worker gets a share under a seeded uniform RNG.
        assert_eq!(counts.len(), 4);
        for (_, count) in counts {
            assert!(count > 20, "placement skew too high: {}", count);
        }
    }

    #[tokio::test]
    async fn test_replacement_after_worker_removal() {
        let (directory, _) = test_directory();
        let w1 = add_echo_worker(&directory, 1).await;
        let w2 = add_echo_worker(&directory, 2).await;

        let agent = AgentId::new("echo", "alice").unwrap();
        let (placed, _) = directory.get_or_place_agent(&agent).await;
        let placed = placed.unwrap();
        let survivor = if placed == w1 { w2 } else { w1 };

        directory.remove_worker(&placed).await;

        let (worker, new) = directory.get_or_place_agent(&agent).await;
        assert_eq!(worker, Some(survivor));
        assert!(new);
    }

    #[tokio::test]
    async fn test_no_capacity() {
        let (directory, _) = test_directory();

        let agent = AgentId::new("echo", "alice").unwrap();
        let (worker, new) = directory.get_or_place_agent(&agent).await;
        assert!(worker.is_none());
        assert!(!new);

        // A worker without the type does not help.
        let w = test_worker_id(1);
        directory.add_worker(w.clone()).await.unwrap();
        directory
            .register_agent_type(&w, &AgentTypeManifest::new("other"))
            .await
            .unwrap();
        let (worker, new) = directory.get_or_place_agent(&agent).await;
        assert!(worker.is_none());
        assert!(!new);
    }

    #[tokio::test]
    async fn test_remove_worker_strips_support_and_placements() {
        let (directory, _) = test_directory();
        let worker = add_echo_worker(&directory, 1).await;

        let agent = AgentId::new("echo", "alice").unwrap();
        let (placed, _) = directory.get_or_place_agent(&agent).await;
        assert_eq!(placed, Some(worker.clone()));

        directory.remove_worker(&worker).await;

        assert!(directory.get_compatible_worker("echo").await.is_none());
        assert!(directory.placement_of(&agent).await.is_none());
    }

    #[tokio::test]
    async fn test_subscription_intersection() {
        let (directory, _) = test_directory();
        let worker = test_worker_id(1);
        directory.add_worker(worker.clone()).await.unwrap();

        // auditor handles "created"; ignorer subscribes but handles nothing.
        directory
            .register_agent_type(
                &worker,
                &AgentTypeManifest::new("auditor")
                    .with_handled_event("created")
                    .with_subscription("orders"),
            )
            .await
            .unwrap();
        directory
            .register_agent_type(
                &worker,
                &AgentTypeManifest::new("ignorer").with_subscription("orders"),
            )
            .await
            .unwrap();

        let topic = TopicId::new("orders", "store-7").unwrap();
        assert_eq!(
            directory.subscribed_and_handling(&topic, "created").await,
            vec!["auditor".to_string()]
        );
        assert!(directory
            .subscribed_and_handling(&topic, "deleted")
            .await
            .is_empty());

        let other = TopicId::new("payments", "store-7").unwrap();
        assert!(directory
            .subscribed_and_handling(&other, "created")
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_unsubscribe() {
        let (directory, _) = test_directory();
        let worker = test_worker_id(1);
        directory.add_worker(worker.clone()).await.unwrap();
        directory
            .register_agent_type(
                &worker,
                &AgentTypeManifest::new("auditor").with_handled_event("created"),
            )
            .await
            .unwrap();

        directory.subscribe("orders", "auditor").await;
        directory.subscribe("orders", "auditor").await;

        let topic = TopicId::new("orders", "s").unwrap();
        assert_eq!(
            directory.subscribed_and_handling(&topic, "created").await,
            vec!["auditor".to_string()]
        );

        directory.unsubscribe("orders", "auditor").await;
        assert!(directory
            .subscribed_and_handling(&topic, "created")
            .await
            .is_empty());

        // Unsubscribing again is a no-op
        directory.unsubscribe("orders", "auditor").await;
    }

    #[tokio::test]
    async fn test_eviction_of_silent_worker() {
        let (directory, clock) = test_directory();
        let w1 = add_echo_worker(&directory, 1).await;
        let w2 = add_echo_worker(&directory, 2).await;

        let agent = AgentId::new("echo", "alice").unwrap();
        let (_, _) = directory.get_or_place_agent(&agent).await;

        // w2 keeps talking, w1 goes silent.
        clock.advance_ms(20_000);
        directory.touch_worker(&w2).await;
        clock.advance_ms(15_000);

        let evicted = directory.evict_stale_workers(30_000).await;
        assert_eq!(evicted, vec![w1.clone()]);
        assert_eq!(directory.worker_count().await, 1);

        // Sweep again: nothing left to evict.
        assert!(directory.evict_stale_workers(30_000).await.is_empty());

        // Any placement on the evicted worker was dropped.
        if let Some(placed) = directory.placement_of(&agent).await {
            assert_eq!(placed, w2);
        }
    }

    #[tokio::test]
    async fn test_touch_keeps_worker_alive() {
        let (directory, clock) = test_directory();
        let worker = add_echo_worker(&directory, 1).await;

        for _ in 0..5 {
            clock.advance_ms(10_000);
            directory.touch_worker(&worker).await;
        }

        assert!(directory.evict_stale_workers(30_000).await.is_empty());
        assert_eq!(directory.worker_count().await, 1);
    }
}
