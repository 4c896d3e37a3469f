//! Gateway: connection termination and frame routing
//!
//! One accept loop, one reader task per connection, one writer task per
//! connection. Every routing decision goes through the placement directory;
//! request IDs are rewritten to internally-unique ones so responses can be
//! matched back to their callers across multiplexed connections.

use crate::config::GatewayConfig;
use crate::connection::{writer_task, ConnectionHandle, ConnectionMap, PendingMap};
use bytes::Bytes;
use gantry_core::message::{read_frame, Frame, RequestId};
use gantry_core::{AgentId, Error, IoContext, Result, StateStore, TimeProvider, TopicId, WorkerId};
use gantry_core::constants::OUTBOUND_CHANNEL_DEPTH_MAX;
use gantry_registry::AgentDirectory;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{tcp::OwnedReadHalf, TcpListener};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

/// Gateway service
///
/// Owns the listener, the per-connection tasks, and the liveness sweep.
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: GatewayConfig,
    directory: Arc<AgentDirectory>,
    state_store: Arc<dyn StateStore>,
    connections: ConnectionMap,
    pending: PendingMap,
    /// Worker to its connection, maintained from Registration frames
    worker_conns: RwLock<HashMap<WorkerId, ConnectionHandle>>,
    /// Reverse map, used to touch liveness and clean up on disconnect
    conn_workers: RwLock<HashMap<ConnectionHandle, WorkerId>>,
    local_addr: RwLock<Option<SocketAddr>>,
    running: AtomicBool,
    shutdown_tx: RwLock<Option<broadcast::Sender<()>>>,
    time: Arc<dyn TimeProvider>,
}

impl Gateway {
    /// Create a gateway over the given directory and state store
    pub fn new(
        config: GatewayConfig,
        directory: Arc<AgentDirectory>,
        state_store: Arc<dyn StateStore>,
        io: IoContext,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                config,
                directory,
                state_store,
                connections: ConnectionMap::new(),
                pending: PendingMap::new(),
                worker_conns: RwLock::new(HashMap::new()),
                conn_workers: RwLock::new(HashMap::new()),
                local_addr: RwLock::new(None),
                running: AtomicBool::new(false),
                shutdown_tx: RwLock::new(None),
                time: io.time,
            }),
        }
    }

    /// Bind the listener and spawn the accept and sweep tasks
    pub async fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(Error::internal("gateway already started"));
        }

        self.inner
            .config
            .validate()
            .map_err(|reason| Error::InvalidConfiguration {
                field: "gateway".into(),
                reason,
            })?;

        let listener = TcpListener::bind(self.inner.config.listen_addr)
            .await
            .map_err(|e| {
                Error::transport(format!(
                    "failed to bind to {}: {}",
                    self.inner.config.listen_addr, e
                ))
            })?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::transport(format!("no local address: {}", e)))?;
        *self.inner.local_addr.write().await = Some(local_addr);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let sweep_shutdown_rx = shutdown_tx.subscribe();
        *self.inner.shutdown_tx.write().await = Some(shutdown_tx);

        info!(addr = %local_addr, "Gateway started");

        tokio::spawn(GatewayInner::accept_task(
            self.inner.clone(),
            listener,
            shutdown_rx,
        ));
        tokio::spawn(GatewayInner::sweep_task(
            self.inner.clone(),
            sweep_shutdown_rx,
        ));

        Ok(())
    }

    /// Address the gateway is listening on, once started
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.read().await
    }

    /// The directory this gateway routes through
    pub fn directory(&self) -> &Arc<AgentDirectory> {
        &self.inner.directory
    }

    /// Signal shutdown and drop all connections
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);

        if let Some(tx) = self.inner.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }

        let handles: Vec<ConnectionHandle> = {
            let conn_workers = self.inner.conn_workers.read().await;
            conn_workers.keys().copied().collect()
        };
        for handle in handles {
            self.inner.connection_closed(handle).await;
        }

        info!("Gateway stopped");
    }
}

impl GatewayInner {
    /// Accept loop: one reader and one writer task per connection
    async fn accept_task(
        inner: Arc<GatewayInner>,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let (read_half, write_half) = stream.into_split();
                            let (tx, rx) =
                                mpsc::channel::<Frame>(OUTBOUND_CHANNEL_DEPTH_MAX);
                            let handle = inner.connections.insert(tx).await;

                            info!(peer = %peer_addr, conn = %handle, "Accepted connection");

                            tokio::spawn(writer_task(write_half, rx, handle));
                            tokio::spawn(Self::reader_task(
                                inner.clone(),
                                read_half,
                                handle,
                            ));
                        }
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Accept task shutting down");
                    break;
                }
            }
        }
    }

    /// Reader loop for one connection
    async fn reader_task(
        inner: Arc<GatewayInner>,
        mut read_half: OwnedReadHalf,
        handle: ConnectionHandle,
    ) {
        loop {
            match read_frame(&mut read_half).await {
                Ok(Some(frame)) => {
                    inner.handle_frame(handle, frame).await;
                }
                Ok(None) => {
                    debug!(conn = %handle, "Connection closed");
                    break;
                }
                Err(e) => {
                    warn!(conn = %handle, error = %e, "Dropping connection");
                    break;
                }
            }
        }

        inner.connection_closed(handle).await;
    }

    /// Periodic liveness sweep: evict workers silent past the timeout
    async fn sweep_task(inner: Arc<GatewayInner>, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = inner.time.sleep_ms(inner.config.sweep_interval_ms) => {
                    let evicted = inner
                        .directory
                        .evict_stale_workers(inner.config.worker_timeout_ms)
                        .await;

                    for worker_id in evicted {
                        let handle = {
                            let mut worker_conns = inner.worker_conns.write().await;
                            worker_conns.remove(&worker_id)
                        };
                        if let Some(handle) = handle {
                            inner.conn_workers.write().await.remove(&handle);
                            inner.connections.remove(handle).await;
                            warn!(worker = %worker_id, conn = %handle, "Evicted silent worker");
                        }
                    }

                    // Pending entries whose target never answered expire on
                    // the same clock as worker eviction.
                    let now_ms = inner.time.now_ms();
                    let expired = inner
                        .pending
                        .take_older_than(now_ms, inner.config.worker_timeout_ms)
                        .await;
                    for (internal_id, pending) in expired {
                        let age_ms = now_ms.saturating_sub(pending.inserted_at_ms);
                        warn!(
                            request_id = internal_id,
                            caller = %pending.caller,
                            age_ms,
                            "Expiring unanswered request"
                        );
                        let response = Frame::RpcResponse {
                            request_id: pending.original_request_id,
                            result: Err(format!("no response after {}ms", age_ms)),
                        };
                        if let Err(e) = inner.connections.send(pending.caller, response).await {
                            debug!(caller = %pending.caller, error = %e, "Expired caller is gone");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Sweep task shutting down");
                    break;
                }
            }
        }
    }

    /// Route one inbound frame
    async fn handle_frame(self: &Arc<Self>, conn: ConnectionHandle, frame: Frame) {
        // Any frame counts as liveness for the connection's worker.
        if let Some(worker_id) = self.conn_workers.read().await.get(&conn).cloned() {
            self.directory.touch_worker(&worker_id).await;
        }

        match frame {
            Frame::Registration {
                worker_id,
                manifests,
            } => {
                self.handle_registration(conn, worker_id, manifests).await;
            }
            Frame::Ping { .. } => {
                // Touch above already did the work.
            }
            Frame::RpcRequest {
                request_id,
                target,
                method,
                payload,
            } => {
                self.route_request(conn, request_id, target, method, payload)
                    .await;
            }
            Frame::RpcResponse { request_id, result } => {
                self.route_response(request_id, result).await;
            }
            Frame::Event {
                topic,
                event_type,
                payload,
            } => {
                self.fan_out_event(topic, event_type, payload).await;
            }
            Frame::StoreState {
                request_id,
                agent_id,
                payload,
            } => {
                let result = self
                    .state_store
                    .put(&agent_id, payload)
                    .await
                    .map_err(|e| e.to_string());
                self.reply(conn, Frame::StoreStateAck { request_id, result })
                    .await;
            }
            Frame::ReadState {
                request_id,
                agent_id,
            } => {
                let result = self
                    .state_store
                    .get(&agent_id)
                    .await
                    .map_err(|e| e.to_string());
                self.reply(conn, Frame::ReadStateResult { request_id, result })
                    .await;
            }
            Frame::EventDelivery { .. } | Frame::StoreStateAck { .. } | Frame::ReadStateResult { .. } => {
                // Gateway-to-worker frames; a worker never sends them.
                warn!(
                    conn = %conn,
                    frame_type = frame.frame_type(),
                    "Dropping unexpected gateway-bound frame"
                );
            }
        }
    }

    async fn handle_registration(
        self: &Arc<Self>,
        conn: ConnectionHandle,
        worker_id: WorkerId,
        manifests: Vec<gantry_core::message::AgentTypeManifest>,
    ) {
        if let Err(e) = self.directory.add_worker(worker_id.clone()).await {
            warn!(worker = %worker_id, error = %e, "Rejecting registration");
            self.connections.remove(conn).await;
            return;
        }

        for manifest in &manifests {
            if let Err(e) = manifest.validate() {
                warn!(
                    worker = %worker_id,
                    error = %e,
                    "Rejecting invalid agent type manifest"
                );
                continue;
            }
            if let Err(e) = self.directory.register_agent_type(&worker_id, manifest).await {
                warn!(
                    worker = %worker_id,
                    agent_type = %manifest.agent_type,
                    error = %e,
                    "Failed to register agent type"
                );
            }
        }

        // A reconnect with the same worker ID supersedes the old connection;
        // its eventual close must not deregister the live worker.
        let superseded = self
            .worker_conns
            .write()
            .await
            .insert(worker_id.clone(), conn);
        if let Some(old_conn) = superseded {
            if old_conn != conn {
                self.conn_workers.write().await.remove(&old_conn);
                self.connections.remove(old_conn).await;
                info!(worker = %worker_id, old_conn = %old_conn, "Superseded stale connection");
            }
        }
        self.conn_workers.write().await.insert(conn, worker_id.clone());

        info!(worker = %worker_id, conn = %conn, types = manifests.len(), "Worker registered");
    }

    /// Place the target, rewrite the request ID, and forward
    ///
    /// A placement pointing at a worker with no live connection is treated
    /// as stale: the worker is removed and placement retried once.
    async fn route_request(
        self: &Arc<Self>,
        caller: ConnectionHandle,
        request_id: RequestId,
        target: AgentId,
        method: String,
        payload: Bytes,
    ) {
        for _attempt in 0..2 {
            let (worker, _is_new) = self.directory.get_or_place_agent(&target).await;
            let Some(worker_id) = worker else {
                self.reply(
                    caller,
                    Frame::RpcResponse {
                        request_id,
                        result: Err(Error::no_capacity(target.agent_type()).to_string()),
                    },
                )
                .await;
                return;
            };

            let target_conn = self.worker_conns.read().await.get(&worker_id).copied();
            let Some(target_conn) = target_conn else {
                warn!(worker = %worker_id, "Placement points at unconnected worker");
                self.remove_worker_mappings(&worker_id).await;
                continue;
            };

            let internal_id = self
                .pending
                .insert(caller, request_id, self.time.now_ms())
                .await;

            let forwarded = Frame::RpcRequest {
                request_id: internal_id,
                target: target.clone(),
                method: method.clone(),
                payload: payload.clone(),
            };

            match self.connections.send(target_conn, forwarded).await {
                Ok(()) => {
                    debug!(
                        agent = %target,
                        worker = %worker_id,
                        original_id = request_id,
                        internal_id,
                        "Request forwarded"
                    );
                    return;
                }
                Err(e) => {
                    warn!(worker = %worker_id, error = %e, "Forward failed, removing worker");
                    self.pending.take(internal_id).await;
                    self.remove_worker_mappings(&worker_id).await;
                }
            }
        }

        self.reply(
            caller,
            Frame::RpcResponse {
                request_id,
                result: Err(Error::no_capacity(target.agent_type()).to_string()),
            },
        )
        .await;
    }

    /// Match a response to its pending entry and return it to the caller
    ///
    /// Unmatched responses are dropped, not fatal.
    async fn route_response(
        self: &Arc<Self>,
        internal_id: RequestId,
        result: std::result::Result<Bytes, String>,
    ) {
        let Some(pending) = self.pending.take(internal_id).await else {
            warn!(request_id = internal_id, "Dropping unmatched response");
            return;
        };

        let restored = Frame::RpcResponse {
            request_id: pending.original_request_id,
            result,
        };

        if let Err(e) = self.connections.send(pending.caller, restored).await {
            let age_ms = self.time.now_ms().saturating_sub(pending.inserted_at_ms);
            warn!(
                caller = %pending.caller,
                age_ms,
                error = %e,
                "Dropping response for vanished caller"
            );
        }
    }

    /// Deliver an event to every subscribed-and-handling agent type
    ///
    /// At-most-once: delivery failures are logged and dropped.
    async fn fan_out_event(self: &Arc<Self>, topic: TopicId, event_type: String, payload: Bytes) {
        let agent_types = self
            .directory
            .subscribed_and_handling(&topic, &event_type)
            .await;

        debug!(
            topic = %topic,
            event_type = %event_type,
            recipients = agent_types.len(),
            "Fanning out event"
        );

        for agent_type in agent_types {
            let target = AgentId::new_unchecked(agent_type, topic.source().to_string());

            let (worker, _is_new) = self.directory.get_or_place_agent(&target).await;
            let Some(worker_id) = worker else {
                warn!(agent = %target, "No capacity for event delivery");
                continue;
            };

            let target_conn = self.worker_conns.read().await.get(&worker_id).copied();
            let Some(target_conn) = target_conn else {
                warn!(worker = %worker_id, "Event placement points at unconnected worker");
                self.remove_worker_mappings(&worker_id).await;
                continue;
            };

            let delivery = Frame::EventDelivery {
                target: target.clone(),
                topic: topic.clone(),
                event_type: event_type.clone(),
                payload: payload.clone(),
            };

            if let Err(e) = self.connections.send(target_conn, delivery).await {
                warn!(agent = %target, error = %e, "Dropping undeliverable event");
            }
        }
    }

    async fn reply(self: &Arc<Self>, conn: ConnectionHandle, frame: Frame) {
        if let Err(e) = self.connections.send(conn, frame).await {
            warn!(conn = %conn, error = %e, "Failed to reply");
        }
    }

    async fn remove_worker_mappings(self: &Arc<Self>, worker_id: &WorkerId) {
        self.directory.remove_worker(worker_id).await;
        let handle = self.worker_conns.write().await.remove(worker_id);
        if let Some(handle) = handle {
            self.conn_workers.write().await.remove(&handle);
            self.connections.remove(handle).await;
        }
    }

    /// Tear down one connection's state after its reader exits
    ///
    /// A worker is deregistered only if this handle is still its current
    /// connection; a superseded connection closing leaves the worker alone.
    async fn connection_closed(self: &Arc<Self>, handle: ConnectionHandle) {
        self.connections.remove(handle).await;

        let worker_id = self.conn_workers.write().await.remove(&handle);
        if let Some(worker_id) = worker_id {
            let still_current = {
                let mut worker_conns = self.worker_conns.write().await;
                match worker_conns.get(&worker_id) {
                    Some(current) if *current == handle => {
                        worker_conns.remove(&worker_id);
                        true
                    }
                    _ => false,
                }
            };

            if still_current {
                self.directory.remove_worker(&worker_id).await;
                info!(worker = %worker_id, conn = %handle, "Worker disconnected");
            } else {
                debug!(worker = %worker_id, conn = %handle, "Superseded connection closed");
            }
        }

        let abandoned = self.pending.drop_for_caller(handle).await;
        if abandoned > 0 {
            debug!(conn = %handle, abandoned, "Abandoned pending requests");
        }
    }
}
