//! Worker runtime
//!
//! Connects to the gateway, registers the hosted agent types, and runs the
//! connection: one reader task dispatching inbound frames, one writer task
//! draining the outbound channel, and a keepalive ping task. Agent instances
//! are created lazily on first message and live until the runtime stops.

use crate::agent::{Agent, AgentTypeRegistry};
use crate::config::WorkerConfig;
use bytes::Bytes;
use gantry_core::constants::OUTBOUND_CHANNEL_DEPTH_MAX;
use gantry_core::message::{read_frame, write_frame, Frame, RequestId};
use gantry_core::{AgentId, Error, IoContext, Result, TopicId, WorkerId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Requests this worker has in flight, awaiting their response frames
struct PendingCalls {
    next_id: AtomicU64,
    waiters: RwLock<HashMap<RequestId, oneshot::Sender<Frame>>>,
}

impl PendingCalls {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            waiters: RwLock::new(HashMap::new()),
        }
    }

    /// Mint a request ID and register a waiter for its response
    async fn register(&self) -> (RequestId, oneshot::Receiver<Frame>) {
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.waiters.write().await.insert(request_id, tx);
        (request_id, rx)
    }

    /// Complete a waiter with its response frame
    ///
    /// Returns false if no waiter matched, which means the caller already
    /// timed out or the response is a stray.
    async fn complete(&self, request_id: RequestId, frame: Frame) -> bool {
        match self.waiters.write().await.remove(&request_id) {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Drop a waiter that will never be completed
    async fn abandon(&self, request_id: RequestId) {
        self.waiters.write().await.remove(&request_id);
    }

    /// Drop every waiter; their receivers resolve with an error
    async fn fail_all(&self) {
        self.waiters.write().await.clear();
    }
}

struct WorkerInner {
    config: WorkerConfig,
    worker_id: WorkerId,
    registry: AgentTypeRegistry,
    outbound: mpsc::Sender<Frame>,
    pending: PendingCalls,
    instances: Mutex<HashMap<AgentId, Arc<Mutex<Box<dyn Agent>>>>>,
    io: IoContext,
}

impl WorkerInner {
    /// Queue a frame for the writer task
    async fn send(&self, frame: Frame) -> Result<()> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| Error::channel_closed("gateway connection is gone"))
    }

    /// Get or lazily create the instance for an agent ID
    async fn instance_for(&self, target: &AgentId) -> Result<Arc<Mutex<Box<dyn Agent>>>> {
        let factory =
            self.registry
                .factory(target.agent_type())
                .ok_or_else(|| Error::UnknownAgentType {
                    agent_type: target.agent_type().to_string(),
                })?;

        let mut instances = self.instances.lock().await;
        let instance = instances
            .entry(target.clone())
            .or_insert_with(|| {
                debug!(agent = %target, "Creating agent instance");
                Arc::new(Mutex::new(factory(target)))
            })
            .clone();
        Ok(instance)
    }

    /// Run an RPC against the target instance
    async fn invoke(&self, target: &AgentId, method: &str, payload: Bytes) -> Result<Bytes> {
        let instance = self.instance_for(target).await?;
        let mut agent = instance.lock().await;
        agent.handle_rpc(method, payload).await
    }

    /// Deliver an event to the target instance
    async fn deliver(&self, target: &AgentId, event_type: &str, payload: Bytes) -> Result<()> {
        let instance = self.instance_for(target).await?;
        let mut agent = instance.lock().await;
        agent.handle_event(event_type, payload).await
    }
}

/// Worker runtime hosting agent instances behind one gateway connection
pub struct WorkerRuntime {
    inner: Arc<WorkerInner>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl WorkerRuntime {
    /// Connect to the gateway, register agent types, and start the runtime
    ///
    /// The connect itself is retried per the configured backoff policy;
    /// everything after the socket is up happens once.
    pub async fn connect(
        config: WorkerConfig,
        registry: AgentTypeRegistry,
        io: IoContext,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|reason| Error::InvalidConfiguration {
                field: "worker".into(),
                reason,
            })?;

        let worker_id = match &config.worker_id {
            Some(id) => id.clone(),
            None => WorkerId::generate_with_rng(io.rng.as_ref()),
        };

        let addr = config.gateway_addr;
        let stream = config
            .connect_retry
            .run(io.time.as_ref(), || async move {
                TcpStream::connect(addr)
                    .await
                    .map_err(|e| Error::transport(format!("connect to {} failed: {}", addr, e)))
            })
            .await?;

        info!(worker_id = %worker_id, gateway = %addr, "Connected to gateway");

        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_DEPTH_MAX);

        let inner = Arc::new(WorkerInner {
            config,
            worker_id,
            registry,
            outbound,
            pending: PendingCalls::new(),
            instances: Mutex::new(HashMap::new()),
            io,
        });

        // Registration goes through the writer channel first, ahead of any
        // ping or call.
        inner
            .send(Frame::Registration {
                worker_id: inner.worker_id.clone(),
                manifests: inner.registry.manifests(),
            })
            .await?;

        let writer = tokio::spawn(writer_task(write_half, outbound_rx));
        let reader = tokio::spawn(reader_task(Arc::clone(&inner), read_half));
        let ping = tokio::spawn(ping_task(Arc::clone(&inner)));

        Ok(Self {
            inner,
            tasks: StdMutex::new(vec![writer, reader, ping]),
        })
    }

    /// This worker's identity
    pub fn worker_id(&self) -> &WorkerId {
        &self.inner.worker_id
    }

    /// Get a cloneable handle for calls, publishes, and state operations
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Stop the runtime, closing the gateway connection
    pub async fn stop(&self) {
        info!(worker_id = %self.inner.worker_id, "Stopping worker runtime");

        let tasks = {
            let mut guard = match self.tasks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *guard)
        };
        for task in tasks {
            task.abort();
        }

        self.inner.pending.fail_all().await;
    }
}

impl Drop for WorkerRuntime {
    fn drop(&mut self) {
        let guard = match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for task in guard.iter() {
            task.abort();
        }
    }
}

/// Writer task: drains the outbound channel onto the socket
async fn writer_task(mut write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut write_half, &frame).await {
            warn!(error = %e, "Failed to write frame to gateway");
            break;
        }
    }

    debug!("Worker writer task exiting");
}

/// Reader task: dispatches inbound frames until the connection drops
async fn reader_task(inner: Arc<WorkerInner>, mut read_half: OwnedReadHalf) {
    loop {
        match read_frame(&mut read_half).await {
            Ok(Some(frame)) => dispatch_frame(&inner, frame).await,
            Ok(None) => {
                info!(worker_id = %inner.worker_id, "Gateway closed the connection");
                break;
            }
            Err(e) => {
                warn!(worker_id = %inner.worker_id, error = %e, "Gateway connection failed");
                break;
            }
        }
    }

    // In-flight calls can never complete now.
    inner.pending.fail_all().await;
}

async fn dispatch_frame(inner: &Arc<WorkerInner>, frame: Frame) {
    if frame.is_response() {
        // Responses to our own calls: RpcResponse, StoreStateAck,
        // ReadStateResult all correlate by the ID we minted.
        let request_id = match frame.request_id() {
            Some(id) => id,
            None => return,
        };
        if !inner.pending.complete(request_id, frame).await {
            warn!(request_id = request_id, "Dropping unmatched response");
        }
        return;
    }

    match frame {
        Frame::RpcRequest {
            request_id,
            target,
            method,
            payload,
        } => {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                let result = inner
                    .invoke(&target, &method, payload)
                    .await
                    .map_err(|e| e.to_string());

                if let Err(e) = inner.send(Frame::RpcResponse { request_id, result }).await {
                    warn!(request_id = request_id, error = %e, "Failed to send response");
                }
            });
        }

        Frame::EventDelivery {
            target,
            topic,
            event_type,
            payload,
        } => {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                // Event handler failures are logged and dropped; events are
                // delivered at most once, never retried.
                if let Err(e) = inner.deliver(&target, &event_type, payload).await {
                    warn!(
                        agent = %target,
                        topic = %topic,
                        event_type = %event_type,
                        error = %e,
                        "Event handler failed"
                    );
                }
            });
        }

        other => {
            warn!(
                worker_id = %inner.worker_id,
                frame_type = other.frame_type(),
                "Dropping unexpected frame from gateway"
            );
        }
    }
}

/// Ping task: keeps an idle worker from being evicted
async fn ping_task(inner: Arc<WorkerInner>) {
    loop {
        inner.io.sleep_ms(inner.config.ping_interval_ms).await;

        let ping = Frame::Ping {
            worker_id: inner.worker_id.clone(),
        };
        if inner.send(ping).await.is_err() {
            debug!("Ping task exiting, connection is gone");
            break;
        }
    }
}

/// Cloneable handle for making calls through the worker's connection
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<WorkerInner>,
}

impl WorkerHandle {
    /// Call a method on an agent instance anywhere in the cluster
    ///
    /// The gateway places the target if it has no live placement. Fails with
    /// `RpcFailed` when the remote handler errors and `RpcTimeout` when no
    /// response arrives within the configured window.
    pub async fn call(&self, target: &AgentId, method: &str, payload: Bytes) -> Result<Bytes> {
        let (request_id, rx) = self.inner.pending.register().await;

        let request = Frame::RpcRequest {
            request_id,
            target: target.clone(),
            method: method.to_string(),
            payload,
        };
        if let Err(e) = self.inner.send(request).await {
            self.inner.pending.abandon(request_id).await;
            return Err(e);
        }

        let frame = self.await_response(request_id, rx, &target.qualified_name()).await?;
        match frame {
            Frame::RpcResponse { result, .. } => result
                .map_err(|reason| Error::rpc_failed(target.qualified_name(), reason)),
            other => Err(Error::internal(format!(
                "rpc got mismatched response frame: {}",
                other.frame_type()
            ))),
        }
    }

    /// Publish an event on a topic, fire-and-forget
    pub async fn publish(&self, topic: &TopicId, event_type: &str, payload: Bytes) -> Result<()> {
        self.inner
            .send(Frame::Event {
                topic: topic.clone(),
                event_type: event_type.to_string(),
                payload,
            })
            .await
    }

    /// Persist an agent's state blob through the gateway
    pub async fn store_state(&self, agent_id: &AgentId, payload: Bytes) -> Result<()> {
        let (request_id, rx) = self.inner.pending.register().await;

        let request = Frame::StoreState {
            request_id,
            agent_id: agent_id.clone(),
            payload,
        };
        if let Err(e) = self.inner.send(request).await {
            self.inner.pending.abandon(request_id).await;
            return Err(e);
        }

        let frame = self.await_response(request_id, rx, &agent_id.qualified_name()).await?;
        match frame {
            Frame::StoreStateAck { result, .. } => {
                result.map_err(|reason| Error::rpc_failed(agent_id.qualified_name(), reason))
            }
            other => Err(Error::internal(format!(
                "store got mismatched response frame: {}",
                other.frame_type()
            ))),
        }
    }

    /// Read an agent's state blob through the gateway
    ///
    /// `Ok(None)` means no state was ever stored, distinct from an empty
    /// payload.
    pub async fn read_state(&self, agent_id: &AgentId) -> Result<Option<Bytes>> {
        let (request_id, rx) = self.inner.pending.register().await;

        let request = Frame::ReadState {
            request_id,
            agent_id: agent_id.clone(),
        };
        if let Err(e) = self.inner.send(request).await {
            self.inner.pending.abandon(request_id).await;
            return Err(e);
        }

        let frame = self.await_response(request_id, rx, &agent_id.qualified_name()).await?;
        match frame {
            Frame::ReadStateResult { result, .. } => {
                result.map_err(|reason| Error::rpc_failed(agent_id.qualified_name(), reason))
            }
            other => Err(Error::internal(format!(
                "read got mismatched response frame: {}",
                other.frame_type()
            ))),
        }
    }

    /// Wait for the response frame, bounded by the configured call timeout
    async fn await_response(
        &self,
        request_id: RequestId,
        rx: oneshot::Receiver<Frame>,
        target: &str,
    ) -> Result<Frame> {
        let timeout_ms = self.inner.config.rpc_timeout_ms;

        tokio::select! {
            received = rx => received.map_err(|_| {
                Error::channel_closed("gateway connection dropped mid-call")
            }),
            _ = self.inner.io.sleep_ms(timeout_ms) => {
                self.inner.pending.abandon(request_id).await;
                Err(Error::RpcTimeout {
                    target: target.to_string(),
                    timeout_ms,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_calls_complete() {
        let pending = PendingCalls::new();
        let (id, rx) = pending.register().await;

        let frame = Frame::RpcResponse {
            request_id: id,
            result: Ok(Bytes::from("ok")),
        };
        assert!(pending.complete(id, frame).await);

        match rx.await.unwrap() {
            Frame::RpcResponse { request_id, .. } => assert_eq!(request_id, id),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pending_calls_unmatched_and_abandoned() {
        let pending = PendingCalls::new();

        let stray = Frame::RpcResponse {
            request_id: 999,
            result: Ok(Bytes::new()),
        };
        assert!(!pending.complete(999, stray).await);

        let (id, rx) = pending.register().await;
        pending.abandon(id).await;
        let late = Frame::RpcResponse {
            request_id: id,
            result: Ok(Bytes::new()),
        };
        assert!(!pending.complete(id, late).await);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_pending_calls_fail_all() {
        let pending = PendingCalls::new();
        let (_id1, rx1) = pending.register().await;
        let (_id2, rx2) = pending.register().await;

        pending.fail_all().await;

        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
    }

    #[tokio::test]
    async fn test_pending_calls_ids_are_unique() {
        let pending = PendingCalls::new();
        let (a, _rx_a) = pending.register().await;
        let (b, _rx_b) = pending.register().await;
        assert_ne!(a, b);
    }
}
