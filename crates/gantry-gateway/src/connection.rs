//! Worker connection plumbing
//!
//! Connections are opaque integer handles paired with a send channel. One
//! writer task per connection serializes outbound frames, preserving
//! per-connection frame order.

use gantry_core::message::{write_frame, Frame, RequestId};
use gantry_core::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error};

/// Opaque identifier for one accepted connection
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// Raw handle value, for logging
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Registry of live connections and their outbound channels
pub(crate) struct ConnectionMap {
    next_handle: AtomicU64,
    senders: RwLock<HashMap<ConnectionHandle, mpsc::Sender<Frame>>>,
}

impl ConnectionMap {
    pub(crate) fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            senders: RwLock::new(HashMap::new()),
        }
    }

    /// Mint a handle for a new connection and store its outbound channel
    pub(crate) async fn insert(&self, sender: mpsc::Sender<Frame>) -> ConnectionHandle {
        let handle = ConnectionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.senders.write().await.insert(handle, sender);
        handle
    }

    /// Drop a connection's outbound channel, closing its writer task
    pub(crate) async fn remove(&self, handle: ConnectionHandle) {
        self.senders.write().await.remove(&handle);
    }

    /// Queue a frame for the connection's writer task
    pub(crate) async fn send(&self, handle: ConnectionHandle, frame: Frame) -> Result<()> {
        let sender = {
            let senders = self.senders.read().await;
            senders
                .get(&handle)
                .cloned()
                .ok_or_else(|| Error::channel_closed(format!("{} is gone", handle)))?
        };

        sender
            .send(frame)
            .await
            .map_err(|_| Error::channel_closed(format!("{} writer stopped", handle)))
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.senders.read().await.len()
    }
}

/// Writer task: drains the outbound channel onto the socket
pub(crate) async fn writer_task(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Frame>,
    handle: ConnectionHandle,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut write_half, &frame).await {
            error!(conn = %handle, error = %e, "Failed to write frame");
            break;
        }
    }

    debug!(conn = %handle, "Writer task exiting");
}

/// Book-keeping for one in-flight request whose ID was rewritten
#[derive(Debug, Clone)]
pub(crate) struct PendingRequest {
    /// Connection the response must be returned to
    pub caller: ConnectionHandle,
    /// Request ID the caller used, restored on the way back
    pub original_request_id: RequestId,
    /// When the rewrite happened (Unix timestamp ms)
    pub inserted_at_ms: u64,
}

/// Map from internally-unique request IDs to their pending book-keeping
pub(crate) struct PendingMap {
    next_id: AtomicU64,
    entries: RwLock<HashMap<RequestId, PendingRequest>>,
}

impl PendingMap {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Rewrite a caller's request ID to a fresh internally-unique one
    pub(crate) async fn insert(
        &self,
        caller: ConnectionHandle,
        original_request_id: RequestId,
        now_ms: u64,
    ) -> RequestId {
        let internal_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.write().await.insert(
            internal_id,
            PendingRequest {
                caller,
                original_request_id,
                inserted_at_ms: now_ms,
            },
        );
        internal_id
    }

    /// Resolve an internal request ID, removing its entry
    pub(crate) async fn take(&self, internal_id: RequestId) -> Option<PendingRequest> {
        self.entries.write().await.remove(&internal_id)
    }

    /// Drop every entry whose caller connection is gone
    ///
    /// Returns how many entries were abandoned.
    pub(crate) async fn drop_for_caller(&self, caller: ConnectionHandle) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, pending| pending.caller != caller);
        before - entries.len()
    }

    /// Remove every entry older than the age bound, returning them
    pub(crate) async fn take_older_than(
        &self,
        now_ms: u64,
        age_ms_max: u64,
    ) -> Vec<(RequestId, PendingRequest)> {
        let mut entries = self.entries.write().await;
        let expired: Vec<RequestId> = entries
            .iter()
            .filter(|(_, pending)| now_ms.saturating_sub(pending.inserted_at_ms) > age_ms_max)
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| entries.remove(&id).map(|pending| (id, pending)))
            .collect()
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::WorkerId;

    fn ping_frame(n: u32) -> Frame {
        Frame::Ping {
            worker_id: WorkerId::new(format!("worker-{}", n)).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_connection_map_handles_are_unique() {
        let map = ConnectionMap::new();
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);

        let h1 = map.insert(tx1).await;
        let h2 = map.insert(tx2).await;

        assert_ne!(h1, h2);
        assert_eq!(map.len().await, 2);

        map.remove(h1).await;
        assert_eq!(map.len().await, 1);
    }

    #[tokio::test]
    async fn test_connection_map_send() {
        let map = ConnectionMap::new();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = map.insert(tx).await;

        map.send(handle, ping_frame(1)).await.unwrap();
        assert!(matches!(rx.recv().await, Some(Frame::Ping { .. })));

        map.remove(handle).await;
        let result = map.send(handle, ping_frame(1)).await;
        assert!(matches!(result, Err(Error::ChannelClosed { .. })));
    }

    #[tokio::test]
    async fn test_pending_map_rewrite_and_take() {
        let map = PendingMap::new();
        let caller = ConnectionHandle(7);

        let internal = map.insert(caller, 42, 1000).await;
        assert_ne!(internal, 42);

        let pending = map.take(internal).await.unwrap();
        assert_eq!(pending.caller, caller);
        assert_eq!(pending.original_request_id, 42);
        assert_eq!(pending.inserted_at_ms, 1000);

        // Second take finds nothing
        assert!(map.take(internal).await.is_none());
    }

    #[tokio::test]
    async fn test_pending_map_internal_ids_are_unique() {
        let map = PendingMap::new();
        let caller = ConnectionHandle(1);

        // Two callers using the same original ID never collide internally
        let a = map.insert(caller, 1, 0).await;
        let b = map.insert(ConnectionHandle(2), 1, 0).await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_pending_map_take_older_than() {
        let map = PendingMap::new();
        let caller = ConnectionHandle(1);

        let old = map.insert(caller, 1, 1000).await;
        let fresh = map.insert(caller, 2, 5000).await;

        // At t=10000 with a 6000ms bound, only the t=1000 entry has aged out.
        let expired = map.take_older_than(10_000, 6000).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, old);
        assert_eq!(expired[0].1.original_request_id, 1);

        assert_eq!(map.len().await, 1);
        assert!(map.take(fresh).await.is_some());
    }

    #[tokio::test]
    async fn test_pending_map_drop_for_caller() {
        let map = PendingMap::new();
        let gone = ConnectionHandle(1);
        let alive = ConnectionHandle(2);

        map.insert(gone, 1, 0).await;
        map.insert(gone, 2, 0).await;
        let kept = map.insert(alive, 3, 0).await;

        assert_eq!(map.drop_for_caller(gone).await, 2);
        assert_eq!(map.len().await, 1);
        assert!(map.take(kept).await.is_some());
    }
}
