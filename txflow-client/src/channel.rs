//! The transaction channel: a framed message connection to one peer.
//!
//! The transport itself (sockets, multiplexing, reconnection) is the
//! caller's concern; the channel layers request/response correlation,
//! context-id allocation and close propagation on top of any
//! [`Transport`] implementation.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use tokio_util::sync::CancellationToken;
use url::Url;

use txflow_core::{Result, TransactionError};

use crate::invocation::InvocationTracker;
use crate::remote::RemoteTransactionHandle;

/// A framed, ordered, bidirectional byte-frame transport to a peer.
///
/// `recv` returning `Ok(None)` signals an orderly close; any error is
/// treated as channel loss. Implementations must tolerate concurrent
/// `send` calls; `recv` is only ever driven by the channel's pump task.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one frame to the peer.
    async fn send(&self, frame: Bytes) -> io::Result<()>;

    /// Receives the next inbound frame, or `None` on orderly close.
    async fn recv(&self) -> io::Result<Option<Bytes>>;
}

/// A connection to a remote transaction peer.
///
/// Cheap to share; all lifecycle state lives behind atomics and the
/// invocation tracker. When the transport is lost every outstanding
/// invocation is failed and every hosted transaction handle is
/// disconnected: a transaction whose peer is unreachable is presumed
/// aborted.
pub struct TransactionChannel {
    transport: Arc<dyn Transport>,
    tracker: Arc<InvocationTracker>,
    location: Url,
    peer_identity_id: u32,
    next_context_id: AtomicU32,
    handles: Mutex<Vec<Weak<RemoteTransactionHandle>>>,
    closed: CancellationToken,
}

impl TransactionChannel {
    /// Opens a channel over the given transport and starts its inbound
    /// pump task on the current tokio runtime.
    pub fn open(transport: Arc<dyn Transport>, location: Url, peer_identity_id: u32) -> Arc<Self> {
        let channel = Arc::new(Self {
            transport: Arc::clone(&transport),
            tracker: InvocationTracker::new(),
            location,
            peer_identity_id,
            next_context_id: AtomicU32::new(1),
            handles: Mutex::new(Vec::new()),
            closed: CancellationToken::new(),
        });
        tokio::spawn(Self::pump(transport, Arc::downgrade(&channel)));
        channel
    }

    async fn pump(transport: Arc<dyn Transport>, channel: Weak<TransactionChannel>) {
        loop {
            match transport.recv().await {
                Ok(Some(frame)) => {
                    let Some(channel) = channel.upgrade() else {
                        return;
                    };
                    channel.route(frame);
                }
                Ok(None) => {
                    tracing::debug!("transaction channel closed by peer");
                    break;
                }
                Err(error) => {
                    tracing::debug!(error = %error, "transaction channel lost");
                    break;
                }
            }
        }
        if let Some(channel) = channel.upgrade() {
            channel.handle_close().await;
        }
    }

    fn route(&self, mut frame: Bytes) {
        if frame.len() < 2 {
            tracing::trace!(len = frame.len(), "dropping undersized frame");
            return;
        }
        let request_id = frame.get_u16();
        self.tracker.deliver(request_id, frame);
    }

    async fn handle_close(&self) {
        // Waiters first: any operation blocked on a response fails and
        // releases its handle lock before the handles are swept.
        self.tracker.close();
        let handles = std::mem::take(&mut *self.lock_handles());
        for handle in handles {
            if let Some(handle) = handle.upgrade() {
                handle.disconnect().await;
            }
        }
        self.closed.cancel();
    }

    /// Returns the peer location this channel is connected to.
    pub fn location(&self) -> &Url {
        &self.location
    }

    /// Returns the authenticated peer-identity id, or 0 when anonymous.
    pub fn peer_identity_id(&self) -> u32 {
        self.peer_identity_id
    }

    /// Returns a token that fires when the channel is lost.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Creates a handle for a new transaction hosted on this channel.
    ///
    /// The handle starts in the no-transaction state; drive it with
    /// [`RemoteTransactionHandle::begin`].
    pub fn new_transaction(self: &Arc<Self>) -> Arc<RemoteTransactionHandle> {
        let id = self.next_context_id.fetch_add(1, Ordering::Relaxed);
        let handle = RemoteTransactionHandle::new(id, Arc::clone(self));
        self.lock_handles().push(Arc::downgrade(&handle));
        handle
    }

    pub(crate) fn tracker(&self) -> &Arc<InvocationTracker> {
        &self.tracker
    }

    pub(crate) async fn send(&self, frame: Bytes) -> Result<()> {
        self.transport
            .send(frame)
            .await
            .map_err(TransactionError::FailedToSend)
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Vec<Weak<RemoteTransactionHandle>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TransactionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionChannel")
            .field("location", &self.location.as_str())
            .field("peer_identity_id", &self.peer_identity_id)
            .finish_non_exhaustive()
    }
}
