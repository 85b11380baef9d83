//! Request/response correlation on a shared channel.
//!
//! Every outbound request is bound to a fresh request id and a one-shot
//! response slot. The channel's inbound pump delivers each response to
//! the slot matching its request id; responses for ids with no waiting
//! invocation are discarded. Closing the tracker wakes every waiter with
//! a failure and refuses further invocations.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::oneshot;

use txflow_core::{Result, TransactionError};

/// Correlates outbound requests with inbound responses.
#[derive(Debug)]
pub struct InvocationTracker {
    slots: Mutex<Slots>,
}

#[derive(Debug)]
struct Slots {
    pending: HashMap<u16, oneshot::Sender<Bytes>>,
    next: u16,
    closed: bool,
}

impl InvocationTracker {
    /// Creates an empty tracker.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(Slots {
                pending: HashMap::new(),
                next: 0,
                closed: false,
            }),
        })
    }

    /// Allocates a fresh request id bound to a one-shot response slot.
    ///
    /// Fails once the channel has been closed.
    pub fn add_invocation(self: &Arc<Self>) -> Result<Invocation> {
        let mut slots = self.lock();
        if slots.closed {
            return Err(TransactionError::ConnectionFailed);
        }
        for _ in 0..=u16::MAX {
            let index = slots.next;
            slots.next = slots.next.wrapping_add(1);
            if let std::collections::hash_map::Entry::Vacant(slot) = slots.pending.entry(index) {
                let (tx, rx) = oneshot::channel();
                slot.insert(tx);
                tracing::trace!(index, "allocated invocation");
                return Ok(Invocation {
                    index,
                    rx: Some(rx),
                    tracker: Arc::clone(self),
                });
            }
        }
        Err(TransactionError::ConnectionFailed)
    }

    /// Delivers a response body to the invocation waiting on `request_id`.
    ///
    /// Responses for stale or unknown ids are dropped.
    pub fn deliver(&self, request_id: u16, body: Bytes) {
        let sender = self.lock().pending.remove(&request_id);
        match sender {
            Some(sender) => {
                // The waiter may have given up; that is not an error.
                let _ = sender.send(body);
            }
            None => {
                tracing::trace!(request_id, "discarding response for stale invocation");
            }
        }
    }

    /// Fails every outstanding invocation and refuses new ones.
    pub fn close(&self) {
        let drained = {
            let mut slots = self.lock();
            slots.closed = true;
            std::mem::take(&mut slots.pending)
        };
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "failing invocations on channel close");
        }
        // Dropping the senders wakes each waiter with a receive failure.
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of invocations currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    fn free(&self, index: u16) {
        self.lock().pending.remove(&index);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A single in-flight request bound to a response slot.
#[derive(Debug)]
pub struct Invocation {
    index: u16,
    rx: Option<oneshot::Receiver<Bytes>>,
    tracker: Arc<InvocationTracker>,
}

impl Invocation {
    /// Returns the request id to place in the outbound message.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Blocks until the response body arrives.
    ///
    /// Fails when the channel closes before a response is delivered.
    pub async fn response(mut self) -> Result<Bytes> {
        let rx = self.rx.take().expect("response polled twice");
        rx.await.map_err(|_| {
            TransactionError::ResponseFailed(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "channel closed before the response arrived",
            ))
        })
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        if self.rx.is_some() {
            self.tracker.free(self.index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_response_is_routed_by_request_id() {
        let tracker = InvocationTracker::new();
        let a = tracker.add_invocation().unwrap();
        let b = tracker.add_invocation().unwrap();
        assert_ne!(a.index(), b.index());

        tracker.deliver(b.index(), Bytes::from_static(b"beta"));
        tracker.deliver(a.index(), Bytes::from_static(b"alpha"));

        assert_eq!(a.response().await.unwrap(), Bytes::from_static(b"alpha"));
        assert_eq!(b.response().await.unwrap(), Bytes::from_static(b"beta"));
    }

    #[tokio::test]
    async fn test_stale_delivery_is_discarded() {
        let tracker = InvocationTracker::new();
        tracker.deliver(17, Bytes::from_static(b"nobody is waiting"));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_invocation_frees_the_slot() {
        let tracker = InvocationTracker::new();
        let invocation = tracker.add_invocation().unwrap();
        assert_eq!(tracker.pending_count(), 1);
        drop(invocation);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_close_wakes_waiters_with_failure() {
        let tracker = InvocationTracker::new();
        let invocation = tracker.add_invocation().unwrap();
        let waiter = tokio::spawn(invocation.response());

        tracker.close();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(TransactionError::ResponseFailed(_))));
    }

    #[tokio::test]
    async fn test_add_after_close_fails() {
        let tracker = InvocationTracker::new();
        tracker.close();
        assert!(matches!(
            tracker.add_invocation(),
            Err(TransactionError::ConnectionFailed)
        ));
    }

    #[tokio::test]
    async fn test_ids_are_not_reused_while_in_flight() {
        let tracker = InvocationTracker::new();
        let invocations: Vec<Invocation> = (0..64)
            .map(|_| tracker.add_invocation().unwrap())
            .collect();
        let mut seen = std::collections::HashSet::new();
        for invocation in &invocations {
            assert!(seen.insert(invocation.index()));
        }
    }
}
