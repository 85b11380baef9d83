//! The client-side handle for a transaction living on a remote peer.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use tokio_util::sync::CancellationToken;
use url::Url;

use txflow_core::protocol::constants::*;
use txflow_core::protocol::{MessageBuilder, ParamReader};
use txflow_core::{Result, TransactionError};

use crate::channel::TransactionChannel;
use crate::invocation::Invocation;

/// The status of a transaction, with the standard JTA numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TransactionStatus {
    /// The transaction is active.
    Active = 0,
    /// The transaction is marked for rollback only.
    MarkedRollback = 1,
    /// The transaction has been committed.
    Committed = 3,
    /// The transaction has been rolled back.
    RolledBack = 4,
    /// The transaction is in an unknown, possibly completed state.
    Unknown = 5,
    /// No transaction is associated with this handle.
    NoTransaction = 6,
    /// The transaction is in the process of committing.
    Committing = 8,
    /// The transaction is in the process of rolling back.
    RollingBack = 9,
}

impl TransactionStatus {
    /// Returns the numeric JTA status value.
    pub fn value(self) -> i32 {
        self as i32
    }

    /// Creates a status from its numeric JTA value.
    pub fn from_value(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Active,
            1 => Self::MarkedRollback,
            3 => Self::Committed,
            4 => Self::RolledBack,
            5 => Self::Unknown,
            6 => Self::NoTransaction,
            8 => Self::Committing,
            9 => Self::RollingBack,
            _ => return None,
        })
    }

    /// Returns `true` for states no operation can leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Unknown)
    }
}

/// A transaction hosted on a remote peer, driven over the channel's
/// framed request/response protocol.
///
/// The handle is exclusively owned by the client that initiated it, but
/// is safe to share; lifecycle operations on a single handle serialize
/// on an internal mutex, and every wire exchange happens inside that
/// critical section. An optimistic status read outside the mutex vetoes
/// obviously invalid calls without producing wire traffic.
#[derive(Debug)]
pub struct RemoteTransactionHandle {
    id: u32,
    channel: Arc<TransactionChannel>,
    status: AtomicI32,
    op_lock: tokio::sync::Mutex<()>,
    interrupt: CancellationToken,
}

impl RemoteTransactionHandle {
    pub(crate) fn new(id: u32, channel: Arc<TransactionChannel>) -> Arc<Self> {
        Arc::new(Self {
            id,
            channel,
            status: AtomicI32::new(TransactionStatus::NoTransaction.value()),
            op_lock: tokio::sync::Mutex::new(()),
            interrupt: CancellationToken::new(),
        })
    }

    /// Returns the peer-assigned transaction context id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the location of the peer hosting the transaction.
    pub fn location(&self) -> &Url {
        self.channel.location()
    }

    /// Returns the current transaction status.
    pub fn status(&self) -> TransactionStatus {
        TransactionStatus::from_value(self.status.load(Ordering::Acquire))
            .unwrap_or(TransactionStatus::Unknown)
    }

    fn set_status(&self, status: TransactionStatus) {
        self.status.store(status.value(), Ordering::Release);
    }

    /// Collapses a residual intermediate state to `Unknown` so the
    /// handle is never left mid-transition.
    fn collapse_residual(&self, from: TransactionStatus) {
        let _ = self.status.compare_exchange(
            from.value(),
            TransactionStatus::Unknown.value(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Interrupts any operation blocked on a peer response.
    ///
    /// The interrupted operation fails with
    /// [`TransactionError::OperationInterrupted`] and leaves the handle
    /// in the `Unknown` state. The interrupt stays latched.
    pub fn interrupt(&self) {
        self.interrupt.cancel();
    }

    /// Returns `true` once [`interrupt`](Self::interrupt) has been called.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// Begins the transaction on the peer.
    ///
    /// `timeout_secs` is the transaction timeout in seconds; zero means
    /// the peer's default and is not transmitted.
    pub async fn begin(&self, timeout_secs: u32) -> Result<()> {
        if self.status() != TransactionStatus::NoTransaction {
            return Err(TransactionError::InvalidTransactionState);
        }
        let _guard = self.op_lock.lock().await;
        if self.status() != TransactionStatus::NoTransaction {
            // unlikely
            return Err(TransactionError::InvalidTransactionState);
        }
        let result = self.begin_locked(timeout_secs).await;
        self.collapse_residual(TransactionStatus::NoTransaction);
        result
    }

    async fn begin_locked(&self, timeout_secs: u32) -> Result<()> {
        let invocation = self.channel.tracker().add_invocation()?;
        let mut message = MessageBuilder::new(invocation.index(), M_UT_BEGIN);
        message.put_uint_param(P_TXN_CONTEXT, self.id);
        let peer_identity_id = self.channel.peer_identity_id();
        if peer_identity_id != 0 {
            message.put_uint_param(P_SEC_CONTEXT, peer_identity_id);
        }
        if timeout_secs != 0 {
            message.put_uint_param(P_TXN_TIMEOUT, timeout_secs);
        }
        if let Err(error) = self.channel.send(message.finish()).await {
            self.set_status(TransactionStatus::Unknown);
            return Err(error);
        }
        let body = self.await_response(invocation).await?;
        let first = match read_reply(body, M_RESP_UT_BEGIN) {
            Ok(first) => first,
            Err(error) => {
                self.set_status(TransactionStatus::Unknown);
                return Err(error);
            }
        };
        match first {
            None => {
                self.set_status(TransactionStatus::Active);
                tracing::debug!(id = self.id, "remote transaction active");
                Ok(())
            }
            Some(P_UT_IS_EXC) => {
                self.set_status(TransactionStatus::Unknown);
                Err(TransactionError::PeerIllegalStateException)
            }
            Some(P_UT_SYS_EXC) => {
                self.set_status(TransactionStatus::Unknown);
                Err(TransactionError::PeerSystemException)
            }
            Some(P_SEC_EXC) => Err(TransactionError::PeerSecurityException),
            Some(_) => {
                self.set_status(TransactionStatus::Unknown);
                Err(TransactionError::UnknownResponse)
            }
        }
    }

    /// Commits the transaction on the peer.
    ///
    /// A transaction marked rollback-only is rolled back instead and the
    /// call fails with [`TransactionError::RollbackOnlyRollback`].
    pub async fn commit(&self) -> Result<()> {
        let status = self.status();
        if status != TransactionStatus::Active && status != TransactionStatus::MarkedRollback {
            return Err(TransactionError::InvalidTransactionState);
        }
        let _guard = self.op_lock.lock().await;
        let status = self.status();
        if status == TransactionStatus::MarkedRollback {
            self.rollback_locked().await?;
            return Err(TransactionError::RollbackOnlyRollback);
        }
        if status != TransactionStatus::Active {
            return Err(TransactionError::InvalidTransactionState);
        }
        self.set_status(TransactionStatus::Committing);
        let result = self.commit_locked(status).await;
        self.collapse_residual(TransactionStatus::Committing);
        result
    }

    async fn commit_locked(&self, prior: TransactionStatus) -> Result<()> {
        let invocation = self.channel.tracker().add_invocation()?;
        let mut message = MessageBuilder::new(invocation.index(), M_UT_COMMIT);
        message.put_uint_param(P_TXN_CONTEXT, self.id);
        let peer_identity_id = self.channel.peer_identity_id();
        if peer_identity_id != 0 {
            message.put_uint_param(P_SEC_CONTEXT, peer_identity_id);
        }
        if let Err(error) = self.channel.send(message.finish()).await {
            self.set_status(TransactionStatus::Unknown);
            return Err(error);
        }
        let body = self.await_response(invocation).await?;
        let first = match read_reply(body, M_RESP_UT_COMMIT) {
            Ok(first) => first,
            Err(error) => {
                self.set_status(TransactionStatus::Unknown);
                return Err(error);
            }
        };
        match first {
            None => {
                self.set_status(TransactionStatus::Committed);
                tracing::debug!(id = self.id, "remote transaction committed");
                Ok(())
            }
            Some(P_UT_HME_EXC) => {
                self.set_status(TransactionStatus::Unknown);
                Err(TransactionError::PeerHeuristicMixed)
            }
            Some(P_UT_HRE_EXC) => {
                self.set_status(TransactionStatus::Unknown);
                Err(TransactionError::PeerHeuristicRollback)
            }
            Some(P_UT_IS_EXC) => {
                self.set_status(TransactionStatus::Unknown);
                Err(TransactionError::PeerIllegalStateException)
            }
            Some(P_UT_RB_EXC) => {
                self.set_status(TransactionStatus::RolledBack);
                Err(TransactionError::RolledBackByPeer)
            }
            Some(P_UT_SYS_EXC) => {
                self.set_status(TransactionStatus::Unknown);
                Err(TransactionError::PeerSystemException)
            }
            Some(P_SEC_EXC) => {
                self.set_status(prior);
                Err(TransactionError::PeerSecurityException)
            }
            Some(_) => {
                self.set_status(TransactionStatus::Unknown);
                Err(TransactionError::UnknownResponse)
            }
        }
    }

    /// Rolls the transaction back on the peer.
    pub async fn rollback(&self) -> Result<()> {
        let status = self.status();
        if status != TransactionStatus::Active && status != TransactionStatus::MarkedRollback {
            return Err(TransactionError::InvalidTransactionState);
        }
        let _guard = self.op_lock.lock().await;
        self.rollback_locked().await
    }

    async fn rollback_locked(&self) -> Result<()> {
        let status = self.status();
        if status != TransactionStatus::Active && status != TransactionStatus::MarkedRollback {
            return Err(TransactionError::InvalidTransactionState);
        }
        self.set_status(TransactionStatus::RollingBack);
        let result = self.rollback_wire(status).await;
        self.collapse_residual(TransactionStatus::RollingBack);
        result
    }

    async fn rollback_wire(&self, prior: TransactionStatus) -> Result<()> {
        let invocation = self.channel.tracker().add_invocation()?;
        let mut message = MessageBuilder::new(invocation.index(), M_UT_ROLLBACK);
        message.put_uint_param(P_TXN_CONTEXT, self.id);
        let peer_identity_id = self.channel.peer_identity_id();
        if peer_identity_id != 0 {
            message.put_uint_param(P_SEC_CONTEXT, peer_identity_id);
        }
        if let Err(error) = self.channel.send(message.finish()).await {
            self.set_status(TransactionStatus::Unknown);
            return Err(error);
        }
        let body = self.await_response(invocation).await?;
        let first = match read_reply(body, M_RESP_UT_ROLLBACK) {
            Ok(first) => first,
            Err(error) => {
                self.set_status(TransactionStatus::Unknown);
                return Err(error);
            }
        };
        match first {
            None => {
                self.set_status(TransactionStatus::RolledBack);
                tracing::debug!(id = self.id, "remote transaction rolled back");
                Ok(())
            }
            Some(P_UT_IS_EXC) => {
                self.set_status(TransactionStatus::Unknown);
                Err(TransactionError::PeerIllegalStateException)
            }
            Some(P_UT_SYS_EXC) => {
                self.set_status(TransactionStatus::Unknown);
                Err(TransactionError::PeerSystemException)
            }
            Some(P_SEC_EXC) => {
                self.set_status(prior);
                Err(TransactionError::PeerSecurityException)
            }
            Some(_) => {
                self.set_status(TransactionStatus::Unknown);
                Err(TransactionError::UnknownResponse)
            }
        }
    }

    /// Marks the transaction so the only possible outcome is rollback.
    ///
    /// Idempotent; no wire traffic is produced.
    pub async fn set_rollback_only(&self) -> Result<()> {
        let status = self.status();
        if status == TransactionStatus::MarkedRollback {
            return Ok(());
        }
        if status != TransactionStatus::Active {
            return Err(TransactionError::InvalidTransactionState);
        }
        let _guard = self.op_lock.lock().await;
        // re-check under lock
        let status = self.status();
        if status == TransactionStatus::MarkedRollback {
            return Ok(());
        }
        if status != TransactionStatus::Active {
            return Err(TransactionError::InvalidTransactionState);
        }
        self.set_status(TransactionStatus::MarkedRollback);
        Ok(())
    }

    /// Records the loss of the peer: an in-flight transaction whose peer
    /// is unreachable is presumed aborted. Silent in any other state.
    pub async fn disconnect(&self) {
        let _guard = self.op_lock.lock().await;
        let status = self.status();
        if status == TransactionStatus::Active || status == TransactionStatus::MarkedRollback {
            self.set_status(TransactionStatus::RolledBack);
            tracing::debug!(id = self.id, "transaction presumed aborted on channel loss");
        }
    }

    async fn await_response(&self, invocation: Invocation) -> Result<Bytes> {
        tokio::select! {
            biased;
            _ = self.interrupt.cancelled() => {
                self.set_status(TransactionStatus::Unknown);
                Err(TransactionError::OperationInterrupted)
            }
            body = invocation.response() => match body {
                Ok(body) => Ok(body),
                Err(error) => {
                    self.set_status(TransactionStatus::Unknown);
                    Err(error)
                }
            }
        }
    }
}

/// Validates the response opcode and returns the id of the first
/// parameter; the remaining parameters are drained and ignored.
fn read_reply(mut body: Bytes, expected_opcode: u8) -> Result<Option<u8>> {
    if !body.has_remaining() {
        return Err(TransactionError::Protocol);
    }
    if body.get_u8() != expected_opcode {
        return Err(TransactionError::UnknownResponse);
    }
    let mut params = ParamReader::new(body);
    let first = params.next()?.map(|param| param.id());
    params.drain()?;
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_values_are_jta() {
        assert_eq!(TransactionStatus::Active.value(), 0);
        assert_eq!(TransactionStatus::MarkedRollback.value(), 1);
        assert_eq!(TransactionStatus::Committed.value(), 3);
        assert_eq!(TransactionStatus::RolledBack.value(), 4);
        assert_eq!(TransactionStatus::Unknown.value(), 5);
        assert_eq!(TransactionStatus::NoTransaction.value(), 6);
        assert_eq!(TransactionStatus::Committing.value(), 8);
        assert_eq!(TransactionStatus::RollingBack.value(), 9);
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TransactionStatus::Active,
            TransactionStatus::MarkedRollback,
            TransactionStatus::Committed,
            TransactionStatus::RolledBack,
            TransactionStatus::Unknown,
            TransactionStatus::NoTransaction,
            TransactionStatus::Committing,
            TransactionStatus::RollingBack,
        ] {
            assert_eq!(TransactionStatus::from_value(status.value()), Some(status));
        }
        assert_eq!(TransactionStatus::from_value(2), None);
        assert_eq!(TransactionStatus::from_value(42), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(TransactionStatus::Committed.is_terminal());
        assert!(TransactionStatus::RolledBack.is_terminal());
        assert!(TransactionStatus::Unknown.is_terminal());
        assert!(!TransactionStatus::Active.is_terminal());
        assert!(!TransactionStatus::Committing.is_terminal());
        assert!(!TransactionStatus::NoTransaction.is_terminal());
    }

    #[test]
    fn test_read_reply_first_param_decides() {
        let mut builder = MessageBuilder::new(1, M_RESP_UT_COMMIT);
        builder.put_flag_param(P_UT_RB_EXC);
        builder.put_flag_param(P_UT_SYS_EXC);
        let mut frame = builder.finish();
        let _ = frame.get_u16();
        assert_eq!(
            read_reply(frame, M_RESP_UT_COMMIT).unwrap(),
            Some(P_UT_RB_EXC)
        );
    }

    #[test]
    fn test_read_reply_rejects_wrong_opcode() {
        let builder = MessageBuilder::new(1, M_RESP_UT_ROLLBACK);
        let mut frame = builder.finish();
        let _ = frame.get_u16();
        assert!(matches!(
            read_reply(frame, M_RESP_UT_COMMIT),
            Err(TransactionError::UnknownResponse)
        ));
    }

    #[test]
    fn test_read_reply_rejects_truncated_params() {
        // Valid opcode followed by a parameter whose payload is cut off.
        let frame = Bytes::from_static(&[M_RESP_UT_BEGIN, P_TXN_CONTEXT, 0x04, 0x01]);
        assert!(matches!(
            read_reply(frame, M_RESP_UT_BEGIN),
            Err(TransactionError::Protocol)
        ));
    }
}
