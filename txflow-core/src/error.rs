//! Error types for transaction operations.
//!
//! Boundary errors carry stable `WFTXN%04d` ids in their display form so
//! log readers can grep them; the id is also available programmatically
//! through [`TransactionError::code`] and [`XaErrorKind::code`]. XA-level
//! failures additionally carry the numeric XA error code that the XA
//! contract requires.

use std::fmt;
use std::io;

use thiserror::Error;
use url::Url;

use crate::xa;

/// The system-level error type for transaction operations.
///
/// Covers transport failures, protocol violations, peer-reported
/// exceptions, local state-machine violations and configuration errors.
/// XA verbs use [`XaError`] instead so the numeric XA code is preserved.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// No provider is installed that can reach the given location.
    #[error("WFTXN0004: no transaction provider installed for URI: {0}")]
    NoProviderForUri(Url),

    /// A negative transaction timeout was supplied.
    #[error("WFTXN0006: negative transaction timeout provided")]
    NegativeTransactionTimeout,

    /// Writing the request to the peer failed.
    #[error("WFTXN0011: failed to send protocol message to remote peer")]
    FailedToSend(#[source] io::Error),

    /// The peer failed with a transaction system error.
    #[error("WFTXN0012: the peer threw a system exception; see peer logs for more information")]
    PeerSystemException,

    /// The peer rejected the caller's identity.
    #[error("WFTXN0013: the peer threw a security exception; see peer logs for more information")]
    PeerSecurityException,

    /// The byte stream violated the wire protocol.
    #[error("WFTXN0014: an unexpected protocol error occurred")]
    Protocol,

    /// The operation was interrupted while awaiting the peer.
    #[error("WFTXN0015: the protocol operation was interrupted locally")]
    OperationInterrupted,

    /// The peer rolled the transaction back.
    #[error("WFTXN0016: the remote peer rolled back the transaction")]
    RolledBackByPeer,

    /// A rollback-only transaction was rolled back instead of committed.
    #[error("WFTXN0017: rollback-only transaction rolled back")]
    RollbackOnlyRollback,

    /// The operation is not legal in the transaction's current state.
    #[error("WFTXN0018: invalid transaction state")]
    InvalidTransactionState,

    /// The peer reported a heuristic-mixed outcome.
    #[error("WFTXN0019: the peer reported a heuristic mixed outcome; see peer logs for more information")]
    PeerHeuristicMixed,

    /// The peer reported a heuristic-rollback outcome.
    #[error("WFTXN0020: the peer reported a heuristic rollback outcome; see peer logs for more information")]
    PeerHeuristicRollback,

    /// Local commit was attempted on an imported transaction.
    #[error("WFTXN0031: commit not allowed on imported transaction")]
    CommitOnImported,

    /// Local rollback was attempted on an imported transaction.
    #[error("WFTXN0032: rollback not allowed on imported transaction")]
    RollbackOnImported,

    /// The channel to the peer is no longer usable.
    #[error("WFTXN0042: connection to remote transaction service failed")]
    ConnectionFailed,

    /// The peer sent a response this client does not understand.
    #[error("WFTXN0044: unknown response received from peer")]
    UnknownResponse,

    /// The response could not be received from the peer.
    #[error("WFTXN0045: failed to receive a response from peer")]
    ResponseFailed(#[source] io::Error),

    /// The peer rejected the operation for its transaction state.
    #[error("WFTXN0046: the peer threw an illegal-state exception; see peer logs for more information")]
    PeerIllegalStateException,

    /// No provider is registered for the URI scheme.
    #[error("WFTXN0056: unknown provider for remote transactions with URI scheme \"{0}\"")]
    UnknownProvider(String),

    /// The enlistment handle was already verified.
    #[error("WFTXN0058: this enlistment handle was already enlisted")]
    AlreadyEnlisted,

    /// The enlistment handle was already resolved.
    #[error("WFTXN0059: this enlistment handle was already forgotten")]
    AlreadyForgotten,

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The local transaction provider has no node name configured.
    #[error("no node name configured for the local transaction provider")]
    NoNodeName,

    /// A failure reported by the local transaction engine.
    #[error("transaction engine error: {0}")]
    Engine(#[from] EngineError),

    /// An XA-level failure.
    #[error(transparent)]
    Xa(#[from] XaError),
}

impl TransactionError {
    /// Returns the stable numeric message id, if this error carries one.
    pub fn code(&self) -> Option<u16> {
        Some(match self {
            Self::NoProviderForUri(_) => 4,
            Self::NegativeTransactionTimeout => 6,
            Self::FailedToSend(_) => 11,
            Self::PeerSystemException => 12,
            Self::PeerSecurityException => 13,
            Self::Protocol => 14,
            Self::OperationInterrupted => 15,
            Self::RolledBackByPeer => 16,
            Self::RollbackOnlyRollback => 17,
            Self::InvalidTransactionState => 18,
            Self::PeerHeuristicMixed => 19,
            Self::PeerHeuristicRollback => 20,
            Self::CommitOnImported => 31,
            Self::RollbackOnImported => 32,
            Self::ConnectionFailed => 42,
            Self::UnknownResponse => 44,
            Self::ResponseFailed(_) => 45,
            Self::PeerIllegalStateException => 46,
            Self::UnknownProvider(_) => 56,
            Self::AlreadyEnlisted => 58,
            Self::AlreadyForgotten => 59,
            Self::Xa(e) => return e.kind().code(),
            _ => return None,
        })
    }
}

/// A specialized `Result` type for transaction operations.
pub type Result<T> = std::result::Result<T, TransactionError>;

/// The kind of an XA-level failure.
#[derive(Debug, Clone, Error)]
pub enum XaErrorKind {
    /// Receiving the protocol message failed.
    #[error("WFTXN0025: failed to receive protocol message from remote peer")]
    FailedToReceive,

    /// Sending the protocol message failed.
    #[error("WFTXN0026: failed to send protocol message to remote peer")]
    FailedToSend,

    /// The operation was interrupted while awaiting the peer.
    #[error("WFTXN0027: the protocol operation was interrupted locally")]
    OperationInterrupted,

    /// The byte stream violated the wire protocol.
    #[error("WFTXN0028: an unexpected protocol error occurred")]
    Protocol,

    /// The peer reported an XA failure with the carried code.
    #[error("WFTXN0029: the peer threw an XA exception")]
    Peer,

    /// The verb is not legal for the branch's completion state.
    #[error("WFTXN0018: invalid transaction state")]
    InvalidState,

    /// An invalid XA flag combination was supplied.
    #[error("WFTXN0023: invalid flag value")]
    InvalidFlags,

    /// The peer sent a response this client does not understand.
    #[error("WFTXN0047: unknown XA response received from peer")]
    UnknownResponse,

    /// The response could not be received from the peer.
    #[error("WFTXN0048: failed to receive an XA response from peer")]
    ResponseFailed,

    /// A negative transaction timeout was supplied.
    #[error("WFTXN0049: negative transaction timeout provided")]
    NegativeTimeout,

    /// The peer sent a parameter this client does not recognize.
    #[error("WFTXN0050: unrecognized parameter with ID 0x{id:02x} received")]
    UnrecognizedParameter {
        /// The offending parameter id.
        id: u8,
    },

    /// The peer rejected the caller's identity.
    #[error("WFTXN0013: the peer threw a security exception; see peer logs for more information")]
    PeerSecurity,

    /// The verb targeted a transaction that was not imported.
    #[error("transaction is not an imported transaction")]
    NotImported,

    /// The engine reported a heuristic-mixed outcome.
    #[error("heuristic mixed outcome reported by the transaction engine")]
    HeuristicMixed,

    /// The engine reported a heuristic-commit outcome.
    #[error("heuristic commit outcome reported by the transaction engine")]
    HeuristicCommit,

    /// The engine reported a heuristic-rollback outcome.
    #[error("heuristic rollback outcome reported by the transaction engine")]
    HeuristicRollback,

    /// The branch was rolled back.
    #[error("transaction branch rolled back")]
    RolledBack,

    /// A resource-manager-level failure.
    #[error("resource manager error")]
    ResourceManager,

    /// The peer asks for the operation to be reissued.
    #[error("the operation had no effect and may be reissued")]
    Retry,
}

impl XaErrorKind {
    /// Returns the stable numeric message id, if this kind carries one.
    pub fn code(&self) -> Option<u16> {
        Some(match self {
            Self::FailedToReceive => 25,
            Self::FailedToSend => 26,
            Self::OperationInterrupted => 27,
            Self::Protocol => 28,
            Self::Peer => 29,
            Self::InvalidState => 18,
            Self::InvalidFlags => 23,
            Self::UnknownResponse => 47,
            Self::ResponseFailed => 48,
            Self::NegativeTimeout => 49,
            Self::UnrecognizedParameter { .. } => 50,
            Self::PeerSecurity => 13,
            _ => return None,
        })
    }
}

/// An XA-level failure: an error kind plus the numeric XA error code.
///
/// Deferred failures exposed by the engine's atomic action are carried as
/// suppressed context and preserved through the error chain.
#[derive(Debug, Clone)]
pub struct XaError {
    code: i32,
    kind: XaErrorKind,
    cause: Option<EngineError>,
    suppressed: Vec<EngineError>,
}

impl XaError {
    /// Creates a new XA error with the given code and kind.
    pub fn new(code: i32, kind: XaErrorKind) -> Self {
        Self {
            code,
            kind,
            cause: None,
            suppressed: Vec::new(),
        }
    }

    /// Creates a peer-reported XA error carrying `code`.
    pub fn peer(code: i32) -> Self {
        Self::new(code, XaErrorKind::Peer)
    }

    /// Records the engine failure that caused this error.
    pub fn with_cause(mut self, cause: EngineError) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Attaches suppressed engine failures to this error.
    pub fn with_suppressed(mut self, suppressed: Vec<EngineError>) -> Self {
        self.suppressed = suppressed;
        self
    }

    /// Returns the numeric XA error code.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Returns the error kind.
    pub fn kind(&self) -> &XaErrorKind {
        &self.kind
    }

    /// Returns the engine failure that caused this error, if recorded.
    pub fn cause(&self) -> Option<&EngineError> {
        self.cause.as_ref()
    }

    /// Returns the suppressed engine failures, oldest first.
    pub fn suppressed(&self) -> &[EngineError] {
        &self.suppressed
    }
}

impl fmt::Display for XaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match xa::code_name(self.code) {
            Some(name) => write!(f, "{} [{}]", self.kind, name)?,
            None => write!(f, "{} [XA({})]", self.kind, self.code)?,
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        for err in &self.suppressed {
            write!(f, "; suppressed: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for XaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// A failure reported by the local transaction engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The transaction was rolled back.
    #[error("transaction rolled back")]
    Rollback,

    /// Part of the work was committed and part rolled back.
    #[error("heuristic mixed outcome")]
    HeuristicMixed,

    /// The work was heuristically committed.
    #[error("heuristic commit outcome")]
    HeuristicCommit,

    /// The work was heuristically rolled back.
    #[error("heuristic rollback outcome")]
    HeuristicRollback,

    /// The operation is not legal in the transaction's current state.
    #[error("illegal transaction state")]
    IllegalState,

    /// The transaction is not known to the engine.
    #[error("invalid transaction")]
    InvalidTransaction,

    /// The engine does not support the requested operation.
    #[error("operation not supported")]
    NotSupported,

    /// Any other engine failure.
    #[error("transaction system failure: {0}")]
    System(String),
}
