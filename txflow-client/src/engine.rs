//! Collaborator contracts for the pluggable local transaction-manager
//! engine.
//!
//! The engine itself is out of scope; this module defines the narrow
//! interface the transaction client drives it through, mirroring the
//! shape of the engines it is meant to plug into.

use std::any::Any;
use std::sync::Arc;

use txflow_core::{EngineError, SimpleXid, XaError};

use crate::remote::TransactionStatus;

/// A completion callback registered with a transaction.
pub trait Synchronization: Send + Sync {
    /// Invoked before the two-phase protocol starts.
    fn before_completion(&self);

    /// Invoked after the transaction completes with its final status.
    fn after_completion(&self, status: TransactionStatus);
}

/// Outcome of the engine's first commit phase.
///
/// The numeric shape follows the classic two-phase-outcome code table;
/// only the first four variants steer distinct behavior here, the rest
/// map to a generic rollback error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// The branch prepared successfully.
    Ok,
    /// The branch cannot be prepared and must be rolled back.
    NotOk,
    /// The branch made no changes and was committed during prepare.
    ReadOnly,
    /// The transaction is not known to the engine.
    InvalidTransaction,
    /// The branch was heuristically rolled back.
    HeuristicRollback,
    /// The branch was heuristically committed.
    HeuristicCommit,
    /// The branch saw a mixed heuristic outcome.
    HeuristicMixed,
    /// The branch outcome is hazardous.
    HeuristicHazard,
    /// The branch was not prepared.
    NotPrepared,
    /// A one-phase commit attempt failed.
    OnePhaseError,
}

/// The local transaction-manager engine.
pub trait TransactionEngine: Send + Sync + 'static {
    /// Begins a new transaction in the current association context.
    fn begin(&self) -> Result<(), EngineError>;

    /// Suspends and returns the currently associated transaction.
    fn suspend(&self) -> Option<Arc<dyn EngineTransaction>>;

    /// Resumes association with a previously suspended transaction.
    fn resume(&self, transaction: &Arc<dyn EngineTransaction>) -> Result<(), EngineError>;

    /// Returns the engine's default transaction timeout in seconds.
    fn transaction_timeout(&self) -> u32;

    /// Sets the engine's default transaction timeout in seconds.
    fn set_transaction_timeout(&self, seconds: u32);

    /// Returns the node name this engine identifies as, if configured.
    fn node_name(&self) -> Option<String>;
}

/// A transaction managed by the local engine.
///
/// The `do_*` family drives subordinate two-phase completion and is only
/// meaningful for imported transactions ([`imported`](Self::imported)
/// returns `true`).
pub trait EngineTransaction: Send + Sync + 'static {
    /// Commits the transaction as coordinator.
    fn commit(&self) -> Result<(), EngineError>;

    /// Rolls the transaction back as coordinator.
    fn rollback(&self) -> Result<(), EngineError>;

    /// Marks the transaction so the only possible outcome is rollback.
    fn set_rollback_only(&self) -> Result<(), EngineError>;

    /// Returns the transaction's current status.
    fn status(&self) -> TransactionStatus;

    /// Returns the transaction's branch identifier.
    fn xid(&self) -> SimpleXid;

    /// Returns the transaction's timeout in seconds.
    fn timeout(&self) -> u32;

    /// Returns `true` when this transaction was imported from a peer.
    fn imported(&self) -> bool;

    /// Returns `true` once the imported transaction has local work.
    fn activated(&self) -> bool;

    /// Registers an interposed completion callback.
    fn register_interposed_synchronization(&self, sync: Arc<dyn Synchronization>);

    /// Stores a value in the transaction-local resource slot.
    fn put_tx_resource(&self, key: &'static str, value: Arc<dyn Any + Send + Sync>);

    /// Reads a value from the transaction-local resource slot.
    fn tx_resource(&self, key: &'static str) -> Option<Arc<dyn Any + Send + Sync>>;

    /// Runs before-completion processing; `false` reports failure.
    fn do_before_completion(&self) -> Result<bool, EngineError>;

    /// Runs the first commit phase.
    fn do_prepare(&self) -> PrepareOutcome;

    /// Runs the second commit phase; `false` asks the caller to retry.
    fn do_commit(&self) -> Result<bool, EngineError>;

    /// Commits in a single phase.
    fn do_one_phase_commit(&self) -> Result<(), EngineError>;

    /// Rolls the subordinate branch back.
    fn do_rollback(&self) -> Result<(), EngineError>;

    /// Forgets a heuristically completed branch.
    fn do_forget(&self) -> Result<(), EngineError>;

    /// Failures the engine deferred during completion, oldest first.
    fn deferred_throwables(&self) -> Vec<EngineError>;
}

/// The engine-side terminator for transactions imported from peers.
pub trait XaTerminator: Send + Sync + 'static {
    /// Imports (or joins) the transaction for `xid`, returning the
    /// transaction and whether this call created the import.
    fn import_transaction(
        &self,
        xid: &SimpleXid,
        timeout: u32,
    ) -> Result<(Arc<dyn EngineTransaction>, bool), XaError>;

    /// Looks up an already-imported transaction.
    fn get_transaction(
        &self,
        xid: &SimpleXid,
    ) -> Result<Option<Arc<dyn EngineTransaction>>, XaError>;

    /// Drops an imported transaction from the engine's tables.
    fn remove_imported_transaction(&self, gtid: &SimpleXid);

    /// Returns the in-doubt branches imported from the named parent.
    fn do_recover(
        &self,
        xid: Option<&SimpleXid>,
        parent_name: &str,
    ) -> Result<Vec<SimpleXid>, XaError>;
}
