//! The imported-transaction registry and its per-entry XA adapter.
//!
//! Transactions imported from remote peers are indexed by global
//! transaction id. Each entry carries the completion-bit interlock that
//! rejects illegal XA call sequences, and an expiration key in an
//! ordered set: once a local transaction completes, peers may still
//! retry or run recovery against its gtid for a bounded window, after
//! which entries are swept in bulk.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Instant;

use txflow_core::xa::{
    TMENDRSCAN, TMSTARTRSCAN, XAER_INVAL, XAER_NOTA, XAER_RMERR, XA_HEURCOM, XA_HEURMIX, XA_HEURRB,
    XA_OK, XA_RBOTHER, XA_RBROLLBACK, XA_RDONLY, XA_RETRY,
};
use txflow_core::{EngineError, SimpleXid, TransactionError, XaError, XaErrorKind};

use crate::engine::{EngineTransaction, PrepareOutcome, Synchronization, XaTerminator};
use crate::remote::TransactionStatus;

/// Key of the per-transaction resource slot holding the entry.
const ENTRY_RESOURCE_KEY: &str = "txflow.imported-entry";

const BIT_BEFORE_COMP: u32 = 1;
const BIT_PREPARE_OR_ROLLBACK: u32 = 1 << 1;
const BIT_COMMIT_OR_FORGET: u32 = 1 << 2;

/// A monotonic time source, injectable for deterministic tests.
pub trait Clock: Send + Sync + 'static {
    /// Nanoseconds since an arbitrary fixed origin.
    fn now_ns(&self) -> u64;
}

/// The default clock, backed by [`Instant`].
#[derive(Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    /// Creates a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
}

/// Orders registry entries by the latest moment any peer might still
/// reference their gtid.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct XidKey {
    expiration_ns: u64,
    gtid: SimpleXid,
}

impl XidKey {
    /// Creates a key expiring at `expiration_ns` on the registry clock.
    pub fn new(gtid: SimpleXid, expiration_ns: u64) -> Self {
        Self {
            expiration_ns,
            gtid,
        }
    }

    /// Returns the expiration instant in clock nanoseconds.
    pub fn expiration_ns(&self) -> u64 {
        self.expiration_ns
    }

    /// Returns the global transaction id.
    pub fn gtid(&self) -> &SimpleXid {
        &self.gtid
    }

    /// The exclusive upper bound for sweeping keys expired at `now_ns`.
    fn sweep_bound(now_ns: u64) -> Self {
        Self {
            expiration_ns: now_ns,
            gtid: SimpleXid::empty(),
        }
    }
}

/// The outcome of importing or resolving a transaction from a peer.
#[derive(Clone)]
pub struct ImportResult {
    transaction: Arc<dyn EngineTransaction>,
    control: Arc<ImportedEntry>,
    newly_imported: bool,
}

impl ImportResult {
    /// Returns the engine transaction backing the import.
    pub fn transaction(&self) -> &Arc<dyn EngineTransaction> {
        &self.transaction
    }

    /// Returns the entry that adapts XA verbs onto the transaction.
    pub fn control(&self) -> &Arc<ImportedEntry> {
        &self.control
    }

    /// Returns `true` when this call created the import.
    pub fn newly_imported(&self) -> bool {
        self.newly_imported
    }
}

/// A registered transaction plus the completion-bit interlock that
/// serializes its XA verb sequence.
///
/// The three bits are monotone: once set they never clear, so any verb
/// arriving after a conflicting one observably fails with `XAER_NOTA`
/// rather than reaching the engine twice.
pub struct ImportedEntry {
    gtid: SimpleXid,
    transaction: Arc<dyn EngineTransaction>,
    completion_bits: AtomicU32,
    xid_key: XidKey,
    terminator: Arc<dyn XaTerminator>,
}

impl ImportedEntry {
    fn new(
        gtid: SimpleXid,
        transaction: Arc<dyn EngineTransaction>,
        xid_key: XidKey,
        terminator: Arc<dyn XaTerminator>,
    ) -> Self {
        Self {
            gtid,
            transaction,
            completion_bits: AtomicU32::new(0),
            xid_key,
            terminator,
        }
    }

    /// Returns the global transaction id.
    pub fn gtid(&self) -> &SimpleXid {
        &self.gtid
    }

    /// Returns the underlying engine transaction.
    pub fn transaction(&self) -> &Arc<dyn EngineTransaction> {
        &self.transaction
    }

    pub(crate) fn xid_key(&self) -> &XidKey {
        &self.xid_key
    }

    /// Sets `set_mask` unless any bit of `fail_mask` is already set.
    fn try_set_bits(&self, fail_mask: u32, set_mask: u32) -> bool {
        let mut old = self.completion_bits.load(Ordering::Acquire);
        loop {
            if old & fail_mask != 0 {
                return false;
            }
            match self.completion_bits.compare_exchange_weak(
                old,
                old | set_mask,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => old = actual,
            }
        }
    }

    fn require_imported(&self) -> Result<(), XaError> {
        if self.transaction.imported() {
            Ok(())
        } else {
            Err(XaError::new(XAER_NOTA, XaErrorKind::NotImported))
        }
    }

    fn deferred(&self) -> Vec<EngineError> {
        self.transaction.deferred_throwables()
    }

    /// Rolls back a locally coordinated transaction.
    pub fn rollback_local(&self) -> Result<(), TransactionError> {
        if self.transaction.imported() {
            return Err(TransactionError::RollbackOnImported);
        }
        if !self.try_set_bits(
            BIT_PREPARE_OR_ROLLBACK,
            BIT_PREPARE_OR_ROLLBACK | BIT_BEFORE_COMP,
        ) {
            return Err(TransactionError::InvalidTransactionState);
        }
        self.transaction.rollback()?;
        Ok(())
    }

    /// Commits a locally coordinated transaction.
    pub fn commit_local(&self) -> Result<(), TransactionError> {
        if self.transaction.imported() {
            return Err(TransactionError::CommitOnImported);
        }
        if !self.try_set_bits(
            BIT_PREPARE_OR_ROLLBACK | BIT_COMMIT_OR_FORGET,
            BIT_COMMIT_OR_FORGET | BIT_PREPARE_OR_ROLLBACK | BIT_BEFORE_COMP,
        ) {
            return Err(TransactionError::InvalidTransactionState);
        }
        self.transaction.commit()?;
        Ok(())
    }

    /// Runs before-completion processing on the imported transaction.
    pub fn before_completion(&self) -> Result<(), XaError> {
        self.require_imported()?;
        if !self.try_set_bits(BIT_BEFORE_COMP, BIT_BEFORE_COMP) {
            return Err(XaError::new(XAER_NOTA, XaErrorKind::InvalidState));
        }
        match self.transaction.do_before_completion() {
            Ok(true) => Ok(()),
            Ok(false) => Err(XaError::new(XAER_RMERR, XaErrorKind::ResourceManager)),
            Err(EngineError::IllegalState) => {
                Err(XaError::new(XAER_NOTA, XaErrorKind::InvalidState)
                    .with_cause(EngineError::IllegalState))
            }
            Err(error) => {
                Err(XaError::new(XAER_RMERR, XaErrorKind::ResourceManager).with_cause(error))
            }
        }
    }

    /// Runs the first commit phase on the imported transaction.
    pub fn prepare(&self) -> Result<i32, XaError> {
        self.require_imported()?;
        if !self.try_set_bits(
            BIT_PREPARE_OR_ROLLBACK,
            BIT_PREPARE_OR_ROLLBACK | BIT_BEFORE_COMP,
        ) {
            return Err(XaError::new(XAER_NOTA, XaErrorKind::InvalidState));
        }
        match self.transaction.do_prepare() {
            PrepareOutcome::ReadOnly => {
                self.terminator.remove_imported_transaction(&self.gtid);
                tracing::debug!(gtid = %self.gtid, "read-only branch committed at prepare");
                Ok(XA_RDONLY)
            }
            PrepareOutcome::Ok => Ok(XA_OK),
            PrepareOutcome::NotOk => {
                let rollback_result = self.transaction.do_rollback();
                self.terminator.remove_imported_transaction(&self.gtid);
                match rollback_result {
                    Ok(()) => Err(XaError::new(XA_RBROLLBACK, XaErrorKind::RolledBack)
                        .with_suppressed(self.deferred())),
                    Err(error) => Err(XaError::new(XAER_RMERR, XaErrorKind::ResourceManager)
                        .with_cause(error)
                        .with_suppressed(self.deferred())),
                }
            }
            PrepareOutcome::InvalidTransaction => {
                Err(XaError::new(XAER_NOTA, XaErrorKind::InvalidState))
            }
            _ => Err(XaError::new(XA_RBOTHER, XaErrorKind::RolledBack)),
        }
    }

    /// Rolls back the imported transaction.
    pub fn rollback(&self) -> Result<(), XaError> {
        self.require_imported()?;
        if !self.try_set_bits(
            BIT_PREPARE_OR_ROLLBACK,
            BIT_PREPARE_OR_ROLLBACK | BIT_BEFORE_COMP,
        ) {
            return Err(XaError::new(XAER_NOTA, XaErrorKind::InvalidState));
        }
        if !self.transaction.activated() {
            return Ok(());
        }
        let result = self.transaction.do_rollback();
        self.terminator.remove_imported_transaction(&self.gtid);
        match result {
            Ok(()) => Ok(()),
            Err(EngineError::HeuristicCommit) => {
                Err(XaError::new(XA_HEURCOM, XaErrorKind::HeuristicCommit)
                    .with_cause(EngineError::HeuristicCommit))
            }
            Err(EngineError::HeuristicMixed) => {
                Err(XaError::new(XA_HEURMIX, XaErrorKind::HeuristicMixed)
                    .with_cause(EngineError::HeuristicMixed))
            }
            Err(EngineError::HeuristicRollback) => {
                Err(XaError::new(XA_HEURRB, XaErrorKind::HeuristicRollback)
                    .with_cause(EngineError::HeuristicRollback))
            }
            Err(EngineError::IllegalState) => {
                Err(XaError::new(XAER_NOTA, XaErrorKind::InvalidState)
                    .with_cause(EngineError::IllegalState))
            }
            Err(error) => {
                Err(XaError::new(XAER_RMERR, XaErrorKind::ResourceManager).with_cause(error))
            }
        }
    }

    /// Runs the second commit phase (or a one-phase commit).
    pub fn commit(&self, one_phase: bool) -> Result<(), XaError> {
        self.require_imported()?;
        let fail_mask = if one_phase {
            BIT_PREPARE_OR_ROLLBACK | BIT_COMMIT_OR_FORGET
        } else {
            BIT_COMMIT_OR_FORGET
        };
        if !self.try_set_bits(
            fail_mask,
            BIT_COMMIT_OR_FORGET | BIT_PREPARE_OR_ROLLBACK | BIT_BEFORE_COMP,
        ) {
            return Err(XaError::new(XAER_NOTA, XaErrorKind::InvalidState));
        }
        let result = if one_phase {
            self.transaction.do_one_phase_commit()
        } else {
            match self.transaction.do_commit() {
                Ok(true) => Ok(()),
                Ok(false) => return Err(XaError::new(XA_RETRY, XaErrorKind::Retry)),
                Err(error) => Err(error),
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                let xa = match &error {
                    EngineError::HeuristicMixed => {
                        XaError::new(XA_HEURMIX, XaErrorKind::HeuristicMixed)
                    }
                    EngineError::Rollback => XaError::new(XA_RBROLLBACK, XaErrorKind::RolledBack),
                    EngineError::HeuristicCommit => {
                        XaError::new(XA_HEURCOM, XaErrorKind::HeuristicCommit)
                    }
                    EngineError::HeuristicRollback => {
                        XaError::new(XA_HEURRB, XaErrorKind::HeuristicRollback)
                    }
                    EngineError::IllegalState => XaError::new(XAER_NOTA, XaErrorKind::InvalidState),
                    _ => XaError::new(XAER_RMERR, XaErrorKind::ResourceManager),
                };
                Err(xa.with_cause(error).with_suppressed(self.deferred()))
            }
        }
    }

    /// Forgets a heuristically completed imported transaction.
    pub fn forget(&self) -> Result<(), XaError> {
        self.require_imported()?;
        if !self.try_set_bits(
            BIT_COMMIT_OR_FORGET,
            BIT_COMMIT_OR_FORGET | BIT_PREPARE_OR_ROLLBACK | BIT_BEFORE_COMP,
        ) {
            return Err(XaError::new(XAER_NOTA, XaErrorKind::InvalidState));
        }
        match self.transaction.do_forget() {
            Ok(()) => Ok(()),
            Err(EngineError::IllegalState) => {
                Err(XaError::new(XAER_NOTA, XaErrorKind::InvalidState)
                    .with_cause(EngineError::IllegalState))
            }
            Err(error) => {
                Err(XaError::new(XAER_RMERR, XaErrorKind::ResourceManager).with_cause(error))
            }
        }
    }

    /// Dissociates the caller from the imported transaction.
    ///
    /// The failure path (`TMFAIL`) intentionally does not mark the
    /// transaction rollback-only; tracked as JBTM-2846.
    pub fn end(&self, _flags: i32) -> Result<(), XaError> {
        self.require_imported()?;
        Ok(())
    }
}

impl std::fmt::Debug for ImportedEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportedEntry")
            .field("gtid", &self.gtid.to_string())
            .field(
                "completion_bits",
                &self.completion_bits.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

struct RegistryShared {
    known: RwLock<HashMap<SimpleXid, Arc<ImportedEntry>>>,
    timeouts: Mutex<BTreeSet<XidKey>>,
    attach_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl RegistryShared {
    fn known_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SimpleXid, Arc<ImportedEntry>>> {
        self.known.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn known_write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<SimpleXid, Arc<ImportedEntry>>> {
        self.known.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn timeouts_lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<XidKey>> {
        self.timeouts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sweeps expired entries whenever any tracked transaction completes.
struct SweepOnCompletion {
    shared: Weak<RegistryShared>,
}

impl Synchronization for SweepOnCompletion {
    fn before_completion(&self) {
        // no operation
    }

    fn after_completion(&self, _status: TransactionStatus) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let now = shared.clock.now_ns();
        let expired: Vec<XidKey> = {
            let mut timeouts = shared.timeouts_lock();
            let remaining = timeouts.split_off(&XidKey::sweep_bound(now));
            std::mem::replace(&mut *timeouts, remaining)
                .into_iter()
                .collect()
        };
        if expired.is_empty() {
            return;
        }
        let mut known = shared.known_write();
        for key in &expired {
            known.remove(key.gtid());
            tracing::debug!(gtid = %key.gtid(), "evicted stale imported transaction");
        }
    }
}

/// The index of transactions imported from remote peers.
pub struct ImportRegistry {
    stale_transaction_time: u32,
    terminator: Arc<dyn XaTerminator>,
    shared: Arc<RegistryShared>,
}

impl ImportRegistry {
    /// Creates a registry with the given stale window (seconds) over the
    /// given terminator and clock.
    pub fn new(
        stale_transaction_time: u32,
        terminator: Arc<dyn XaTerminator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            stale_transaction_time,
            terminator,
            shared: Arc::new(RegistryShared {
                known: RwLock::new(HashMap::new()),
                timeouts: Mutex::new(BTreeSet::new()),
                attach_lock: Mutex::new(()),
                clock,
            }),
        }
    }

    /// Finds the transaction for `xid`, importing it when absent.
    ///
    /// With `do_not_import` the engine is only consulted for an existing
    /// transaction and `None` is returned when there is none. When two
    /// importers race, both observe the same entry, but `newly_imported`
    /// still reports whether this call performed the engine import.
    pub fn find_or_import(
        &self,
        xid: &SimpleXid,
        timeout: u32,
        do_not_import: bool,
    ) -> Result<Option<ImportResult>, XaError> {
        let gtid = xid.without_branch();
        if let Some(entry) = self.shared.known_read().get(&gtid) {
            return Ok(Some(ImportResult {
                transaction: Arc::clone(entry.transaction()),
                control: Arc::clone(entry),
                newly_imported: false,
            }));
        }
        let (transaction, newly_imported) = if do_not_import {
            match self.terminator.get_transaction(xid)? {
                Some(transaction) => (transaction, false),
                None => return Ok(None),
            }
        } else {
            self.terminator.import_transaction(xid, timeout)?
        };
        let entry = self.entry_for(&transaction, gtid.clone());
        let control = {
            let mut known = self.shared.known_write();
            match known.get(&gtid) {
                // A concurrent importer won the race; keep its entry for
                // economy, but report our own import truthfully.
                Some(existing) => Arc::clone(existing),
                None => {
                    known.insert(gtid, Arc::clone(&entry));
                    entry
                }
            }
        };
        Ok(Some(ImportResult {
            transaction,
            control,
            newly_imported,
        }))
    }

    /// Finds an existing transaction for `xid` without importing.
    pub fn find_existing(
        &self,
        xid: &SimpleXid,
    ) -> Result<Option<Arc<dyn EngineTransaction>>, XaError> {
        let gtid = xid.without_branch();
        if let Some(entry) = self.shared.known_read().get(&gtid) {
            return Ok(Some(Arc::clone(entry.transaction())));
        }
        let Some(transaction) = self.terminator.get_transaction(xid)? else {
            return Ok(None);
        };
        let entry = self.entry_for(&transaction, gtid.clone());
        let entry = {
            let mut known = self.shared.known_write();
            Arc::clone(known.entry(gtid).or_insert(entry))
        };
        Ok(Some(Arc::clone(entry.transaction())))
    }

    /// Commits the imported transaction for `xid`.
    pub fn commit(&self, xid: &SimpleXid, one_phase: bool) -> Result<(), XaError> {
        self.entry_of(xid)?.commit(one_phase)
    }

    /// Forgets the imported transaction for `xid`.
    pub fn forget(&self, xid: &SimpleXid) -> Result<(), XaError> {
        self.entry_of(xid)?.forget()
    }

    /// Rolls back the imported transaction for `xid`.
    pub fn rollback(&self, xid: &SimpleXid) -> Result<(), XaError> {
        self.entry_of(xid)?.rollback()
    }

    /// Returns the in-doubt branches imported from the named parent.
    ///
    /// Only the start of a recovery scan consults the engine;
    /// `TMENDRSCAN` and `TMNOFLAGS` answer an empty set.
    pub fn recover(&self, flag: i32, parent_name: &str) -> Result<Vec<SimpleXid>, XaError> {
        if flag & !(TMSTARTRSCAN | TMENDRSCAN) != 0 {
            return Err(XaError::new(XAER_INVAL, XaErrorKind::InvalidFlags));
        }
        if flag & TMSTARTRSCAN == 0 {
            return Ok(Vec::new());
        }
        self.terminator.do_recover(None, parent_name)
    }

    fn entry_of(&self, xid: &SimpleXid) -> Result<Arc<ImportedEntry>, XaError> {
        self.shared
            .known_read()
            .get(&xid.without_branch())
            .cloned()
            .ok_or_else(|| XaError::new(XAER_NOTA, XaErrorKind::InvalidState))
    }

    /// Returns the entry attached to `transaction`, creating and
    /// registering one when this is the first sighting.
    ///
    /// The attach lock makes the slot check-then-put atomic so at most
    /// one entry ever exists per transaction.
    pub(crate) fn entry_for(
        &self,
        transaction: &Arc<dyn EngineTransaction>,
        gtid: SimpleXid,
    ) -> Arc<ImportedEntry> {
        if let Some(entry) = attached_entry(transaction) {
            return entry;
        }
        let (entry, xid_key) = {
            let _guard = self
                .shared
                .attach_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = attached_entry(transaction) {
                return entry;
            }
            let lifetime =
                u64::from(transaction.timeout()) + u64::from(self.stale_transaction_time);
            // The latest moment any incoming peer might still reference
            // this transaction id.
            let expiration = self
                .shared
                .clock
                .now_ns()
                .saturating_add(lifetime.saturating_mul(1_000_000_000));
            let xid_key = XidKey::new(gtid, expiration);
            let entry = Arc::new(ImportedEntry::new(
                xid_key.gtid().clone(),
                Arc::clone(transaction),
                xid_key.clone(),
                Arc::clone(&self.terminator),
            ));
            transaction.put_tx_resource(ENTRY_RESOURCE_KEY, entry.clone());
            (entry, xid_key)
        };
        self.shared.timeouts_lock().insert(xid_key);
        transaction.register_interposed_synchronization(Arc::new(SweepOnCompletion {
            shared: Arc::downgrade(&self.shared),
        }));
        tracing::debug!(gtid = %entry.gtid(), "tracking transaction");
        entry
    }

    /// Registers an entry under its gtid, replacing any previous one.
    pub(crate) fn register(&self, gtid: SimpleXid, entry: Arc<ImportedEntry>) {
        self.shared.known_write().insert(gtid, entry);
    }

    /// Drops the entry and expiration key for `gtid`.
    pub fn remove(&self, gtid: &SimpleXid) {
        let entry = self.shared.known_write().remove(gtid);
        if let Some(entry) = entry {
            self.shared.timeouts_lock().remove(entry.xid_key());
        }
    }

    /// Number of transactions currently indexed.
    pub fn imported_count(&self) -> usize {
        self.shared.known_read().len()
    }

    /// Number of expiration keys awaiting their sweep.
    pub fn expiration_queue_len(&self) -> usize {
        self.shared.timeouts_lock().len()
    }
}

impl std::fmt::Debug for ImportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportRegistry")
            .field("stale_transaction_time", &self.stale_transaction_time)
            .field("imported_count", &self.imported_count())
            .finish_non_exhaustive()
    }
}

fn attached_entry(transaction: &Arc<dyn EngineTransaction>) -> Option<Arc<ImportedEntry>> {
    transaction
        .tx_resource(ENTRY_RESOURCE_KEY)
        .and_then(|any| Arc::downcast::<ImportedEntry>(any).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xid_key_orders_by_expiration_then_gtid() {
        let a = XidKey::new(SimpleXid::new(1, b"aaa", b""), 100);
        let b = XidKey::new(SimpleXid::new(1, b"bbb", b""), 100);
        let c = XidKey::new(SimpleXid::new(1, b"aaa", b""), 200);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_sweep_bound_excludes_same_instant() {
        let key = XidKey::new(SimpleXid::new(1, b"gtid", b""), 100);
        let mut set = BTreeSet::new();
        set.insert(key.clone());

        // Everything strictly below the bound is expired.
        let not_yet = set.split_off(&XidKey::sweep_bound(100));
        assert!(set.is_empty());
        assert_eq!(not_yet.len(), 1);

        let mut set = not_yet;
        let remaining = set.split_off(&XidKey::sweep_bound(101));
        assert_eq!(set.len(), 1);
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now_ns();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(clock.now_ns() > a);
    }
}
