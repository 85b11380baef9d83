//! The local XA resource facade for a remote transaction branch.
//!
//! One resource exists per outflowed branch. While the outer transaction
//! is being assembled the application may enlist the branch repeatedly;
//! each enlistment returns an [`XaOutflowHandle`] that must be resolved
//! exactly once. The branch takes part in two-phase commit iff at least
//! one handle verified its enlistment; otherwise `prepare` answers
//! `XA_RDONLY` locally and no wire traffic is produced.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use url::Url;

use txflow_core::xa::{TMENDRSCAN, TMFAIL, TMJOIN, TMNOFLAGS, TMSTARTRSCAN, TMSUCCESS, XAER_INVAL, XAER_RMFAIL, XA_RDONLY};
use txflow_core::{Result, SimpleXid, TransactionError, XaError, XaErrorKind};

use crate::control::{PeerXaControl, SubordinateControl};
use crate::outflow;
use crate::provider::ProviderRegistry;

const DEFAULT_TIMEOUT: u32 = 43_200; // 12 hours

/// The local XA resource representing a remote branch enlisted in an
/// outer transaction.
///
/// Only `(location, parent_name)` survives serialization; a resource
/// reconstructed for recovery starts with a clear enlistment word and
/// the default timeout.
pub struct SubordinateXaResource {
    location: Url,
    parent_name: String,
    timeout: AtomicU32,
    start_time: Mutex<Option<Instant>>,
    captured_timeout: AtomicU32,
    xid: Mutex<Option<SimpleXid>>,
    state: AtomicU32,
}

impl SubordinateXaResource {
    /// Creates a resource for the branch hosted at `location`,
    /// coordinated by the node named `parent_name`.
    pub fn new(location: Url, parent_name: impl Into<String>) -> Self {
        Self {
            location,
            parent_name: parent_name.into(),
            timeout: AtomicU32::new(DEFAULT_TIMEOUT),
            start_time: Mutex::new(None),
            captured_timeout: AtomicU32::new(0),
            xid: Mutex::new(None),
            state: AtomicU32::new(0),
        }
    }

    /// Returns the location of the peer hosting the branch.
    pub fn location(&self) -> &Url {
        &self.location
    }

    /// Returns the name of the coordinating parent node.
    pub fn parent_name(&self) -> &str {
        &self.parent_name
    }

    /// Returns the branch identifier, once `start` has associated one.
    pub fn xid(&self) -> Option<SimpleXid> {
        self.lock_xid().clone()
    }

    /// Opens a new enlistment handle for `xid`.
    ///
    /// Fails once the outer transaction has moved past the enlistment
    /// window.
    pub fn add_handle(self: &Arc<Self>, xid: SimpleXid) -> Result<XaOutflowHandle> {
        if !outflow::open(&self.state) {
            return Err(TransactionError::InvalidTransactionState);
        }
        Ok(XaOutflowHandle {
            resource: Arc::clone(self),
            xid,
            done: AtomicBool::new(false),
        })
    }

    /// Closes the enlistment window, reporting whether any handle
    /// verified its enlistment.
    pub(crate) fn commit_to_enlistment(&self) -> bool {
        outflow::commit(&self.state)
    }

    /// Associates the branch and captures the running timeout.
    pub async fn start(&self, xid: SimpleXid, flags: i32) -> std::result::Result<(), XaError> {
        if flags == TMJOIN {
            // joining an outflowed branch is never generated
            return Err(XaError::new(XAER_INVAL, XaErrorKind::InvalidFlags));
        }
        *self
            .start_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        self.captured_timeout
            .store(self.timeout.load(Ordering::Acquire), Ordering::Release);
        self.control_for(&xid).await?;
        *self.lock_xid() = Some(xid);
        Ok(())
    }

    /// Dissociates the caller from the branch.
    pub async fn end(&self, xid: &SimpleXid, flags: i32) -> std::result::Result<(), XaError> {
        if flags == TMSUCCESS || flags == TMFAIL {
            self.control_for(xid).await?.end(flags).await?;
        }
        Ok(())
    }

    /// Runs before-completion processing on the branch, if it enlisted.
    pub async fn before_completion(&self, xid: &SimpleXid) -> std::result::Result<(), XaError> {
        if self.commit_to_enlistment() {
            self.control_for(xid).await?.before_completion().await?;
        }
        Ok(())
    }

    /// Prepares the branch.
    ///
    /// Answers `XA_RDONLY` locally when no enlistment was verified.
    pub async fn prepare(&self, xid: &SimpleXid) -> std::result::Result<i32, XaError> {
        if self.commit_to_enlistment() {
            self.control_for(xid).await?.prepare().await
        } else {
            tracing::debug!(location = %self.location, "unverified branch is read-only");
            Ok(XA_RDONLY)
        }
    }

    /// Commits the branch, if it enlisted.
    pub async fn commit(&self, xid: &SimpleXid, one_phase: bool) -> std::result::Result<(), XaError> {
        if self.commit_to_enlistment() {
            self.control_for(xid).await?.commit(one_phase).await?;
        }
        Ok(())
    }

    /// Rolls the branch back, if it enlisted.
    pub async fn rollback(&self, xid: &SimpleXid) -> std::result::Result<(), XaError> {
        if self.commit_to_enlistment() {
            self.control_for(xid).await?.rollback().await?;
        }
        Ok(())
    }

    /// Forgets the branch, if it enlisted.
    pub async fn forget(&self, xid: &SimpleXid) -> std::result::Result<(), XaError> {
        if self.commit_to_enlistment() {
            self.control_for(xid).await?.forget().await?;
        }
        Ok(())
    }

    /// Scans the peer for in-doubt branches under this resource's
    /// parent name.
    pub async fn recover(&self, flags: i32) -> std::result::Result<Vec<SimpleXid>, XaError> {
        self.recover_for_parent(flags, &self.parent_name).await
    }

    /// Scans the peer for in-doubt branches under `parent_name`.
    ///
    /// Only the start of a scan reaches the peer; `TMENDRSCAN` and
    /// `TMNOFLAGS` answer an empty set locally.
    pub async fn recover_for_parent(
        &self,
        flags: i32,
        parent_name: &str,
    ) -> std::result::Result<Vec<SimpleXid>, XaError> {
        if flags & !(TMSTARTRSCAN | TMENDRSCAN) != TMNOFLAGS {
            return Err(XaError::new(XAER_INVAL, XaErrorKind::InvalidFlags));
        }
        if flags & TMSTARTRSCAN == 0 {
            return Ok(Vec::new());
        }
        let channel = self.channel().await?;
        PeerXaControl::recover(&channel, parent_name).await
    }

    /// Two resources manage the same branch iff they point at the same
    /// location.
    pub fn is_same_rm(&self, other: &SubordinateXaResource) -> bool {
        self.location == other.location
    }

    /// Returns the configured transaction timeout in seconds.
    pub fn transaction_timeout(&self) -> u32 {
        self.timeout.load(Ordering::Acquire)
    }

    /// Sets the transaction timeout in seconds; zero restores the
    /// default, negative values are rejected.
    pub fn set_transaction_timeout(&self, seconds: i32) -> std::result::Result<bool, XaError> {
        if seconds < 0 {
            return Err(XaError::new(XAER_INVAL, XaErrorKind::NegativeTimeout));
        }
        let timeout = if seconds == 0 {
            DEFAULT_TIMEOUT
        } else {
            seconds as u32
        };
        self.timeout.store(timeout, Ordering::Release);
        Ok(true)
    }

    /// Seconds left of the timeout captured at `start`, clamped at zero.
    pub fn remaining_time(&self) -> u32 {
        let captured = self.captured_timeout.load(Ordering::Acquire);
        let elapsed = self
            .started_at()
            .map(|start| start.elapsed().as_secs())
            .unwrap_or(0);
        captured.saturating_sub(elapsed.min(u64::from(captured)) as u32)
    }

    async fn control_for(
        &self,
        xid: &SimpleXid,
    ) -> std::result::Result<Arc<dyn SubordinateControl>, XaError> {
        let channel = self.channel().await?;
        Ok(Arc::new(PeerXaControl::new(channel, xid.clone())))
    }

    async fn channel(
        &self,
    ) -> std::result::Result<Arc<crate::channel::TransactionChannel>, XaError> {
        let provider = ProviderRegistry::global()
            .provider_for(&self.location)
            .map_err(|error| {
                tracing::warn!(location = %self.location, error = %error, "no provider for branch location");
                XaError::new(XAER_RMFAIL, XaErrorKind::ResourceManager)
            })?;
        provider.channel_for(&self.location).await.map_err(|error| {
            tracing::warn!(location = %self.location, error = %error, "failed to reach branch location");
            XaError::new(XAER_RMFAIL, XaErrorKind::ResourceManager)
        })
    }

    fn lock_xid(&self) -> std::sync::MutexGuard<'_, Option<SimpleXid>> {
        self.xid.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn started_at(&self) -> Option<Instant> {
        *self
            .start_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SubordinateXaResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubordinateXaResource")
            .field("location", &self.location.as_str())
            .field("parent_name", &self.parent_name)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for SubordinateXaResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subordinate XA resource at {}", self.location)
    }
}

/// Only the recovery-relevant identity of the resource is persisted.
#[derive(Serialize, Deserialize)]
#[serde(rename = "SubordinateXaResource")]
struct PersistentForm {
    location: Url,
    parent_name: String,
}

impl Serialize for SubordinateXaResource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        PersistentForm {
            location: self.location.clone(),
            parent_name: self.parent_name.clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SubordinateXaResource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let form = PersistentForm::deserialize(deserializer)?;
        Ok(Self::new(form.location, form.parent_name))
    }
}

/// One enlistment of a remote branch into the outer transaction.
///
/// Must be resolved exactly once by one of the three methods; any second
/// resolution fails.
#[derive(Debug)]
pub struct XaOutflowHandle {
    resource: Arc<SubordinateXaResource>,
    xid: SimpleXid,
    done: AtomicBool,
}

impl XaOutflowHandle {
    /// Returns the branch identifier this enlistment is for.
    pub fn xid(&self) -> &SimpleXid {
        &self.xid
    }

    /// Seconds left of the branch timeout, clamped at zero.
    pub fn remaining_time(&self) -> u32 {
        self.resource.remaining_time()
    }

    /// Resolves the handle without affecting the enlistment.
    pub fn forget_enlistment(&self) -> Result<()> {
        if self.resolve() {
            outflow::forget_one(&self.resource.state);
            Ok(())
        } else {
            Err(TransactionError::AlreadyForgotten)
        }
    }

    /// Resolves the handle for a caller that was not the enlisting
    /// master; the branch does not become 2PC-relevant through it.
    pub fn non_master_enlistment(&self) -> Result<()> {
        if self.resolve() {
            outflow::non_master_one(&self.resource.state);
            Ok(())
        } else {
            Err(TransactionError::AlreadyForgotten)
        }
    }

    /// Resolves the handle, confirming the enlistment: the branch will
    /// participate in two-phase commit.
    pub fn verify_enlistment(&self) -> Result<()> {
        if self.resolve() {
            outflow::verify_one(&self.resource.state);
            Ok(())
        } else {
            Err(TransactionError::AlreadyEnlisted)
        }
    }

    fn resolve(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource() -> Arc<SubordinateXaResource> {
        Arc::new(SubordinateXaResource::new(
            Url::parse("remote+tcp://peer.example:7777/").unwrap(),
            "node-a",
        ))
    }

    #[test]
    fn test_default_timeout() {
        let resource = resource();
        assert_eq!(resource.transaction_timeout(), 43_200);
    }

    #[test]
    fn test_set_timeout_zero_restores_default() {
        let resource = resource();
        assert!(resource.set_transaction_timeout(30).unwrap());
        assert_eq!(resource.transaction_timeout(), 30);
        assert!(resource.set_transaction_timeout(0).unwrap());
        assert_eq!(resource.transaction_timeout(), 43_200);
    }

    #[test]
    fn test_negative_timeout_rejected() {
        let resource = resource();
        let err = resource.set_transaction_timeout(-1).unwrap_err();
        assert_eq!(err.code(), txflow_core::xa::XAER_INVAL);
    }

    #[test]
    fn test_remaining_time_before_start_is_zero() {
        let resource = resource();
        assert_eq!(resource.remaining_time(), 0);
    }

    #[test]
    fn test_is_same_rm_is_location_equality() {
        let a = resource();
        let b = resource();
        let c = Arc::new(SubordinateXaResource::new(
            Url::parse("remote+tcp://other.example:7777/").unwrap(),
            "node-a",
        ));
        assert!(a.is_same_rm(&b));
        assert!(!a.is_same_rm(&c));
    }

    #[test]
    fn test_handle_single_resolution() {
        let resource = resource();
        let handle = resource.add_handle(SimpleXid::generate(0)).unwrap();
        handle.verify_enlistment().unwrap();
        assert!(matches!(
            handle.verify_enlistment(),
            Err(TransactionError::AlreadyEnlisted)
        ));
        assert!(matches!(
            handle.forget_enlistment(),
            Err(TransactionError::AlreadyForgotten)
        ));
    }

    #[test]
    fn test_no_new_handles_after_commit_latch() {
        let resource = resource();
        let handle = resource.add_handle(SimpleXid::generate(0)).unwrap();
        handle.verify_enlistment().unwrap();
        assert!(resource.commit_to_enlistment());
        assert!(matches!(
            resource.add_handle(SimpleXid::generate(0)),
            Err(TransactionError::InvalidTransactionState)
        ));
    }

    #[test]
    fn test_serde_persists_identity_only() {
        let resource = resource();
        resource.set_transaction_timeout(5).unwrap();
        let handle = resource.add_handle(SimpleXid::generate(0)).unwrap();
        handle.verify_enlistment().unwrap();

        let json = serde_json::to_string(&*resource).unwrap();
        let restored: SubordinateXaResource = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.location(), resource.location());
        assert_eq!(restored.parent_name(), "node-a");
        assert_eq!(restored.transaction_timeout(), 43_200);
        assert_eq!(restored.state.load(Ordering::Acquire), 0);
        assert!(restored.xid().is_none());
    }
}
