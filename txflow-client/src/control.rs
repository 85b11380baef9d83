//! Subordinate transaction control.
//!
//! The XA verbs of a subordinate branch go through one capability trait
//! with two implementations: [`ImportedEntry`](crate::registry::ImportedEntry)
//! adapts them onto the local engine, and [`PeerXaControl`] drives them
//! over the wire against a remote peer.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, Bytes};

use txflow_core::protocol::constants::*;
use txflow_core::protocol::{MessageBuilder, Param, ParamReader};
use txflow_core::xa::{XAER_RMERR, XAER_RMFAIL, XA_OK, XA_RDONLY};
use txflow_core::{SimpleXid, XaError, XaErrorKind};

use crate::channel::TransactionChannel;
use crate::registry::ImportedEntry;

/// The verb set of a subordinate transaction branch.
#[async_trait]
pub trait SubordinateControl: Send + Sync {
    /// Dissociates the caller from the branch.
    async fn end(&self, flags: i32) -> Result<(), XaError>;

    /// Runs before-completion processing.
    async fn before_completion(&self) -> Result<(), XaError>;

    /// Runs the first commit phase; returns `XA_OK` or `XA_RDONLY`.
    async fn prepare(&self) -> Result<i32, XaError>;

    /// Runs the second commit phase (or a one-phase commit).
    async fn commit(&self, one_phase: bool) -> Result<(), XaError>;

    /// Rolls the branch back.
    async fn rollback(&self) -> Result<(), XaError>;

    /// Forgets a heuristically completed branch.
    async fn forget(&self) -> Result<(), XaError>;
}

#[async_trait]
impl SubordinateControl for ImportedEntry {
    async fn end(&self, flags: i32) -> Result<(), XaError> {
        ImportedEntry::end(self, flags)
    }

    async fn before_completion(&self) -> Result<(), XaError> {
        ImportedEntry::before_completion(self)
    }

    async fn prepare(&self) -> Result<i32, XaError> {
        ImportedEntry::prepare(self)
    }

    async fn commit(&self, one_phase: bool) -> Result<(), XaError> {
        ImportedEntry::commit(self, one_phase)
    }

    async fn rollback(&self) -> Result<(), XaError> {
        ImportedEntry::rollback(self)
    }

    async fn forget(&self) -> Result<(), XaError> {
        ImportedEntry::forget(self)
    }
}

/// Drives the XA verbs of one branch against a remote peer.
#[derive(Debug)]
pub struct PeerXaControl {
    channel: Arc<TransactionChannel>,
    xid: SimpleXid,
}

impl PeerXaControl {
    /// Binds a control to a branch hosted on the given channel.
    pub fn new(channel: Arc<TransactionChannel>, xid: SimpleXid) -> Self {
        Self { channel, xid }
    }

    /// Returns the branch identifier this control operates on.
    pub fn xid(&self) -> &SimpleXid {
        &self.xid
    }

    async fn invoke(
        &self,
        opcode: u8,
        one_phase: bool,
        xid: Option<&SimpleXid>,
        parent_name: Option<&str>,
    ) -> Result<Bytes, XaError> {
        let invocation = self
            .channel
            .tracker()
            .add_invocation()
            .map_err(|_| XaError::new(XAER_RMFAIL, XaErrorKind::FailedToSend))?;
        let mut message = MessageBuilder::new(invocation.index(), opcode);
        if let Some(xid) = xid {
            message.put_xid_param(P_XID, xid);
        }
        if let Some(parent_name) = parent_name {
            message.put_str_param(P_PARENT_NAME, parent_name);
        }
        let peer_identity_id = self.channel.peer_identity_id();
        if peer_identity_id != 0 {
            message.put_uint_param(P_SEC_CONTEXT, peer_identity_id);
        }
        if one_phase {
            message.put_flag_param(P_ONE_PHASE);
        }
        self.channel
            .send(message.finish())
            .await
            .map_err(|_| XaError::new(XAER_RMFAIL, XaErrorKind::FailedToSend))?;
        invocation
            .response()
            .await
            .map_err(|_| XaError::new(XAER_RMFAIL, XaErrorKind::ResponseFailed))
    }

    /// Validates the response opcode and returns the parameter list.
    fn open_reply(mut body: Bytes, expected_opcode: u8) -> Result<ParamReader, XaError> {
        if !body.has_remaining() {
            return Err(XaError::new(XAER_RMERR, XaErrorKind::Protocol));
        }
        if body.get_u8() != expected_opcode {
            return Err(XaError::new(XAER_RMERR, XaErrorKind::UnknownResponse));
        }
        Ok(ParamReader::new(body))
    }

    /// Interprets a response whose only outcomes are success or error.
    fn interpret_simple(body: Bytes, expected_opcode: u8) -> Result<(), XaError> {
        let mut params = Self::open_reply(body, expected_opcode)?;
        let first = next_param(&mut params)?;
        drain(params)?;
        match first {
            None => Ok(()),
            Some(param) => Err(error_from_param(&param)),
        }
    }

    async fn simple_verb(&self, opcode: u8, one_phase: bool) -> Result<(), XaError> {
        let body = self
            .invoke(opcode, one_phase, Some(&self.xid), None)
            .await?;
        Self::interpret_simple(body, opcode | M_RESP_BIT)
    }

    /// Queries the peer for in-doubt branches imported from `parent_name`.
    pub async fn recover(
        channel: &Arc<TransactionChannel>,
        parent_name: &str,
    ) -> Result<Vec<SimpleXid>, XaError> {
        let control = PeerXaControl {
            channel: Arc::clone(channel),
            xid: SimpleXid::empty(),
        };
        let body = control
            .invoke(M_XA_RECOVER, false, None, Some(parent_name))
            .await?;
        let mut params = Self::open_reply(body, M_RESP_XA_RECOVER)?;
        let mut xids = Vec::new();
        while let Some(param) = next_param(&mut params)? {
            match param.id() {
                P_XID => xids.push(
                    param
                        .as_xid()
                        .map_err(|_| XaError::new(XAER_RMERR, XaErrorKind::Protocol))?,
                ),
                _ => return Err(error_from_param(&param)),
            }
        }
        Ok(xids)
    }
}

#[async_trait]
impl SubordinateControl for PeerXaControl {
    /// The subordinate end path is deliberately a local no-op; the
    /// branch outcome is decided by the two-phase verbs that follow.
    async fn end(&self, _flags: i32) -> Result<(), XaError> {
        Ok(())
    }

    async fn before_completion(&self) -> Result<(), XaError> {
        self.simple_verb(M_XA_BEFORE, false).await
    }

    async fn prepare(&self) -> Result<i32, XaError> {
        let body = self
            .invoke(M_XA_PREPARE, false, Some(&self.xid), None)
            .await?;
        let mut params = Self::open_reply(body, M_RESP_XA_PREPARE)?;
        let first = next_param(&mut params)?;
        drain(params)?;
        match first {
            None => Ok(XA_OK),
            Some(param) if param.id() == P_XA_RDONLY => Ok(XA_RDONLY),
            Some(param) => Err(error_from_param(&param)),
        }
    }

    async fn commit(&self, one_phase: bool) -> Result<(), XaError> {
        self.simple_verb(M_XA_COMMIT, one_phase).await
    }

    async fn rollback(&self) -> Result<(), XaError> {
        self.simple_verb(M_XA_ROLLBACK, false).await
    }

    async fn forget(&self) -> Result<(), XaError> {
        self.simple_verb(M_XA_FORGET, false).await
    }
}

fn next_param(params: &mut ParamReader) -> Result<Option<Param>, XaError> {
    params
        .next()
        .map_err(|_| XaError::new(XAER_RMERR, XaErrorKind::Protocol))
}

fn drain(mut params: ParamReader) -> Result<(), XaError> {
    params
        .drain()
        .map_err(|_| XaError::new(XAER_RMERR, XaErrorKind::Protocol))
}

fn error_from_param(param: &Param) -> XaError {
    match param.id() {
        P_XA_ERROR => match param.as_u32() {
            Ok(code) => XaError::peer(code as i32),
            Err(_) => XaError::new(XAER_RMERR, XaErrorKind::Protocol),
        },
        P_SEC_EXC => XaError::new(XAER_RMFAIL, XaErrorKind::PeerSecurity),
        id => XaError::new(XAER_RMERR, XaErrorKind::UnrecognizedParameter { id }),
    }
}
