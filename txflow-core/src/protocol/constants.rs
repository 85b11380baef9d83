//! Protocol constants for the transaction wire protocol.
//!
//! All numeric values here are part of the external wire contract and
//! must not change between releases.

/// Capability exchange request.
pub const M_CAPABILITY: u8 = 0x00;

/// Begin a remote user transaction.
pub const M_UT_BEGIN: u8 = 0x01;

/// Roll back a remote user transaction.
pub const M_UT_ROLLBACK: u8 = 0x02;

/// Commit a remote user transaction.
pub const M_UT_COMMIT: u8 = 0x03;

/// Roll back a subordinate transaction branch.
pub const M_XA_ROLLBACK: u8 = 0x04;

/// Run before-completion processing on a subordinate branch.
pub const M_XA_BEFORE: u8 = 0x05;

/// Prepare a subordinate branch (first phase of 2PC).
pub const M_XA_PREPARE: u8 = 0x06;

/// Forget a heuristically completed subordinate branch.
pub const M_XA_FORGET: u8 = 0x07;

/// Commit a subordinate branch (second phase, or one-phase).
pub const M_XA_COMMIT: u8 = 0x08;

/// Query the peer for in-doubt transaction branches.
pub const M_XA_RECOVER: u8 = 0x09;

/// Mark a subordinate branch rollback-only.
pub const M_XA_RB_ONLY: u8 = 0x0a;

/// Bit set on every response opcode.
pub const M_RESP_BIT: u8 = 0x10;

/// Capability exchange response.
pub const M_RESP_CAPABILITY: u8 = M_CAPABILITY | M_RESP_BIT;

/// Response to [`M_UT_BEGIN`].
pub const M_RESP_UT_BEGIN: u8 = M_UT_BEGIN | M_RESP_BIT;

/// Response to [`M_UT_ROLLBACK`].
pub const M_RESP_UT_ROLLBACK: u8 = M_UT_ROLLBACK | M_RESP_BIT;

/// Response to [`M_UT_COMMIT`].
pub const M_RESP_UT_COMMIT: u8 = M_UT_COMMIT | M_RESP_BIT;

/// Response to [`M_XA_ROLLBACK`].
pub const M_RESP_XA_ROLLBACK: u8 = M_XA_ROLLBACK | M_RESP_BIT;

/// Response to [`M_XA_BEFORE`].
pub const M_RESP_XA_BEFORE: u8 = M_XA_BEFORE | M_RESP_BIT;

/// Response to [`M_XA_PREPARE`].
pub const M_RESP_XA_PREPARE: u8 = M_XA_PREPARE | M_RESP_BIT;

/// Response to [`M_XA_FORGET`].
pub const M_RESP_XA_FORGET: u8 = M_XA_FORGET | M_RESP_BIT;

/// Response to [`M_XA_COMMIT`].
pub const M_RESP_XA_COMMIT: u8 = M_XA_COMMIT | M_RESP_BIT;

/// Response to [`M_XA_RECOVER`].
pub const M_RESP_XA_RECOVER: u8 = M_XA_RECOVER | M_RESP_BIT;

/// Response to [`M_XA_RB_ONLY`].
pub const M_RESP_XA_RB_ONLY: u8 = M_XA_RB_ONLY | M_RESP_BIT;

// Parameter ids. Each parameter is encoded as the id byte, a packed-u32
// payload length, and the payload.

/// A transaction branch identifier (xid payload encoding).
pub const P_XID: u8 = 0x00;

/// UTF-8 parent node name.
pub const P_PARENT_NAME: u8 = 0x01;

/// Unsigned transaction timeout in seconds; omitted when zero.
pub const P_TXN_TIMEOUT: u8 = 0x02;

/// Unsigned transaction context id.
pub const P_TXN_CONTEXT: u8 = 0x03;

/// Flag: one-phase commit requested.
pub const P_ONE_PHASE: u8 = 0x04;

/// Unsigned XA error code reported by the peer.
pub const P_XA_ERROR: u8 = 0x05;

/// Flag: the peer failed with a transaction system error.
pub const P_UT_SYS_EXC: u8 = 0x06;

/// Flag: the peer rolled the transaction back.
pub const P_UT_RB_EXC: u8 = 0x07;

/// Flag: the peer reported a heuristic-mixed outcome.
pub const P_UT_HME_EXC: u8 = 0x08;

/// Flag: the peer reported a heuristic-rollback outcome.
pub const P_UT_HRE_EXC: u8 = 0x09;

/// Flag: the peer rejected the operation for its transaction state.
pub const P_UT_IS_EXC: u8 = 0x0a;

/// Flag: the branch was read-only; prepare committed it.
pub const P_XA_RDONLY: u8 = 0x0b;

/// Flag: the peer rejected the caller's identity.
pub const P_SEC_EXC: u8 = 0x0c;

/// Unsigned peer-identity id; omitted when zero.
pub const P_SEC_CONTEXT: u8 = 0x0d;

/// Size of the request-id prefix on every message.
pub const REQUEST_ID_SIZE: usize = 2;
