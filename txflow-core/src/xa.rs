//! XA flag and return-code constants from the X/Open XA specification.

/// No flags set.
pub const TMNOFLAGS: i32 = 0x00000000;

/// Caller is joining an existing transaction branch.
pub const TMJOIN: i32 = 0x00200000;

/// Caller is resuming association with a suspended branch.
pub const TMRESUME: i32 = 0x08000000;

/// Dissociate the caller from the branch; work completed successfully.
pub const TMSUCCESS: i32 = 0x04000000;

/// Dissociate the caller from the branch; work failed.
pub const TMFAIL: i32 = 0x20000000;

/// Caller is suspending its association with the branch.
pub const TMSUSPEND: i32 = 0x02000000;

/// Start a recovery scan.
pub const TMSTARTRSCAN: i32 = 0x01000000;

/// End a recovery scan.
pub const TMENDRSCAN: i32 = 0x00800000;

/// Use the one-phase commit optimization.
pub const TMONEPHASE: i32 = 0x40000000;

/// Normal execution.
pub const XA_OK: i32 = 0;

/// The branch was read-only and has been committed during prepare.
pub const XA_RDONLY: i32 = 3;

/// The routine had no effect and may be reissued.
pub const XA_RETRY: i32 = 4;

/// The branch was partially committed and partially rolled back.
pub const XA_HEURMIX: i32 = 5;

/// The branch was heuristically rolled back.
pub const XA_HEURRB: i32 = 6;

/// The branch was heuristically committed.
pub const XA_HEURCOM: i32 = 7;

/// The branch may have been committed or rolled back.
pub const XA_HEURHAZ: i32 = 8;

/// Base of the rollback-reason code range.
pub const XA_RBBASE: i32 = 100;

/// Rollback for an unspecified reason.
pub const XA_RBROLLBACK: i32 = XA_RBBASE;

/// Rollback caused by a communication failure.
pub const XA_RBCOMMFAIL: i32 = XA_RBBASE + 1;

/// Rollback caused by a detected deadlock.
pub const XA_RBDEADLOCK: i32 = XA_RBBASE + 2;

/// Rollback caused by an integrity violation.
pub const XA_RBINTEGRITY: i32 = XA_RBBASE + 3;

/// Rollback for a reason not otherwise listed.
pub const XA_RBOTHER: i32 = XA_RBBASE + 4;

/// Rollback caused by a resource-manager protocol error.
pub const XA_RBPROTO: i32 = XA_RBBASE + 5;

/// Rollback because the branch took too long.
pub const XA_RBTIMEOUT: i32 = XA_RBBASE + 6;

/// Rollback; the branch may be retried.
pub const XA_RBTRANSIENT: i32 = XA_RBBASE + 7;

/// Upper bound of the rollback-reason code range.
pub const XA_RBEND: i32 = XA_RBTRANSIENT;

/// Asynchronous operation already outstanding.
pub const XAER_ASYNC: i32 = -2;

/// A resource-manager error occurred in the branch.
pub const XAER_RMERR: i32 = -3;

/// The xid is not valid.
pub const XAER_NOTA: i32 = -4;

/// Invalid arguments were given.
pub const XAER_INVAL: i32 = -5;

/// The routine was invoked in an improper context.
pub const XAER_PROTO: i32 = -6;

/// The resource manager is unavailable.
pub const XAER_RMFAIL: i32 = -7;

/// The xid is already known to the resource manager.
pub const XAER_DUPID: i32 = -8;

/// The resource manager is doing work outside any transaction.
pub const XAER_OUTSIDE: i32 = -9;

/// Returns the symbolic name of an XA return or error code, or
/// `"XA(<code>)"` formatting material via `None` for unknown codes.
pub fn code_name(code: i32) -> Option<&'static str> {
    Some(match code {
        XA_OK => "XA_OK",
        XA_RDONLY => "XA_RDONLY",
        XA_RETRY => "XA_RETRY",
        XA_HEURMIX => "XA_HEURMIX",
        XA_HEURRB => "XA_HEURRB",
        XA_HEURCOM => "XA_HEURCOM",
        XA_HEURHAZ => "XA_HEURHAZ",
        XA_RBROLLBACK => "XA_RBROLLBACK",
        XA_RBCOMMFAIL => "XA_RBCOMMFAIL",
        XA_RBDEADLOCK => "XA_RBDEADLOCK",
        XA_RBINTEGRITY => "XA_RBINTEGRITY",
        XA_RBOTHER => "XA_RBOTHER",
        XA_RBPROTO => "XA_RBPROTO",
        XA_RBTIMEOUT => "XA_RBTIMEOUT",
        XA_RBTRANSIENT => "XA_RBTRANSIENT",
        XAER_ASYNC => "XAER_ASYNC",
        XAER_RMERR => "XAER_RMERR",
        XAER_NOTA => "XAER_NOTA",
        XAER_INVAL => "XAER_INVAL",
        XAER_PROTO => "XAER_PROTO",
        XAER_RMFAIL => "XAER_RMFAIL",
        XAER_DUPID => "XAER_DUPID",
        XAER_OUTSIDE => "XAER_OUTSIDE",
        _ => return None,
    })
}
