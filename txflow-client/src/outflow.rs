//! Enlistment accounting for outflowed transaction branches.
//!
//! While the outer transaction is being assembled, the same remote
//! branch may be enlisted several times; each enlistment holds an open
//! handle. The branch participates in two-phase commit iff at least one
//! handle verified its enlistment before the enlistment window closed.
//!
//! The whole state packs into one `u32`: bit 31 latches once the outer
//! transaction has moved past the enlistment window, bit 30 latches once
//! any handle verified, and the low 30 bits count open handles. Every
//! transition is a compare-and-set; there are no locks.

use std::sync::atomic::{AtomicU32, Ordering};

/// Latched once the enlistment window has closed.
pub(crate) const FL_COMMITTED: u32 = 1 << 31;

/// Latched once any handle verified its enlistment.
pub(crate) const FL_CONFIRMED: u32 = 1 << 30;

const COUNT_MASK: u32 = FL_CONFIRMED - 1;

/// Opens a new handle. Fails once the enlistment window has closed.
pub(crate) fn open(state: &AtomicU32) -> bool {
    let mut old = state.load(Ordering::Acquire);
    loop {
        if old & FL_COMMITTED != 0 {
            return false;
        }
        debug_assert!(old & COUNT_MASK < COUNT_MASK);
        match state.compare_exchange_weak(old, old + 1, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return true,
            Err(actual) => old = actual,
        }
    }
}

/// Resolves one handle without verifying it.
pub(crate) fn forget_one(state: &AtomicU32) {
    drop_one(state, 0);
}

/// Resolves one handle that enlisted on a non-master branch.
pub(crate) fn non_master_one(state: &AtomicU32) {
    drop_one(state, 0);
}

/// Resolves one handle, recording a verified enlistment.
pub(crate) fn verify_one(state: &AtomicU32) {
    drop_one(state, FL_CONFIRMED);
}

fn drop_one(state: &AtomicU32, extra_flags: u32) {
    let mut old = state.load(Ordering::Acquire);
    loop {
        debug_assert!(old & COUNT_MASK > 0, "no open handle to resolve");
        let new = (old - 1) | extra_flags;
        match state.compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return,
            Err(actual) => old = actual,
        }
    }
}

/// Closes the enlistment window and reports whether any handle verified.
///
/// Idempotent: repeated calls keep returning the same answer, and no
/// further [`open`] succeeds afterwards.
pub(crate) fn commit(state: &AtomicU32) -> bool {
    let mut old = state.load(Ordering::Acquire);
    loop {
        if old & FL_COMMITTED != 0 {
            return old & FL_CONFIRMED != 0;
        }
        match state.compare_exchange_weak(old, old | FL_COMMITTED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => return old & FL_CONFIRMED != 0,
            Err(actual) => old = actual,
        }
    }
}

/// Number of handles currently open.
#[cfg(test)]
pub(crate) fn open_count(state: &AtomicU32) -> u32 {
    state.load(Ordering::Acquire) & COUNT_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_resolve_counts() {
        let state = AtomicU32::new(0);
        assert!(open(&state));
        assert!(open(&state));
        assert!(open(&state));
        assert_eq!(open_count(&state), 3);

        forget_one(&state);
        non_master_one(&state);
        verify_one(&state);
        assert_eq!(open_count(&state), 0);
    }

    #[test]
    fn test_commit_reports_verification() {
        let state = AtomicU32::new(0);
        assert!(open(&state));
        verify_one(&state);
        assert!(commit(&state));
        // latched answer
        assert!(commit(&state));
    }

    #[test]
    fn test_commit_without_verification_is_read_only() {
        let state = AtomicU32::new(0);
        assert!(open(&state));
        forget_one(&state);
        assert!(!commit(&state));
        assert!(!commit(&state));
    }

    #[test]
    fn test_open_fails_after_commit() {
        let state = AtomicU32::new(0);
        assert!(open(&state));
        forget_one(&state);
        assert!(!commit(&state));
        assert!(!open(&state));
    }

    #[test]
    fn test_non_master_does_not_verify() {
        let state = AtomicU32::new(0);
        assert!(open(&state));
        assert!(open(&state));
        non_master_one(&state);
        forget_one(&state);
        assert!(!commit(&state));
    }

    #[test]
    fn test_concurrent_opens_and_verifies() {
        let state = std::sync::Arc::new(AtomicU32::new(0));
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let state = std::sync::Arc::clone(&state);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if open(&state) {
                            if i % 2 == 0 {
                                verify_one(&state);
                            } else {
                                forget_one(&state);
                            }
                        }
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(open_count(&state), 0);
        assert!(commit(&state));
    }
}
