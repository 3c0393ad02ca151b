//! Clone flag classification.

use hostsim_abi::clone::{
    CSIGNAL, EMULATED_FLAGS, NATIVE_FLAGS, REQUIRED_THREAD_FLAGS,
};

/// Result of classifying a thread-creating `clone` flag word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloneFlagCheck {
    /// Required sharing flags that were absent.
    pub missing: u64,
    /// Flags the kernel neither emulates nor passes through.
    pub unhandled: u64,
}

impl CloneFlagCheck {
    pub fn is_acceptable(&self) -> bool {
        self.missing == 0
    }
}

/// Split `flags` into missing-required and unhandled bits.
///
/// The exit-signal byte (`CSIGNAL`) is neither.
///
/// # Examples
///
/// ```
/// use hostsim_abi::clone::PTHREAD_CREATE_FLAGS;
/// use hostsim_kernel::verified::clone::check_thread_flags;
///
/// let check = check_thread_flags(PTHREAD_CREATE_FLAGS);
/// assert!(check.is_acceptable());
/// assert_eq!(check.unhandled, 0);
/// ```
pub fn check_thread_flags(flags: u64) -> CloneFlagCheck {
    let missing = REQUIRED_THREAD_FLAGS & !flags;
    let known = REQUIRED_THREAD_FLAGS | EMULATED_FLAGS | NATIVE_FLAGS | CSIGNAL;
    let unhandled = flags & !known;

    // Postconditions: the two sets are disjoint, and only `missing`
    // overlaps the required set.
    debug_assert!(missing & unhandled == 0);
    debug_assert!(missing & flags == 0);
    debug_assert!(unhandled & REQUIRED_THREAD_FLAGS == 0);
    debug_assert!(unhandled & flags == unhandled);

    CloneFlagCheck { missing, unhandled }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostsim_abi::clone::*;

    #[test]
    fn pthread_flags_are_accepted() {
        let check = check_thread_flags(PTHREAD_CREATE_FLAGS);
        assert_eq!(check, CloneFlagCheck { missing: 0, unhandled: 0 });
    }

    #[test]
    fn each_required_flag_is_individually_required() {
        for bit in 0..64 {
            let flag = 1u64 << bit;
            if REQUIRED_THREAD_FLAGS & flag == 0 {
                continue;
            }
            let check = check_thread_flags(REQUIRED_THREAD_FLAGS & !flag);
            assert_eq!(check.missing, flag);
            assert!(!check.is_acceptable());
        }
    }

    #[test]
    fn unknown_flags_are_reported_not_rejected() {
        let check = check_thread_flags(REQUIRED_THREAD_FLAGS | CLONE_VFORK | CLONE_PTRACE);
        assert!(check.is_acceptable());
        assert_eq!(check.unhandled, CLONE_VFORK | CLONE_PTRACE);
    }

    #[test]
    fn exit_signal_byte_is_ignored() {
        let check = check_thread_flags(REQUIRED_THREAD_FLAGS | 17);
        assert_eq!(check.unhandled, 0);
    }

    #[test]
    fn fork_style_flags_miss_everything() {
        let check = check_thread_flags(17);
        assert_eq!(check.missing, REQUIRED_THREAD_FLAGS);
    }
}
