//! Conditions a blocked syscall waits on.

use crate::event::EventKey;
use crate::id::{ProcessId, SocketId};
use crate::time::VirtualTime;
use std::fmt;

/// Why a thread is blocked.
///
/// Also the key of the host's waiter registry: a state change notifies every
/// thread registered under the matching reason.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockReason {
    SocketReadable(SocketId),
    SocketWritable(SocketId),
    SocketAcceptable(SocketId),
    SocketConnected(SocketId),
    /// A futex word in the address space of `pid`.
    Futex { pid: ProcessId, addr: u64 },
    /// Some child of process `pid` changed state.
    ChildExit { pid: ProcessId },
    /// Only the deadline can end this wait.
    Timer,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::SocketReadable(id) => write!(f, "readable({id})"),
            BlockReason::SocketWritable(id) => write!(f, "writable({id})"),
            BlockReason::SocketAcceptable(id) => write!(f, "acceptable({id})"),
            BlockReason::SocketConnected(id) => write!(f, "connected({id})"),
            BlockReason::Futex { pid, addr } => write!(f, "futex({pid}, {addr:#x})"),
            BlockReason::ChildExit { pid } => write!(f, "child-exit({pid})"),
            BlockReason::Timer => f.write_str("timer"),
        }
    }
}

/// A blocked syscall's wait: the reason plus its pending events.
///
/// Handlers construct it with [`SyscallCondition::new`] and optionally a
/// deadline; the host fills in the event keys when it parks the thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyscallCondition {
    pub reason: BlockReason,
    /// Absolute deadline requested by the handler.
    pub timeout: Option<VirtualTime>,
    /// Pending wake-up event, at most one.
    pub(crate) wakeup: Option<EventKey>,
    /// Pending deadline event.  Its key's time is the effective deadline.
    pub(crate) deadline: Option<EventKey>,
}

impl SyscallCondition {
    pub fn new(reason: BlockReason) -> Self {
        Self {
            reason,
            timeout: None,
            wakeup: None,
            deadline: None,
        }
    }

    /// A condition that ends at `deadline` (or earlier, if woken).
    pub fn with_deadline(mut self, deadline: VirtualTime) -> Self {
        self.timeout = Some(deadline);
        self
    }

    /// Pure sleep until `deadline`.
    pub fn timer(deadline: VirtualTime) -> Self {
        Self::new(BlockReason::Timer).with_deadline(deadline)
    }

    /// Whether anything can ever end this wait.
    pub fn is_wakeable(&self) -> bool {
        self.reason != BlockReason::Timer || self.timeout.is_some()
    }

    pub fn wakeup_key(&self) -> Option<EventKey> {
        self.wakeup
    }

    pub fn deadline_key(&self) -> Option<EventKey> {
        self.deadline
    }
}

/// How a blocked syscall is being re-entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resumption {
    /// A wake-up event fired; the condition may or may not hold now.
    Woken,
    /// The deadline fired first.
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_without_deadline_is_unwakeable() {
        assert!(!SyscallCondition::new(BlockReason::Timer).is_wakeable());
        assert!(SyscallCondition::timer(VirtualTime::from_nanos(5)).is_wakeable());
        assert!(SyscallCondition::new(BlockReason::SocketReadable(SocketId(1))).is_wakeable());
    }

    #[test]
    fn reason_display() {
        let reason = BlockReason::Futex {
            pid: ProcessId(1000),
            addr: 0x10,
        };
        assert_eq!(reason.to_string(), "futex(pid1000, 0x10)");
    }
}
