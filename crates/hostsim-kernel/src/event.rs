//! Simulation events.
//!
//! Every effect that crosses a point in virtual time is an [`Event`].  Events
//! are totally ordered by their [`EventKey`], which never depends on the
//! order in which they were inserted or on which worker inserted them.

use crate::id::{HostId, ThreadId};
use crate::net::packet::Packet;
use crate::time::VirtualTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Total order over events.
///
/// Field order is significant: `derive(Ord)` compares fire time first, then
/// the scheduling host's fixed priority, then that host's sequence number.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EventKey {
    pub time: VirtualTime,
    pub origin_host: HostId,
    pub origin_seq: u64,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, #{})", self.time, self.origin_host, self.origin_seq)
    }
}

/// What happens when an event fires.
#[derive(Clone, Debug)]
pub enum EventKind {
    /// Launch the configured process with this launch index.
    StartProcess { launch: usize },
    /// Kill the process started from this launch index, if still running.
    StopProcess { launch: usize },
    /// First run of a newly created thread.
    StartThread { tid: ThreadId },
    /// Wake-up of a blocked thread: its condition may have become true.
    ResumeThread { tid: ThreadId },
    /// Deadline of a blocked thread's syscall.
    SyscallTimeout { tid: ThreadId },
    /// Continue a thread that yielded after a run of non-blocking syscalls.
    ContinueThread { tid: ThreadId },
    /// A packet reaches the destination host's network stack.
    PacketArrival { packet: Packet },
}

/// Discriminant of [`EventKind`], used for counting and tracing.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    StartProcess,
    StopProcess,
    StartThread,
    ResumeThread,
    SyscallTimeout,
    ContinueThread,
    PacketArrival,
}

impl EventKind {
    pub fn tag(&self) -> EventTag {
        match self {
            EventKind::StartProcess { .. } => EventTag::StartProcess,
            EventKind::StopProcess { .. } => EventTag::StopProcess,
            EventKind::StartThread { .. } => EventTag::StartThread,
            EventKind::ResumeThread { .. } => EventTag::ResumeThread,
            EventKind::SyscallTimeout { .. } => EventTag::SyscallTimeout,
            EventKind::ContinueThread { .. } => EventTag::ContinueThread,
            EventKind::PacketArrival { .. } => EventTag::PacketArrival,
        }
    }

    /// Thread this event targets, if any.
    pub fn thread(&self) -> Option<ThreadId> {
        match self {
            EventKind::StartThread { tid }
            | EventKind::ResumeThread { tid }
            | EventKind::SyscallTimeout { tid }
            | EventKind::ContinueThread { tid } => Some(*tid),
            _ => None,
        }
    }
}

impl EventTag {
    pub const fn as_str(self) -> &'static str {
        match self {
            EventTag::StartProcess => "start_process",
            EventTag::StopProcess => "stop_process",
            EventTag::StartThread => "start_thread",
            EventTag::ResumeThread => "resume_thread",
            EventTag::SyscallTimeout => "syscall_timeout",
            EventTag::ContinueThread => "continue_thread",
            EventTag::PacketArrival => "packet_arrival",
        }
    }
}

/// A scheduled event, addressed to the host that executes it.
#[derive(Clone, Debug)]
pub struct Event {
    pub key: EventKey,
    pub host: HostId,
    pub kind: EventKind,
}

impl Event {
    pub fn new(key: EventKey, host: HostId, kind: EventKind) -> Self {
        Self { key, host, kind }
    }

    pub fn time(&self) -> VirtualTime {
        self.key.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(t: u64, host: u32, seq: u64) -> EventKey {
        EventKey {
            time: VirtualTime::from_nanos(t),
            origin_host: HostId(host),
            origin_seq: seq,
        }
    }

    #[test]
    fn key_orders_by_time_then_host_then_seq() {
        assert!(key(1, 9, 9) < key(2, 0, 0));
        assert!(key(5, 0, 9) < key(5, 1, 0));
        assert!(key(5, 1, 3) < key(5, 1, 4));
    }

    #[test]
    fn tag_names_are_stable() {
        let kind = EventKind::ResumeThread { tid: ThreadId(3) };
        assert_eq!(kind.tag().as_str(), "resume_thread");
        assert_eq!(kind.thread(), Some(ThreadId(3)));
        assert_eq!(EventKind::StartProcess { launch: 0 }.thread(), None);
    }
}
