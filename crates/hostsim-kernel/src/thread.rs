//! Guest threads and the seam to whatever executes them.
//!
//! The kernel never runs guest code itself.  It hands a [`ManagedThread`]
//! the result of its previous syscall and receives the next syscall (or the
//! thread's exit) back.  Everything between two syscalls happens in zero
//! virtual time.

use crate::event::EventKey;
use crate::id::{ProcessId, ThreadId};
use crate::memory::{GuestPtr, MemoryView};
use crate::syscall::condition::SyscallCondition;
use crate::syscall::SyscallRequest;
use hostsim_abi::Errno;

/// What a guest thread did when it was last resumed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThreadStep {
    /// The thread trapped into the kernel.
    Syscall(SyscallRequest),
    /// The thread returned from its entry point.
    Exit(i32),
}

/// Kind of copy `clone_thread` is asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloneKind {
    /// A new thread in the same process (`clone` with `CLONE_THREAD`).
    Thread,
    /// The main thread of a forked child process.
    Process,
}

/// Parameters of a clone that the backend needs to build the new thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloneRequest {
    pub kind: CloneKind,
    pub stack: GuestPtr,
    /// New TLS base, if `CLONE_SETTLS` was passed.
    pub tls: Option<GuestPtr>,
}

/// Executor of one guest thread.
pub trait ManagedThread: Send {
    /// Run the thread until its next syscall or exit.
    ///
    /// `last_result` is the return value of the previous syscall, or `None`
    /// on the very first resume of a process's main thread.
    fn resume(&mut self, mem: &mut MemoryView, last_result: Option<i64>) -> ThreadStep;

    /// Produce the executor for a new thread or forked process.
    ///
    /// The new thread's first resume receives `Some(0)`, like the child
    /// side of `clone`/`fork`.
    fn clone_thread(&mut self, request: &CloneRequest) -> Result<Box<dyn ManagedThread>, Errno>;

    /// Execute a syscall on the allow-list natively, bypassing emulation.
    fn native_syscall(&mut self, _mem: &mut MemoryView, _request: &SyscallRequest) -> i64 {
        Errno::ENOSYS.to_syscall_return()
    }

    /// The owning process is exiting; release native resources.
    fn handle_process_exit(&mut self) {}
}

/// Scheduling state of a thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThreadState {
    Runnable,
    Blocked(SyscallCondition),
    Zombie,
}

impl ThreadState {
    pub fn is_blocked(&self) -> bool {
        matches!(self, ThreadState::Blocked(_))
    }
}

/// A guest thread as the host's registry sees it.
pub struct Thread {
    pub tid: ThreadId,
    pub pid: ProcessId,
    pub(crate) state: ThreadState,
    /// `None` while the thread is executing (the run loop holds it) and
    /// after it died.
    pub(crate) backend: Option<Box<dyn ManagedThread>>,
    /// Result handed to the first resume.
    pub(crate) start_result: Option<i64>,
    /// The syscall to re-enter while blocked.
    pub(crate) saved: Option<SyscallRequest>,
    /// Result held back while yielding to the unblocked-syscall model.
    pub(crate) pending_result: Option<i64>,
    /// Pending `StartThread` or `ContinueThread` event.
    pub(crate) scheduled: Option<EventKey>,
    pub(crate) clear_child_tid: Option<GuestPtr>,
    /// Consecutive syscalls completed without blocking.
    pub(crate) unblocked_run: u32,
    pub(crate) exit_code: Option<i32>,
}

impl Thread {
    pub fn new(
        tid: ThreadId,
        pid: ProcessId,
        backend: Box<dyn ManagedThread>,
        start_result: Option<i64>,
    ) -> Self {
        Self {
            tid,
            pid,
            state: ThreadState::Runnable,
            backend: Some(backend),
            start_result,
            saved: None,
            pending_result: None,
            scheduled: None,
            clear_child_tid: None,
            unblocked_run: 0,
            exit_code: None,
        }
    }

    pub fn state(&self) -> &ThreadState {
        &self.state
    }

    pub fn is_live(&self) -> bool {
        self.state != ThreadState::Zombie
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn clear_child_tid(&self) -> Option<GuestPtr> {
        self.clear_child_tid
    }

    /// The condition this thread is blocked on, if any.
    pub fn condition(&self) -> Option<&SyscallCondition> {
        match &self.state {
            ThreadState::Blocked(cond) => Some(cond),
            _ => None,
        }
    }

    pub(crate) fn condition_mut(&mut self) -> Option<&mut SyscallCondition> {
        match &mut self.state {
            ThreadState::Blocked(cond) => Some(cond),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("pid", &self.pid)
            .field("state", &self.state)
            .field("saved", &self.saved)
            .field("exit_code", &self.exit_code)
            .finish_non_exhaustive()
    }
}
