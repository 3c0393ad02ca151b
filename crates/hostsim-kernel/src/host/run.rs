//! Driving a thread from syscall to syscall.

use super::Host;
use crate::error::{RegistryError, SimError};
use crate::event::EventKind;
use crate::id::{ProcessId, ThreadId};
use crate::process::Process;
use crate::syscall::condition::Resumption;
use crate::syscall::{self, SyscallContext, SyscallOutcome, SyscallRequest};
use crate::thread::{ManagedThread, ThreadStep};
use log::debug;

/// How a thread is entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RunInput {
    /// Resume the guest with the result of its previous syscall.
    Continue(Option<i64>),
    /// Re-enter the saved blocked syscall.
    Retry(Resumption),
}

impl Host {
    /// Run `tid` until it blocks, yields, or dies.
    pub(crate) fn run_thread(&mut self, tid: ThreadId, input: RunInput) -> Result<(), SimError> {
        let thread = self.thread_mut(tid)?;
        if !thread.is_live() {
            return Err(SimError::invariant(format!("{tid}: run of a dead thread")));
        }
        let pid = thread.pid;
        let mut backend = thread
            .backend
            .take()
            .ok_or_else(|| SimError::invariant(format!("{tid}: already running")))?;

        let result = self.drive(pid, tid, backend.as_mut(), input);

        match self.threads.get_mut(&tid) {
            Some(thread) if thread.is_live() => thread.backend = Some(backend),
            _ => {
                let process_alive = self.processes.get(&pid).is_some_and(Process::is_alive);
                if !process_alive {
                    backend.handle_process_exit();
                }
            }
        }
        result
    }

    fn drive(
        &mut self,
        pid: ProcessId,
        tid: ThreadId,
        backend: &mut dyn ManagedThread,
        mut input: RunInput,
    ) -> Result<(), SimError> {
        loop {
            let (request, resumption) = match input {
                RunInput::Retry(resumption) => {
                    let request = self.thread(tid)?.saved.ok_or_else(|| {
                        SimError::invariant(format!("{tid}: retry without a saved syscall"))
                    })?;
                    (request, Some(resumption))
                }
                RunInput::Continue(last) => {
                    let process = self
                        .processes
                        .get_mut(&pid)
                        .ok_or(RegistryError::ProcessNotFound(pid))?;
                    match backend.resume(&mut process.memory, last) {
                        ThreadStep::Exit(code) => {
                            debug!("{}: {tid} returned {code}", self.name);
                            return self.terminate_thread(tid, code);
                        }
                        ThreadStep::Syscall(request) => (request, None),
                    }
                }
            };

            let outcome = self.dispatch_syscall(pid, tid, backend, &request, resumption)?;
            if !self.thread_is_live(tid) {
                return Ok(());
            }

            let rv = match outcome {
                SyscallOutcome::Blocked(cond) => {
                    let deadline = match resumption {
                        None => None,
                        Some(Resumption::Woken) => {
                            self.thread(tid)?.condition().and_then(|c| c.deadline)
                        }
                        Some(Resumption::TimedOut) => {
                            return Err(SimError::invariant(format!(
                                "{tid}: {request:?} blocked again after its deadline"
                            )))
                        }
                    };
                    return self.park(tid, request, cond, deadline);
                }
                SyscallOutcome::Done(rv) => rv,
                SyscallOutcome::DoneWithError(errno) => {
                    self.stats.syscall_errors += 1;
                    errno.to_syscall_return()
                }
            };

            if resumption.is_some() {
                self.unpark(tid)?;
            }
            if self.yield_after_syscall(tid, rv)? {
                return Ok(());
            }
            input = RunInput::Continue(Some(rv));
        }
    }

    fn dispatch_syscall(
        &mut self,
        pid: ProcessId,
        tid: ThreadId,
        backend: &mut dyn ManagedThread,
        request: &SyscallRequest,
        resumption: Option<Resumption>,
    ) -> Result<SyscallOutcome, SimError> {
        self.stats.syscalls += 1;
        let mut ctx = SyscallContext::new(self, pid, tid, backend, resumption);
        syscall::dispatch(&mut ctx, request)
    }

    /// Apply the unblocked-syscall model: after `limit` consecutive
    /// non-blocking syscalls the thread pays a latency before continuing.
    ///
    /// Returns whether the thread yielded.
    fn yield_after_syscall(&mut self, tid: ThreadId, rv: i64) -> Result<bool, SimError> {
        let limit = self.shared.params.unblocked_syscall_limit;
        if limit == 0 {
            return Ok(false);
        }
        let at = self
            .now()
            .saturating_add(self.shared.params.unblocked_syscall_latency);
        let thread = self.thread_mut(tid)?;
        thread.unblocked_run += 1;
        if thread.unblocked_run < limit {
            return Ok(false);
        }
        thread.unblocked_run = 0;
        thread.pending_result = Some(rv);
        let key = self.schedule(at, EventKind::ContinueThread { tid })?;
        self.thread_mut(tid)?.scheduled = Some(key);
        Ok(true)
    }
}
