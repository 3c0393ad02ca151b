//! Parking, waking and timing out blocked threads.
//!
//! A blocked thread is registered under its [`BlockReason`] (futex waits in
//! the [`FutexTable`](crate::futex::FutexTable), everything else in the
//! host's waiter map).  A notification removes the registration and
//! schedules a `ResumeThread` at the current time; the thread then re-enters
//! its saved syscall, which either completes or blocks again.

use super::run::RunInput;
use super::Host;
use crate::error::SimError;
use crate::event::{EventKey, EventKind};
use crate::futex::FutexKey;
use crate::id::{ProcessId, ThreadId};
use crate::syscall::condition::{BlockReason, Resumption, SyscallCondition};
use crate::syscall::SyscallRequest;
use crate::thread::ThreadState;
use log::trace;

impl Host {
    /// Block `tid` on `cond`, remembering `request` for re-entry.
    ///
    /// `deadline` carries over the pending deadline event of a wait that is
    /// being re-parked after a spurious wake-up; a fresh block schedules one
    /// from `cond.timeout`.
    pub(crate) fn park(
        &mut self,
        tid: ThreadId,
        request: SyscallRequest,
        mut cond: SyscallCondition,
        deadline: Option<EventKey>,
    ) -> Result<(), SimError> {
        if !cond.is_wakeable() {
            return Err(SimError::invariant(format!(
                "{tid}: {request:?} blocked on {} with no deadline",
                cond.reason
            )));
        }
        cond.wakeup = None;
        cond.deadline = match (deadline, cond.timeout) {
            (Some(key), _) => Some(key),
            (None, Some(at)) => Some(self.schedule(at, EventKind::SyscallTimeout { tid })?),
            (None, None) => None,
        };
        self.register_waiter(tid, cond.reason);
        trace!("{}: {tid} blocked in {request:?} on {}", self.name, cond.reason);

        let thread = self.thread_mut(tid)?;
        thread.state = ThreadState::Blocked(cond);
        thread.saved = Some(request);
        thread.unblocked_run = 0;
        self.stats.blocked += 1;
        Ok(())
    }

    /// Back to runnable after the saved syscall completed.
    pub(crate) fn unpark(&mut self, tid: ThreadId) -> Result<(), SimError> {
        let thread = self.thread_mut(tid)?;
        let state = std::mem::replace(&mut thread.state, ThreadState::Runnable);
        thread.saved = None;
        if let ThreadState::Blocked(cond) = state {
            self.release_condition(tid, &cond);
        }
        Ok(())
    }

    /// Drop the pending events and waiter registration of `cond`.
    pub(crate) fn release_condition(&mut self, tid: ThreadId, cond: &SyscallCondition) {
        if let Some(key) = cond.wakeup {
            self.cancel(key);
        }
        if let Some(key) = cond.deadline {
            self.cancel(key);
        }
        self.unregister_waiter(tid, cond.reason);
    }

    fn register_waiter(&mut self, tid: ThreadId, reason: BlockReason) {
        match reason {
            BlockReason::Futex { pid, addr } => self.futexes.enqueue(FutexKey { pid, addr }, tid),
            BlockReason::Timer => {}
            other => {
                self.waiters.entry(other).or_default().insert(tid);
            }
        }
    }

    fn unregister_waiter(&mut self, tid: ThreadId, reason: BlockReason) {
        match reason {
            BlockReason::Futex { pid, addr } => {
                self.futexes.remove(FutexKey { pid, addr }, tid);
            }
            BlockReason::Timer => {}
            other => {
                if let Some(set) = self.waiters.get_mut(&other) {
                    set.remove(&tid);
                    if set.is_empty() {
                        self.waiters.remove(&other);
                    }
                }
            }
        }
    }

    /// Wake every thread waiting on `reason`.
    pub(crate) fn notify(&mut self, reason: BlockReason) -> Result<(), SimError> {
        let Some(tids) = self.waiters.remove(&reason) else {
            return Ok(());
        };
        for tid in tids {
            self.schedule_wakeup(tid)?;
        }
        Ok(())
    }

    /// Wake up to `count` waiters of a futex word, oldest first.
    pub(crate) fn futex_wake(
        &mut self,
        pid: ProcessId,
        addr: u64,
        count: usize,
    ) -> Result<usize, SimError> {
        let woken = self.futexes.wake(FutexKey { pid, addr }, count);
        for &tid in &woken {
            self.schedule_wakeup(tid)?;
        }
        Ok(woken.len())
    }

    /// Schedule a `ResumeThread` now unless one is already pending.
    fn schedule_wakeup(&mut self, tid: ThreadId) -> Result<(), SimError> {
        let pending = match self.thread(tid)?.condition() {
            Some(cond) => cond.wakeup.is_some(),
            None => {
                return Err(SimError::invariant(format!(
                    "{tid} notified while not blocked"
                )))
            }
        };
        if pending {
            return Ok(());
        }
        let key = self.schedule(self.now(), EventKind::ResumeThread { tid })?;
        if let Some(cond) = self.thread_mut(tid)?.condition_mut() {
            cond.wakeup = Some(key);
        }
        Ok(())
    }

    /// A `ResumeThread` event fired.
    pub(super) fn wake_thread(&mut self, tid: ThreadId, key: EventKey) -> Result<(), SimError> {
        let thread = self.thread_mut(tid)?;
        let Some(cond) = thread.condition_mut() else {
            return Err(SimError::invariant(format!(
                "{tid}: resume {key} for a thread that is not blocked"
            )));
        };
        if cond.wakeup != Some(key) {
            return Err(SimError::invariant(format!(
                "{tid}: resume {key} is not the pending wake-up"
            )));
        }
        cond.wakeup = None;
        let reason = cond.reason;
        self.unregister_waiter(tid, reason);
        self.run_thread(tid, RunInput::Retry(Resumption::Woken))
    }

    /// A `SyscallTimeout` event fired.
    pub(super) fn timeout_thread(&mut self, tid: ThreadId, key: EventKey) -> Result<(), SimError> {
        let thread = self.thread_mut(tid)?;
        let Some(cond) = thread.condition_mut() else {
            return Err(SimError::invariant(format!(
                "{tid}: timeout {key} for a thread that is not blocked"
            )));
        };
        if cond.deadline != Some(key) {
            return Err(SimError::invariant(format!(
                "{tid}: timeout {key} is not the pending deadline"
            )));
        }
        cond.deadline = None;
        let wakeup = cond.wakeup.take();
        let reason = cond.reason;
        if let Some(wakeup) = wakeup {
            self.cancel(wakeup);
        }
        self.unregister_waiter(tid, reason);
        self.run_thread(tid, RunInput::Retry(Resumption::TimedOut))
    }
}
