//! Creating and tearing down processes and threads.

use super::Host;
use crate::descriptor::{Descriptor, DescriptorTable};
use crate::error::SimError;
use crate::event::EventKind;
use crate::id::{ProcessId, ThreadId};
use crate::memory::MemoryView;
use crate::net::NetEffects;
use crate::process::{ExitStatus, Process};
use crate::syscall::condition::BlockReason;
use crate::thread::{ManagedThread, Thread, ThreadState};
use hostsim_abi::signal;
use log::{debug, info};

impl Host {
    fn alloc_pid(&mut self) -> u32 {
        let id = self.next_pid;
        self.next_pid += 1;
        id
    }

    pub(super) fn start_launch(&mut self, launch: usize) -> Result<(), SimError> {
        let (program, args) = match self.launches.get(launch) {
            Some(l) => (l.program.clone(), l.args.clone()),
            None => return Err(SimError::invariant(format!("no launch #{launch}"))),
        };
        let pid = self.create_process(&program, &args)?;
        if let Some(l) = self.launches.get_mut(launch) {
            l.pid = Some(pid);
        }
        Ok(())
    }

    pub(super) fn stop_launch(&mut self, launch: usize) -> Result<(), SimError> {
        let pid = self.launches.get(launch).and_then(|l| l.pid);
        match pid {
            Some(pid) if self.process(pid)?.is_alive() => {
                info!("{}: shutdown time reached for {pid}, sending SIGKILL", self.name);
                self.kill_process(pid, signal::SIGKILL)
            }
            _ => {
                debug!("{}: launch #{launch} not running at its shutdown time", self.name);
                Ok(())
            }
        }
    }

    /// Start a fresh process running the registered program `program`.
    pub fn create_process(&mut self, program: &str, args: &[String]) -> Result<ProcessId, SimError> {
        let backend = self.shared.programs.spawn(program, args)?;
        let pid = self.start_process(program, backend)?;
        info!("{}: started {pid} running {program} {args:?}", self.name);
        Ok(pid)
    }

    /// Start a process whose main thread runs `backend`.  The main thread
    /// first runs at the current time.
    pub fn start_process(
        &mut self,
        program: &str,
        backend: Box<dyn ManagedThread>,
    ) -> Result<ProcessId, SimError> {
        let pid = ProcessId(self.alloc_pid());
        let process = Process::new(
            pid,
            None,
            program,
            MemoryView::new(),
            DescriptorTable::with_stdio(),
            self.now(),
        );
        self.processes.insert(pid, process);
        self.add_thread(pid, ThreadId::from(pid), backend, None)?;
        Ok(pid)
    }

    /// Copy `parent` into a new process whose main thread runs `backend`.
    pub(crate) fn fork_process(
        &mut self,
        parent: ProcessId,
        backend: Box<dyn ManagedThread>,
    ) -> Result<ProcessId, SimError> {
        let source = self.process(parent)?;
        let memory = source.memory.clone();
        let fds = source.fds.clone();
        let program = source.program.clone();
        for socket in fds.sockets() {
            self.net.retain(socket);
        }
        let pid = ProcessId(self.alloc_pid());
        let process = Process::new(pid, Some(parent), program, memory, fds, self.now());
        self.processes.insert(pid, process);
        self.add_thread(pid, ThreadId::from(pid), backend, Some(0))?;
        debug!("{}: {parent} forked {pid}", self.name);
        Ok(pid)
    }

    /// Add a thread to a live process.  It first runs at the current time
    /// and sees `0` as the result of its clone.
    pub(crate) fn create_thread(
        &mut self,
        pid: ProcessId,
        backend: Box<dyn ManagedThread>,
    ) -> Result<ThreadId, SimError> {
        let tid = ThreadId(self.alloc_pid());
        self.add_thread(pid, tid, backend, Some(0))?;
        debug!("{}: {pid} spawned {tid}", self.name);
        Ok(tid)
    }

    fn add_thread(
        &mut self,
        pid: ProcessId,
        tid: ThreadId,
        backend: Box<dyn ManagedThread>,
        start_result: Option<i64>,
    ) -> Result<(), SimError> {
        let process = self.process_mut(pid)?;
        if !process.is_alive() {
            return Err(SimError::invariant(format!("{tid} added to dead {pid}")));
        }
        process.threads.insert(tid);
        let mut thread = Thread::new(tid, pid, backend, start_result);
        thread.scheduled = Some(self.schedule(self.now(), EventKind::StartThread { tid })?);
        self.threads.insert(tid, thread);
        Ok(())
    }

    /// End one thread.  The last thread out takes the process with it.
    pub(crate) fn terminate_thread(&mut self, tid: ThreadId, code: i32) -> Result<(), SimError> {
        let thread = self.thread_mut(tid)?;
        if !thread.is_live() {
            return Ok(());
        }
        let pid = thread.pid;
        let scheduled = thread.scheduled.take();
        let state = std::mem::replace(&mut thread.state, ThreadState::Zombie);
        thread.exit_code = Some(code);
        thread.saved = None;
        thread.pending_result = None;
        let clear_child_tid = thread.clear_child_tid.take();
        let backend = thread.backend.take();

        if let Some(key) = scheduled {
            self.cancel(key);
        }
        if let ThreadState::Blocked(cond) = state {
            self.release_condition(tid, &cond);
        }
        debug!("{}: {tid} of {pid} exited with {code}", self.name);

        let process = self.process_mut(pid)?;
        process.threads.remove(&tid);
        if tid == ThreadId::from(pid) {
            process.main_exit_code = Some(code);
        }
        if !process.threads.is_empty() {
            if let Some(ptr) = clear_child_tid {
                // The word may be gone already; the joiner then never wakes.
                if process.memory.write_u32(ptr, 0).is_ok() {
                    self.futex_wake(pid, ptr.addr(), 1)?;
                }
            }
            return Ok(());
        }
        if let Some(mut backend) = backend {
            backend.handle_process_exit();
        }
        self.exit_process(pid, code)
    }

    fn exit_process(&mut self, pid: ProcessId, last_code: i32) -> Result<(), SimError> {
        let now = self.now();
        let process = self.process_mut(pid)?;
        let status = process.final_status(last_code);
        process.exit_status = Some(status);
        process.exited_at = Some(now);
        let descriptors = process.fds.drain();
        let ppid = process.ppid;
        let program = process.program.clone();

        let mut fx = NetEffects::default();
        for descriptor in descriptors {
            if let Descriptor::Socket(id) = descriptor {
                self.net.release(id, &mut fx);
            }
        }
        self.apply_net_effects(fx)?;

        match status {
            ExitStatus::Exited(code) => {
                info!("{}: {pid} ({program}) exited with code {code}", self.name)
            }
            ExitStatus::Signaled(sig) => {
                info!("{}: {pid} ({program}) killed by signal {sig}", self.name)
            }
        }
        if let Some(ppid) = ppid {
            self.notify(BlockReason::ChildExit { pid: ppid })?;
        }
        Ok(())
    }

    /// Terminate every thread of `pid` with status `status`.
    fn terminate_process(&mut self, pid: ProcessId, status: ExitStatus) -> Result<(), SimError> {
        let process = self.process_mut(pid)?;
        if !process.is_alive() {
            return Ok(());
        }
        if process.forced_status.is_none() {
            process.forced_status = Some(status);
        }
        let tids: Vec<ThreadId> = process.threads().collect();
        let code = status.return_code();
        for tid in tids {
            self.terminate_thread(tid, code)?;
        }
        Ok(())
    }

    /// Deliver a fatal signal.
    pub(crate) fn kill_process(&mut self, pid: ProcessId, sig: i32) -> Result<(), SimError> {
        self.terminate_process(pid, ExitStatus::Signaled(sig))
    }

    pub(crate) fn exit_group(&mut self, pid: ProcessId, code: i32) -> Result<(), SimError> {
        self.terminate_process(pid, ExitStatus::Exited(code))
    }
}
