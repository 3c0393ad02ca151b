//! Guest processes.

use crate::descriptor::DescriptorTable;
use crate::id::{ProcessId, ThreadId};
use crate::memory::MemoryView;
use crate::time::VirtualTime;
use hostsim_abi::{signal, wait};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How a process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Exited(i32),
    Signaled(i32),
}

impl ExitStatus {
    /// The code a shell would report.
    pub fn return_code(self) -> i32 {
        match self {
            ExitStatus::Exited(code) => code,
            ExitStatus::Signaled(sig) => signal::return_code_for_signal(sig),
        }
    }

    /// Encoding written by `wait4`.
    pub fn wait_status(self) -> i32 {
        match self {
            ExitStatus::Exited(code) => wait::status_exited(code),
            ExitStatus::Signaled(sig) => wait::status_signaled(sig),
        }
    }
}

/// A guest process: an address space, descriptors and a set of threads.
///
/// After its last thread exits the process stays in the registry as a
/// zombie carrying its [`ExitStatus`], until the end of the run.
#[derive(Debug)]
pub struct Process {
    pub pid: ProcessId,
    pub ppid: Option<ProcessId>,
    pub program: String,
    pub(crate) threads: BTreeSet<ThreadId>,
    pub(crate) memory: MemoryView,
    pub(crate) fds: DescriptorTable,
    pub(crate) stdout: Vec<u8>,
    pub(crate) stderr: Vec<u8>,
    /// Status forced by `exit_group` or a fatal signal, applied at teardown.
    pub(crate) forced_status: Option<ExitStatus>,
    pub(crate) main_exit_code: Option<i32>,
    pub(crate) exit_status: Option<ExitStatus>,
    /// Status already collected by the parent's `wait4`.
    pub(crate) reaped: bool,
    pub(crate) started_at: VirtualTime,
    pub(crate) exited_at: Option<VirtualTime>,
}

impl Process {
    pub fn new(
        pid: ProcessId,
        ppid: Option<ProcessId>,
        program: impl Into<String>,
        memory: MemoryView,
        fds: DescriptorTable,
        started_at: VirtualTime,
    ) -> Self {
        Self {
            pid,
            ppid,
            program: program.into(),
            threads: BTreeSet::new(),
            memory,
            fds,
            stdout: Vec::new(),
            stderr: Vec::new(),
            forced_status: None,
            main_exit_code: None,
            exit_status: None,
            reaped: false,
            started_at,
            exited_at: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.exit_status.is_none()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.threads.iter().copied()
    }

    pub fn memory(&self) -> &MemoryView {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryView {
        &mut self.memory
    }

    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    pub fn started_at(&self) -> VirtualTime {
        self.started_at
    }

    pub fn exited_at(&self) -> Option<VirtualTime> {
        self.exited_at
    }

    /// Whether `wait4` may collect this process now.
    pub(crate) fn is_waitable(&self) -> bool {
        self.exit_status.is_some() && !self.reaped
    }

    /// Status to record once the last thread is gone.
    ///
    /// `exit_group` and fatal signals win; otherwise the main thread's code,
    /// falling back to the code of the thread that exited last.
    pub(crate) fn final_status(&self, last_thread_code: i32) -> ExitStatus {
        self.forced_status.unwrap_or(ExitStatus::Exited(
            self.main_exit_code.unwrap_or(last_thread_code),
        ))
    }
}
