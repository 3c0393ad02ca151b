//! Simulated hosts.
//!
//! A [`Host`] is one machine: its event queue, processes, threads, network
//! stack and RNG.  Hosts share nothing mutable; a host is executed by
//! exactly one worker at a time, and talks to other hosts only by emitting
//! events into its outbox.
//!
//! The implementation is split by concern:
//!
//! - `registry`: creating and tearing down processes and threads
//! - `run`: driving a thread from syscall to syscall
//! - `block`: parking, waking and timing out blocked threads
//! - `network`: moving packets between the stack and the event queue

mod block;
mod network;
mod registry;
mod run;

use crate::config::SimulationConfig;
use crate::error::{RegistryError, SimError};
use crate::event::{Event, EventKey, EventKind, EventTag};
use crate::futex::FutexTable;
use crate::guest::ProgramRegistry;
use crate::id::{HostId, ProcessId, ThreadId};
use crate::net::{NetStack, Topology};
use crate::process::Process;
use crate::queue::{EventInbox, EventQueue};
use crate::syscall::condition::BlockReason;
use crate::syscall::SyscallTable;
use crate::thread::Thread;
use crate::time::{SimulationTime, VirtualTime};
use crate::trace::TraceRecord;
use log::{debug, info};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// First pid handed out on every host.
pub const FIRST_PID: u32 = 1000;

/// Domain separator for host RNG seeds ("HOST").
const HOST_RNG_DOMAIN: u64 = 0x484F_5354_0000;

/// Kernel-wide tunables copied out of the config.
#[derive(Clone, Debug)]
pub struct KernelParams {
    pub seed: u64,
    pub native_syscalls: BTreeSet<u64>,
    pub unblocked_syscall_limit: u32,
    pub unblocked_syscall_latency: SimulationTime,
    pub trace: bool,
}

/// Read-only state shared by every host and worker.
pub struct KernelShared {
    pub table: SyscallTable,
    pub programs: ProgramRegistry,
    pub topology: Topology,
    pub params: KernelParams,
}

impl KernelShared {
    /// Build from a validated config.
    pub fn new(config: &SimulationConfig, programs: ProgramRegistry) -> Self {
        Self {
            table: SyscallTable::standard(),
            programs,
            topology: Topology::from_config(config),
            params: KernelParams {
                seed: config.seed,
                native_syscalls: config.native_syscalls.iter().copied().collect(),
                unblocked_syscall_limit: config.unblocked_syscall_limit,
                unblocked_syscall_latency: SimulationTime::from_nanos(
                    config.unblocked_syscall_latency_ns,
                ),
                trace: config.trace,
            },
        }
    }
}

/// A configured process launch.
#[derive(Clone, Debug)]
pub struct Launch {
    pub program: String,
    pub args: Vec<String>,
    pub start: VirtualTime,
    pub shutdown: Option<VirtualTime>,
    /// Set once the process has been started.
    pub pid: Option<ProcessId>,
}

/// Per-host counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStats {
    pub events: BTreeMap<EventTag, u64>,
    pub syscalls: u64,
    pub syscall_errors: u64,
    pub blocked: u64,
    pub packets_sent: u64,
    pub packets_dropped: u64,
}

pub struct Host {
    id: HostId,
    name: String,
    queue: EventQueue,
    inbox: EventInbox,
    outbox: Vec<Event>,
    next_seq: u64,
    shared: Arc<KernelShared>,
    launches: Vec<Launch>,
    processes: BTreeMap<ProcessId, Process>,
    threads: BTreeMap<ThreadId, Thread>,
    next_pid: u32,
    pub(crate) net: NetStack,
    pub(crate) futexes: FutexTable,
    waiters: BTreeMap<BlockReason, BTreeSet<ThreadId>>,
    pub(crate) rng: ChaCha20Rng,
    stats: HostStats,
    trace: Vec<TraceRecord>,
}

impl Host {
    /// Build a host and schedule its configured launches.
    pub fn new(
        id: HostId,
        name: impl Into<String>,
        bandwidth_bps: u64,
        shared: Arc<KernelShared>,
        launches: Vec<Launch>,
    ) -> Result<Self, SimError> {
        let mut rng_key = [0u8; 32];
        let derived = shared
            .params
            .seed
            .wrapping_add(HOST_RNG_DOMAIN)
            .wrapping_add(id.as_u32() as u64);
        rng_key[..8].copy_from_slice(&derived.to_le_bytes());

        let addr = shared.topology.addr(id);
        let mut host = Self {
            id,
            name: name.into(),
            queue: EventQueue::new(),
            inbox: EventInbox::new(),
            outbox: Vec::new(),
            next_seq: 0,
            shared,
            launches: Vec::new(),
            processes: BTreeMap::new(),
            threads: BTreeMap::new(),
            next_pid: FIRST_PID,
            net: NetStack::new(addr, bandwidth_bps),
            futexes: FutexTable::new(),
            waiters: BTreeMap::new(),
            rng: ChaCha20Rng::from_seed(rng_key),
            stats: HostStats::default(),
            trace: Vec::new(),
        };
        for launch in launches {
            host.add_launch(launch)?;
        }
        Ok(host)
    }

    /// Register a process to start (and optionally stop) at fixed times.
    pub fn add_launch(&mut self, launch: Launch) -> Result<usize, SimError> {
        let index = self.launches.len();
        self.schedule(launch.start, EventKind::StartProcess { launch: index })?;
        if let Some(stop) = launch.shutdown {
            self.schedule(stop, EventKind::StopProcess { launch: index })?;
        }
        self.launches.push(launch);
        Ok(index)
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> [u8; 4] {
        self.net.addr()
    }

    /// Current virtual time on this host.
    pub fn now(&self) -> VirtualTime {
        self.queue.now()
    }

    pub fn next_event_time(&self) -> Option<VirtualTime> {
        self.queue.next_time()
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Handle through which other workers deliver events here.
    pub fn inbox(&self) -> EventInbox {
        self.inbox.clone()
    }

    /// Move events other hosts delivered into the queue.
    pub fn drain_inbox(&mut self) -> Result<(), SimError> {
        for event in self.inbox.drain() {
            debug_assert_eq!(event.host, self.id);
            self.queue.schedule(event)?;
        }
        Ok(())
    }

    /// Events this host produced for other hosts since the last call.
    pub fn take_outbox(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.outbox)
    }

    pub fn stats(&self) -> &HostStats {
        &self.stats
    }

    pub fn launches(&self) -> &[Launch] {
        &self.launches
    }

    pub fn take_trace(&mut self) -> Vec<TraceRecord> {
        std::mem::take(&mut self.trace)
    }

    pub(crate) fn shared(&self) -> &Arc<KernelShared> {
        &self.shared
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Registry lookups
    // ═══════════════════════════════════════════════════════════════════

    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }

    pub fn process(&self, pid: ProcessId) -> Result<&Process, RegistryError> {
        self.processes
            .get(&pid)
            .ok_or(RegistryError::ProcessNotFound(pid))
    }

    pub(crate) fn process_mut(&mut self, pid: ProcessId) -> Result<&mut Process, RegistryError> {
        self.processes
            .get_mut(&pid)
            .ok_or(RegistryError::ProcessNotFound(pid))
    }

    pub fn thread(&self, tid: ThreadId) -> Result<&Thread, RegistryError> {
        self.threads
            .get(&tid)
            .ok_or(RegistryError::ThreadNotFound(tid))
    }

    pub(crate) fn thread_mut(&mut self, tid: ThreadId) -> Result<&mut Thread, RegistryError> {
        self.threads
            .get_mut(&tid)
            .ok_or(RegistryError::ThreadNotFound(tid))
    }

    pub(crate) fn thread_is_live(&self, tid: ThreadId) -> bool {
        self.threads.get(&tid).is_some_and(Thread::is_live)
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Scheduling
    // ═══════════════════════════════════════════════════════════════════

    fn next_key(&mut self, time: VirtualTime) -> EventKey {
        let key = EventKey {
            time,
            origin_host: self.id,
            origin_seq: self.next_seq,
        };
        self.next_seq += 1;
        key
    }

    /// Schedule an event on this host.
    pub(crate) fn schedule(
        &mut self,
        time: VirtualTime,
        kind: EventKind,
    ) -> Result<EventKey, SimError> {
        let key = self.next_key(time);
        self.queue.schedule(Event::new(key, self.id, kind))?;
        Ok(key)
    }

    /// Schedule an event on another host.  It reaches that host's queue at
    /// the start of the next round.
    pub(crate) fn schedule_remote(&mut self, host: HostId, time: VirtualTime, kind: EventKind) {
        let key = self.next_key(time);
        self.outbox.push(Event::new(key, host, kind));
    }

    pub(crate) fn cancel(&mut self, key: EventKey) {
        self.queue.cancel(&key);
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Execution
    // ═══════════════════════════════════════════════════════════════════

    /// Run every event that fires at or before `last`.
    pub fn execute(&mut self, last: VirtualTime) -> Result<(), SimError> {
        while let Some(event) = self.queue.pop_through(last) {
            self.handle_event(event)?;
        }
        Ok(())
    }

    fn handle_event(&mut self, event: Event) -> Result<(), SimError> {
        let tag = event.kind.tag();
        *self.stats.events.entry(tag).or_default() += 1;
        if self.shared.params.trace {
            self.trace.push(TraceRecord::new(self.id, &event));
        }
        debug!("{} @ {}: {:?}", self.name, event.key.time, tag);

        match event.kind {
            EventKind::StartProcess { launch } => self.start_launch(launch),
            EventKind::StopProcess { launch } => self.stop_launch(launch),
            EventKind::StartThread { tid } => {
                let thread = self.thread_mut(tid)?;
                if thread.scheduled != Some(event.key) {
                    return Err(SimError::invariant(format!(
                        "{tid}: start event {} is not the pending one",
                        event.key
                    )));
                }
                thread.scheduled = None;
                let first = thread.start_result;
                self.run_thread(tid, run::RunInput::Continue(first))
            }
            EventKind::ContinueThread { tid } => {
                let thread = self.thread_mut(tid)?;
                if thread.scheduled != Some(event.key) {
                    return Err(SimError::invariant(format!(
                        "{tid}: continue event {} is not the pending one",
                        event.key
                    )));
                }
                thread.scheduled = None;
                let result = thread.pending_result.take().ok_or_else(|| {
                    SimError::invariant(format!("{tid}: continued without a pending result"))
                })?;
                self.run_thread(tid, run::RunInput::Continue(Some(result)))
            }
            EventKind::ResumeThread { tid } => self.wake_thread(tid, event.key),
            EventKind::SyscallTimeout { tid } => self.timeout_thread(tid, event.key),
            EventKind::PacketArrival { packet } => self.deliver_packet(packet),
        }
    }

    /// Stop the host at the end of the run.
    ///
    /// Pending events are discarded.  Processes still running keep no
    /// exit status and their backends are told the process is going away.
    pub fn shutdown(&mut self) {
        let pending = self.queue.len();
        self.queue.clear();
        let mut running = 0;
        for thread in self.threads.values_mut() {
            if let Some(mut backend) = thread.backend.take() {
                backend.handle_process_exit();
                running += 1;
            }
        }
        info!(
            "{}: shut down at {} with {} pending events, {} live threads",
            self.name,
            self.now(),
            pending,
            running
        );
    }
}
