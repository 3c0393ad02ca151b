//! Thread and process creation: a pthread-style spawner and a forker.

use super::{arg_or, call, print, result, Buffer, Guest, Machine};
use crate::memory::MemoryView;
use crate::thread::{CloneKind, CloneRequest, ManagedThread, ThreadStep};
use hostsim_abi::clone::PTHREAD_CREATE_FLAGS;
use hostsim_abi::futex::FUTEX_WAIT;
use hostsim_abi::{nr, Errno};

const LINE_SIZE: usize = 64;
const MAX_THREADS: usize = 64;

// ═══════════════════════════════════════════════════════════════════════
//  Spawner
// ═══════════════════════════════════════════════════════════════════════

pub(super) fn spawner(args: &[String]) -> Result<Box<dyn ManagedThread>, String> {
    let threads: usize = arg_or(args, 0, 2)?;
    if threads == 0 || threads > MAX_THREADS {
        return Err(format!("thread count must be 1..={MAX_THREADS}"));
    }
    Ok(Guest::boxed(Spawner {
        threads,
        index: 0,
        tids: Buffer::UNSET,
        line: Buffer::UNSET,
        state: SpawnerState::Start,
    }))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SpawnerState {
    Start,
    Clone,
    Join,
    Printed,
}

/// Starts `threads` threads the way `pthread_create` does and joins them
/// the way `pthread_join` does: by waiting on each thread's cleared tid.
struct Spawner {
    threads: usize,
    /// Thread being cloned, then thread being joined.
    index: usize,
    /// One tid word per thread, set by the kernel and cleared at exit.
    tids: Buffer,
    line: Buffer,
    state: SpawnerState,
}

impl Spawner {
    fn tid_slot(&self, index: usize) -> u64 {
        self.tids.addr() + 4 * index as u64
    }

    fn clone_next(&mut self) -> ThreadStep {
        self.state = SpawnerState::Clone;
        let slot = self.tid_slot(self.index);
        // No separate stacks: the stack pointer only matters to a native
        // backend.
        call(nr::CLONE, &[PTHREAD_CREATE_FLAGS, 0, slot, slot, 0])
    }

    /// Wait for thread `index`, or move on if it already exited.
    fn join(&mut self, mem: &mut MemoryView) -> Result<ThreadStep, String> {
        self.state = SpawnerState::Join;
        while self.index < self.threads {
            let slot = self.tid_slot(self.index);
            let tid = mem
                .read_u32(crate::memory::GuestPtr::new(slot))
                .map_err(|e| e.to_string())?;
            if tid != 0 {
                return Ok(call(nr::FUTEX, &[slot, FUTEX_WAIT, tid as u64, 0]));
            }
            self.index += 1;
        }
        self.state = SpawnerState::Printed;
        print(mem, &self.line, 1, &format!("joined {} threads\n", self.threads))
    }
}

impl Machine for Spawner {
    fn step(&mut self, mem: &mut MemoryView, last: Option<i64>) -> Result<ThreadStep, String> {
        match self.state {
            SpawnerState::Start => {
                self.tids = Buffer::alloc(mem, 4 * self.threads)?;
                self.line = Buffer::alloc(mem, LINE_SIZE)?;
                Ok(self.clone_next())
            }
            SpawnerState::Clone => {
                result(last, "clone")?;
                self.index += 1;
                if self.index < self.threads {
                    return Ok(self.clone_next());
                }
                self.index = 0;
                self.join(mem)
            }
            SpawnerState::Join => {
                // A changed word (EAGAIN) or a wake both mean "look again".
                match last.and_then(Errno::from_syscall_return) {
                    None | Some(Errno::EAGAIN) => self.join(mem),
                    Some(errno) => Err(format!("futex: {errno}")),
                }
            }
            SpawnerState::Printed => {
                result(last, "write")?;
                Ok(ThreadStep::Exit(0))
            }
        }
    }

    fn clone_thread(&mut self, request: &CloneRequest) -> Result<Box<dyn ManagedThread>, Errno> {
        if request.kind != CloneKind::Thread {
            return Err(Errno::ENOTSUP);
        }
        Ok(Guest::boxed(Worker {
            index: self.index,
            line: Buffer::UNSET,
            state: WorkerState::Start,
        }))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WorkerState {
    Start,
    Tid,
    Printed,
}

/// A spawned thread: reports its tid and exits.
struct Worker {
    index: usize,
    line: Buffer,
    state: WorkerState,
}

impl Machine for Worker {
    fn step(&mut self, mem: &mut MemoryView, last: Option<i64>) -> Result<ThreadStep, String> {
        match self.state {
            WorkerState::Start => {
                if result(last, "clone")? != 0 {
                    return Err("worker resumed as the parent".to_string());
                }
                self.line = Buffer::alloc(mem, LINE_SIZE)?;
                self.state = WorkerState::Tid;
                Ok(call(nr::GETTID, &[]))
            }
            WorkerState::Tid => {
                let tid = result(last, "gettid")?;
                self.state = WorkerState::Printed;
                print(mem, &self.line, 1, &format!("thread {} is {tid}\n", self.index))
            }
            WorkerState::Printed => {
                result(last, "write")?;
                Ok(call(nr::EXIT, &[0]))
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Forker
// ═══════════════════════════════════════════════════════════════════════

pub(super) fn forker(args: &[String]) -> Result<Box<dyn ManagedThread>, String> {
    let code: i32 = arg_or(args, 0, 7)?;
    if !(0..=255).contains(&code) {
        return Err("exit code must be 0..=255".to_string());
    }
    Ok(Guest::boxed(Forker {
        code,
        child: 0,
        status: Buffer::UNSET,
        line: Buffer::UNSET,
        state: ForkerState::Start,
    }))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ForkerState {
    Start,
    Forked,
    Waited,
    Printed,
}

/// Forks a child that exits with `code`, reaps it and prints its status.
struct Forker {
    code: i32,
    child: i64,
    status: Buffer,
    line: Buffer,
    state: ForkerState,
}

impl Machine for Forker {
    fn step(&mut self, mem: &mut MemoryView, last: Option<i64>) -> Result<ThreadStep, String> {
        match self.state {
            ForkerState::Start => {
                self.status = Buffer::alloc(mem, 4)?;
                self.line = Buffer::alloc(mem, LINE_SIZE)?;
                self.state = ForkerState::Forked;
                Ok(call(nr::FORK, &[]))
            }
            ForkerState::Forked => {
                self.child = result(last, "fork")?;
                self.state = ForkerState::Waited;
                Ok(call(nr::WAIT4, &[u64::MAX, self.status.addr(), 0, 0]))
            }
            ForkerState::Waited => {
                let pid = result(last, "wait4")?;
                if pid != self.child {
                    return Err(format!("wait4 reaped {pid}, expected {}", self.child));
                }
                let status = mem.read_u32(self.status.ptr).map_err(|e| e.to_string())?;
                let code = (status >> 8) & 0xff;
                self.state = ForkerState::Printed;
                print(mem, &self.line, 1, &format!("child {pid} exited with {code}\n"))
            }
            ForkerState::Printed => {
                result(last, "write")?;
                Ok(ThreadStep::Exit(0))
            }
        }
    }

    fn clone_thread(&mut self, request: &CloneRequest) -> Result<Box<dyn ManagedThread>, Errno> {
        if request.kind != CloneKind::Process {
            return Err(Errno::ENOTSUP);
        }
        Ok(Guest::boxed(ForkChild { code: self.code }))
    }
}

/// The forked side: exits the whole process with the configured code.
struct ForkChild {
    code: i32,
}

impl Machine for ForkChild {
    fn step(&mut self, _mem: &mut MemoryView, last: Option<i64>) -> Result<ThreadStep, String> {
        if result(last, "fork")? != 0 {
            return Err("fork child resumed as the parent".to_string());
        }
        Ok(call(nr::EXIT_GROUP, &[self.code as u64]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::GuestPtr;

    fn expect_call(step: ThreadStep, number: u64) -> [u64; 6] {
        match step {
            ThreadStep::Syscall(req) => {
                assert_eq!(req.number, number, "unexpected {req:?}");
                req.args.raw
            }
            other => panic!("expected syscall {number}, got {other:?}"),
        }
    }

    #[test]
    fn spawner_waits_only_on_live_threads() {
        let mut mem = MemoryView::new();
        let mut spawner = spawner(&["2".to_string()]).unwrap();
        let first = expect_call(spawner.resume(&mut mem, None), nr::CLONE);
        assert_eq!(first[0], PTHREAD_CREATE_FLAGS);
        assert_eq!(first[2], first[3]);
        mem.write_u32(GuestPtr::new(first[2]), 1001).unwrap();
        let second = expect_call(spawner.resume(&mut mem, Some(1001)), nr::CLONE);
        assert_eq!(second[2], first[2] + 4);

        // Thread 0 already exited and cleared its word; thread 1 is live.
        mem.write_u32(GuestPtr::new(first[2]), 0).unwrap();
        mem.write_u32(GuestPtr::new(second[2]), 1002).unwrap();
        let wait = expect_call(spawner.resume(&mut mem, Some(1002)), nr::FUTEX);
        assert_eq!(wait[0], second[2]);
        assert_eq!(wait[2], 1002);

        mem.write_u32(GuestPtr::new(second[2]), 0).unwrap();
        expect_call(spawner.resume(&mut mem, Some(0)), nr::WRITE);
        assert_eq!(spawner.resume(&mut mem, Some(16)), ThreadStep::Exit(0));
    }

    #[test]
    fn forker_child_exits_group_with_code() {
        let mut mem = MemoryView::new();
        let mut forker = forker(&["3".to_string()]).unwrap();
        expect_call(forker.resume(&mut mem, None), nr::FORK);
        let request = CloneRequest {
            kind: CloneKind::Process,
            stack: GuestPtr::NULL,
            tls: None,
        };
        let mut child = forker.clone_thread(&request).unwrap();
        let exit = expect_call(child.resume(&mut mem, Some(0)), nr::EXIT_GROUP);
        assert_eq!(exit[0], 3);

        let thread_request = CloneRequest {
            kind: CloneKind::Thread,
            ..request
        };
        assert_eq!(forker.clone_thread(&thread_request).err(), Some(Errno::ENOTSUP));
    }

    #[test]
    fn argument_bounds() {
        assert!(spawner(&["0".to_string()]).is_err());
        assert!(spawner(&["65".to_string()]).is_err());
        assert!(forker(&["256".to_string()]).is_err());
    }
}
