//! Sleeps once and reports how much virtual time passed.

use super::{arg_or, call, print, result, Buffer, Guest, Machine};
use crate::memory::MemoryView;
use crate::thread::{ManagedThread, ThreadStep};
use hostsim_abi::time::CLOCK_MONOTONIC;
use hostsim_abi::{nr, Timespec, TIMESPEC_SIZE};

const DEFAULT_SLEEP_NS: u64 = 1_000_000;

pub(super) fn sleeper(args: &[String]) -> Result<Box<dyn ManagedThread>, String> {
    Ok(Guest::boxed(Sleeper {
        sleep_ns: arg_or(args, 0, DEFAULT_SLEEP_NS)?,
        before: 0,
        ts: Buffer::UNSET,
        line: Buffer::UNSET,
        state: State::Start,
    }))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Start,
    Before,
    Slept,
    After,
    Printed,
}

struct Sleeper {
    sleep_ns: u64,
    before: u64,
    ts: Buffer,
    line: Buffer,
    state: State,
}

impl Sleeper {
    fn now(&self, mem: &MemoryView) -> Result<u64, String> {
        let bytes = self.ts.read(mem, TIMESPEC_SIZE)?;
        Timespec::from_bytes(&bytes)
            .and_then(|ts| ts.to_nanos())
            .ok_or_else(|| "clock_gettime returned a bad timespec".to_string())
    }

    fn clock(&self) -> ThreadStep {
        call(nr::CLOCK_GETTIME, &[CLOCK_MONOTONIC, self.ts.addr()])
    }
}

impl Machine for Sleeper {
    fn step(&mut self, mem: &mut MemoryView, last: Option<i64>) -> Result<ThreadStep, String> {
        match self.state {
            State::Start => {
                self.ts = Buffer::alloc(mem, TIMESPEC_SIZE)?;
                self.line = Buffer::alloc(mem, 64)?;
                self.state = State::Before;
                Ok(self.clock())
            }
            State::Before => {
                result(last, "clock_gettime")?;
                self.before = self.now(mem)?;
                self.ts
                    .fill(mem, &Timespec::from_nanos(self.sleep_ns).to_bytes())?;
                self.state = State::Slept;
                Ok(call(nr::NANOSLEEP, &[self.ts.addr(), 0]))
            }
            State::Slept => {
                result(last, "nanosleep")?;
                self.state = State::After;
                Ok(self.clock())
            }
            State::After => {
                result(last, "clock_gettime")?;
                let elapsed = self.now(mem)?.saturating_sub(self.before);
                self.state = State::Printed;
                print(mem, &self.line, 1, &format!("slept {elapsed} ns\n"))
            }
            State::Printed => {
                result(last, "write")?;
                Ok(ThreadStep::Exit(0))
            }
        }
    }
}
