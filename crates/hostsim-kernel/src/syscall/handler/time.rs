//! Clocks and sleeping.
//!
//! Every clock reads the host's virtual time.  Wall clocks are offset so the
//! simulation starts at [`SIMULATION_EPOCH_SECS`].

use crate::syscall::condition::{Resumption, SyscallCondition};
use crate::syscall::{SyscallArgs, SyscallContext, SyscallError, SyscallResult};
use hostsim_abi::time::{self as clock, NANOS_PER_SEC, SIMULATION_EPOCH_SECS};
use hostsim_abi::{Errno, Timespec, Timeval, TIMESPEC_SIZE};

fn realtime_nanos(ctx: &SyscallContext<'_>) -> u64 {
    (SIMULATION_EPOCH_SECS * NANOS_PER_SEC).saturating_add(ctx.now().as_nanos())
}

pub fn clock_gettime(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let ns = match args.get(0) {
        clock::CLOCK_REALTIME | clock::CLOCK_REALTIME_COARSE => realtime_nanos(ctx),
        clock::CLOCK_MONOTONIC
        | clock::CLOCK_MONOTONIC_RAW
        | clock::CLOCK_MONOTONIC_COARSE
        | clock::CLOCK_BOOTTIME
        | clock::CLOCK_PROCESS_CPUTIME_ID
        | clock::CLOCK_THREAD_CPUTIME_ID => ctx.now().as_nanos(),
        _ => return Err(Errno::EINVAL.into()),
    };
    ctx.write_bytes(args.ptr(1), &Timespec::from_nanos(ns).to_bytes())?;
    Ok(0)
}

pub fn gettimeofday(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let tv = args.ptr(0);
    let tz = args.ptr(1);
    if !tv.is_null() {
        let now = Timeval::from_nanos(realtime_nanos(ctx));
        ctx.write_bytes(tv, &now.to_bytes())?;
    }
    if !tz.is_null() {
        // struct timezone: UTC, no DST.
        ctx.write_bytes(tz, &[0; 8])?;
    }
    Ok(0)
}

/// `nanosleep(req, rem)`.  Nothing interrupts a sleep, so `rem` is only
/// ever zeroed.
pub fn nanosleep(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let req = args.ptr(0);
    let rem = args.ptr(1);
    if ctx.resumption() == Some(Resumption::TimedOut) {
        if !rem.is_null() {
            ctx.write_bytes(rem, &[0; TIMESPEC_SIZE])?;
        }
        return Ok(0);
    }
    let span = ctx.read_timespec(req)?;
    if span.is_zero() {
        return Ok(0);
    }
    let deadline = ctx.now().saturating_add(span);
    Err(SyscallError::Blocked(SyscallCondition::timer(deadline)))
}
