//! `futex(2)`: `FUTEX_WAIT` and `FUTEX_WAKE`.

use crate::memory::GuestPtr;
use crate::syscall::condition::{BlockReason, Resumption, SyscallCondition};
use crate::syscall::{SyscallArgs, SyscallContext, SyscallError, SyscallResult};
use hostsim_abi::futex::{FUTEX_CMD_MASK, FUTEX_WAIT, FUTEX_WAKE};
use hostsim_abi::Errno;
use log::warn;

/// `futex(uaddr, op, val, timeout, uaddr2, val3)`.
///
/// Private and shared futexes are both keyed by process and address.
pub fn futex(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let addr = args.ptr(0);
    let op = args.get(1);
    let val = args.get(2) as u32;
    match op & FUTEX_CMD_MASK {
        FUTEX_WAIT => wait(ctx, addr, val, args.ptr(3)),
        FUTEX_WAKE => {
            let pid = ctx.pid();
            let woken = ctx.host().futex_wake(pid, addr.addr(), val as usize)?;
            Ok(woken as i64)
        }
        cmd => {
            warn!("{} {}: unsupported futex op {cmd}", ctx.pid(), ctx.tid());
            Err(Errno::ENOSYS.into())
        }
    }
}

fn wait(ctx: &mut SyscallContext<'_>, addr: GuestPtr, val: u32, timeout: GuestPtr) -> SyscallResult {
    match ctx.resumption() {
        Some(Resumption::Woken) => return Ok(0),
        Some(Resumption::TimedOut) => return Err(Errno::ETIMEDOUT.into()),
        None => {}
    }
    if ctx.read_u32(addr)? != val {
        return Err(Errno::EAGAIN.into());
    }
    let mut cond = SyscallCondition::new(BlockReason::Futex {
        pid: ctx.pid(),
        addr: addr.addr(),
    });
    if !timeout.is_null() {
        let span = ctx.read_timespec(timeout)?;
        cond = cond.with_deadline(ctx.now().saturating_add(span));
    }
    Err(SyscallError::Blocked(cond))
}
