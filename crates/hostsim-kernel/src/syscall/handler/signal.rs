//! `kill` and `tgkill`.
//!
//! There are no signal handlers.  A signal whose default action terminates
//! the process kills it at once; every other signal is dropped.

use crate::id::{ProcessId, ThreadId};
use crate::syscall::{SyscallArgs, SyscallContext, SyscallResult};
use hostsim_abi::signal::{default_is_fatal, SIGRTMAX};
use hostsim_abi::Errno;
use log::{debug, info};

pub fn kill(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let target = args.int(0);
    let sig = args.int(1);
    if target <= 0 {
        // Process groups are not modelled.
        return Err(Errno::ESRCH.into());
    }
    send(ctx, ProcessId(target as u32), sig)
}

pub fn tgkill(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let tgid = args.int(0);
    let tid = args.int(1);
    let sig = args.int(2);
    if tgid <= 0 || tid <= 0 {
        return Err(Errno::EINVAL.into());
    }
    let pid = ProcessId(tgid as u32);
    match ctx.host_ref().thread(ThreadId(tid as u32)) {
        Ok(thread) if thread.pid == pid && thread.is_live() => {}
        _ => return Err(Errno::ESRCH.into()),
    }
    send(ctx, pid, sig)
}

fn send(ctx: &mut SyscallContext<'_>, pid: ProcessId, sig: i32) -> SyscallResult {
    if !(0..=SIGRTMAX).contains(&sig) {
        return Err(Errno::EINVAL.into());
    }
    match ctx.host_ref().process(pid) {
        Ok(process) if process.is_alive() => {}
        _ => return Err(Errno::ESRCH.into()),
    }
    if sig == 0 {
        return Ok(0);
    }
    if default_is_fatal(sig) {
        info!("{} {}: signal {sig} kills {pid}", ctx.pid(), ctx.tid());
        ctx.host().kill_process(pid, sig)?;
    } else {
        debug!("{} {}: ignoring signal {sig} to {pid}", ctx.pid(), ctx.tid());
    }
    Ok(0)
}
