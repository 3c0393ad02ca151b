//! Process and thread identity, exit and reaping.

use crate::id::ProcessId;
use crate::memory::GuestPtr;
use crate::syscall::condition::{BlockReason, SyscallCondition};
use crate::syscall::{SyscallArgs, SyscallContext, SyscallError, SyscallResult};
use crate::thread::{CloneKind, CloneRequest};
use hostsim_abi::{wait, Errno};

/// Size of `struct rusage`; reported as all zeros.
const RUSAGE_SIZE: usize = 144;

pub fn fork(ctx: &mut SyscallContext<'_>, _args: &SyscallArgs) -> SyscallResult {
    let request = CloneRequest {
        kind: CloneKind::Process,
        stack: GuestPtr::NULL,
        tls: None,
    };
    let backend = ctx.backend().clone_thread(&request)?;
    let parent = ctx.pid();
    let child = ctx.host().fork_process(parent, backend)?;
    Ok(child.as_u32() as i64)
}

pub fn gettid(ctx: &mut SyscallContext<'_>, _args: &SyscallArgs) -> SyscallResult {
    Ok(ctx.tid().as_u32() as i64)
}

pub fn getpid(ctx: &mut SyscallContext<'_>, _args: &SyscallArgs) -> SyscallResult {
    Ok(ctx.pid().as_u32() as i64)
}

/// Processes launched from the config have no parent and see 0.
pub fn getppid(ctx: &mut SyscallContext<'_>, _args: &SyscallArgs) -> SyscallResult {
    Ok(ctx.process()?.ppid.map_or(0, |p| p.as_u32() as i64))
}

pub fn set_tid_address(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let ptr = args.ptr(0);
    let tid = ctx.tid();
    let thread = ctx.host().thread_mut(tid)?;
    thread.clear_child_tid = (!ptr.is_null()).then_some(ptr);
    Ok(tid.as_u32() as i64)
}

pub fn exit(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let code = args.int(0) & 0xff;
    let tid = ctx.tid();
    ctx.host().terminate_thread(tid, code)?;
    Ok(0)
}

pub fn exit_group(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let code = args.int(0) & 0xff;
    let pid = ctx.pid();
    ctx.host().exit_group(pid, code)?;
    Ok(0)
}

/// `wait4(pid, status, options, rusage)`.
///
/// `pid > 0` waits for that child; any other value waits for any child
/// (process groups are not modelled).
pub fn wait4(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let target = args.int(0);
    let status_ptr = args.ptr(1);
    let options = args.get(2);
    let rusage_ptr = args.ptr(3);
    let me = ctx.pid();

    let ready = {
        let mut children = ctx
            .host_ref()
            .processes()
            .filter(|p| p.ppid == Some(me) && !p.reaped)
            .filter(|p| target <= 0 || p.pid == ProcessId(target as u32))
            .peekable();
        if children.peek().is_none() {
            return Err(Errno::ECHILD.into());
        }
        children
            .find(|p| p.is_waitable())
            .and_then(|p| p.exit_status().map(|status| (p.pid, status)))
    };

    let Some((child, status)) = ready else {
        if options & wait::WNOHANG != 0 {
            return Ok(0);
        }
        return Err(SyscallError::Blocked(SyscallCondition::new(
            BlockReason::ChildExit { pid: me },
        )));
    };

    if !status_ptr.is_null() {
        ctx.write_i32(status_ptr, status.wait_status())?;
    }
    if !rusage_ptr.is_null() {
        ctx.write_bytes(rusage_ptr, &[0; RUSAGE_SIZE])?;
    }
    ctx.host().process_mut(child)?.reaped = true;
    Ok(child.as_u32() as i64)
}
