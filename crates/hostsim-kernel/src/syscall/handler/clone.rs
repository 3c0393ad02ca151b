//! Thread creation.

use crate::syscall::{SyscallArgs, SyscallContext, SyscallResult};
use crate::thread::{CloneKind, CloneRequest};
use crate::verified::clone::check_thread_flags;
use hostsim_abi::clone::{
    CLONE_CHILD_CLEARTID, CLONE_CHILD_SETTID, CLONE_PARENT_SETTID, CLONE_SETTLS,
};
use hostsim_abi::Errno;
use log::warn;

/// `clone(flags, stack, parent_tid, child_tid, tls)`.
///
/// Only thread creation is supported: the flags must request a thread that
/// shares everything with its parent.  Anything else fails with `ENOTSUP`
/// before a thread exists.  Processes are created with `fork`.
pub fn clone(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let flags = args.get(0);
    let stack = args.ptr(1);
    let parent_tid = args.ptr(2);
    let child_tid = args.ptr(3);
    let tls = args.ptr(4);

    let check = check_thread_flags(flags);
    if !check.is_acceptable() {
        warn!(
            "{} {}: clone flags {flags:#x} lack required {:#x}",
            ctx.pid(),
            ctx.tid(),
            check.missing
        );
        return Err(Errno::ENOTSUP.into());
    }
    if check.unhandled != 0 {
        warn!(
            "{} {}: ignoring unhandled clone flags {:#x}",
            ctx.pid(),
            ctx.tid(),
            check.unhandled
        );
    }

    // Fault before anything is created.
    if flags & CLONE_PARENT_SETTID != 0 {
        ctx.memory()?.check(parent_tid, 4)?;
    }
    if flags & CLONE_CHILD_SETTID != 0 {
        ctx.memory()?.check(child_tid, 4)?;
    }

    let request = CloneRequest {
        kind: CloneKind::Thread,
        stack,
        tls: (flags & CLONE_SETTLS != 0).then_some(tls),
    };
    let backend = ctx.backend().clone_thread(&request)?;
    let pid = ctx.pid();
    let tid = ctx.host().create_thread(pid, backend)?;

    if flags & CLONE_PARENT_SETTID != 0 {
        ctx.write_u32(parent_tid, tid.as_u32())?;
    }
    if flags & CLONE_CHILD_SETTID != 0 {
        ctx.write_u32(child_tid, tid.as_u32())?;
    }
    if flags & CLONE_CHILD_CLEARTID != 0 {
        ctx.host().thread_mut(tid)?.clear_child_tid = Some(child_tid);
    }
    Ok(tid.as_u32() as i64)
}
