//! Anonymous mappings and the program break.

use crate::syscall::{SyscallArgs, SyscallContext, SyscallResult};
use hostsim_abi::mman::{MAP_ANONYMOUS, MAP_FIXED, MAP_PRIVATE, MAP_SHARED};
use hostsim_abi::Errno;
use log::warn;

/// `mmap(addr, len, prot, flags, fd, offset)`; the address hint is ignored.
pub fn mmap(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let len = args.get(1);
    let flags = args.get(3);
    if len == 0 || flags & (MAP_SHARED | MAP_PRIVATE) == 0 {
        return Err(Errno::EINVAL.into());
    }
    if flags & MAP_ANONYMOUS == 0 {
        warn!("{} {}: file-backed mmap is not supported", ctx.pid(), ctx.tid());
        return Err(Errno::ENODEV.into());
    }
    if flags & MAP_FIXED != 0 {
        warn!("{} {}: MAP_FIXED is not supported", ctx.pid(), ctx.tid());
        return Err(Errno::ENOTSUP.into());
    }
    let ptr = ctx.memory_mut()?.map_anonymous(len)?;
    Ok(ptr.addr() as i64)
}

pub fn munmap(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    ctx.memory_mut()?.unmap(args.ptr(0), args.get(1))?;
    Ok(0)
}

/// `brk(addr)` returns the resulting break; `brk(0)` queries it.
pub fn brk(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    Ok(ctx.memory_mut()?.set_brk(args.get(0)) as i64)
}
