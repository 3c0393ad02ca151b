//! `read`, `write` and `close` on the descriptor table.
//!
//! Standard output and error are captured per process.  Standard input is
//! always at end of file.

use super::socket::{recv_common, send_common};
use crate::descriptor::Descriptor;
use crate::memory::GuestPtr;
use crate::net::NetEffects;
use crate::syscall::{SyscallArgs, SyscallContext, SyscallResult};
use hostsim_abi::Errno;

pub fn read(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let fd = args.int(0);
    let buf = args.ptr(1);
    let len = args.usize(2);
    match ctx.process()?.fds.get(fd)? {
        Descriptor::Stdin => Ok(0),
        Descriptor::Stdout | Descriptor::Stderr => Err(Errno::EBADF.into()),
        Descriptor::Socket(id) => recv_common(ctx, id, buf, len, 0, GuestPtr::NULL, GuestPtr::NULL),
    }
}

pub fn write(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let fd = args.int(0);
    let buf = args.ptr(1);
    let len = args.usize(2);
    let descriptor = ctx.process()?.fds.get(fd)?;
    if let Descriptor::Socket(id) = descriptor {
        return send_common(ctx, id, buf, len, 0, None);
    }
    if descriptor == Descriptor::Stdin {
        return Err(Errno::EBADF.into());
    }
    if len == 0 {
        return Ok(0);
    }
    let data = ctx.read_bytes(buf, len)?;
    let process = ctx.process_mut()?;
    match descriptor {
        Descriptor::Stderr => process.stderr.extend_from_slice(&data),
        _ => process.stdout.extend_from_slice(&data),
    }
    Ok(len as i64)
}

/// `close(fd)`.  The socket goes away once no descriptor refers to it.
pub fn close(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let descriptor = ctx.process_mut()?.fds.remove(args.int(0))?;
    if let Descriptor::Socket(id) = descriptor {
        let mut fx = NetEffects::default();
        ctx.net().release(id, &mut fx);
        ctx.apply(fx)?;
    }
    Ok(0)
}
