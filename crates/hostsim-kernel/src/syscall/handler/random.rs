//! `getrandom(buf, len, flags)`, served from the host's seeded RNG.

use crate::syscall::{SyscallArgs, SyscallContext, SyscallResult};
use rand::RngCore;

pub fn getrandom(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let buf = args.ptr(0);
    let len = args.usize(1);
    if len == 0 {
        return Ok(0);
    }
    ctx.memory()?.check(buf, len)?;
    let mut bytes = vec![0u8; len];
    ctx.host().rng.fill_bytes(&mut bytes);
    ctx.write_bytes(buf, &bytes)?;
    Ok(len as i64)
}
