//! IPv4 sockets.
//!
//! Socket state lives in the host's [`NetStack`](crate::net::NetStack);
//! these handlers decode guest arguments, call into it, and turn its
//! `EAGAIN` into either an error or a wait via
//! [`SyscallContext::would_block`].

use crate::descriptor::Descriptor;
use crate::id::SocketId;
use crate::memory::GuestPtr;
use crate::net::{NetEffects, SocketKind};
use crate::syscall::condition::{BlockReason, SyscallCondition};
use crate::syscall::{SyscallArgs, SyscallContext, SyscallError, SyscallResult};
use crate::time::SimulationTime;
use hostsim_abi::socket::{
    AF_INET, IPPROTO_IP, IPPROTO_TCP, IPPROTO_UDP, MSG_DONTWAIT, MSG_PEEK, SOCK_CLOEXEC,
    SOCK_DGRAM, SOCK_NONBLOCK, SOCK_STREAM, SOCK_TYPE_MASK, SOL_SOCKET, SO_RCVTIMEO,
    SO_REUSEADDR,
};
use hostsim_abi::{Errno, SockaddrIn, Timeval, SOCKADDR_IN_SIZE, TIMESPEC_SIZE};
use log::debug;

/// `socket(domain, type, protocol)`.
pub fn socket(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let domain = args.get(0);
    let ty = args.get(1);
    let protocol = args.get(2);
    if domain != AF_INET {
        return Err(Errno::EAFNOSUPPORT.into());
    }
    if ty & !(SOCK_TYPE_MASK | SOCK_NONBLOCK | SOCK_CLOEXEC) != 0 {
        return Err(Errno::EINVAL.into());
    }
    let kind = match (ty & SOCK_TYPE_MASK, protocol) {
        (SOCK_DGRAM, IPPROTO_IP | IPPROTO_UDP) => SocketKind::Udp,
        (SOCK_STREAM, IPPROTO_IP | IPPROTO_TCP) => SocketKind::Tcp,
        _ => return Err(Errno::EPROTONOSUPPORT.into()),
    };
    let id = ctx.net().create(kind, ty & SOCK_NONBLOCK != 0);
    install(ctx, id, ty & SOCK_CLOEXEC != 0)
}

/// Give `id` a descriptor in the calling process.
fn install(ctx: &mut SyscallContext<'_>, id: SocketId, cloexec: bool) -> SyscallResult {
    let inserted = ctx.process_mut()?.fds.insert(Descriptor::Socket(id), cloexec);
    match inserted {
        Ok(fd) => {
            ctx.net().retain(id);
            Ok(fd as i64)
        }
        Err(errno) => {
            let mut fx = NetEffects::default();
            ctx.net().destroy(id, &mut fx);
            ctx.apply(fx)?;
            Err(errno.into())
        }
    }
}

pub fn bind(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let id = ctx.socket(args.int(0))?;
    let addr = ctx.read_sockaddr(args.ptr(1), args.usize(2))?;
    ctx.net().bind(id, addr)?;
    Ok(0)
}

pub fn listen(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let id = ctx.socket(args.int(0))?;
    ctx.net().listen(id, args.int(1))?;
    Ok(0)
}

pub fn accept(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    accept_common(ctx, args, 0)
}

pub fn accept4(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let flags = args.get(3);
    if flags & !(SOCK_NONBLOCK | SOCK_CLOEXEC) != 0 {
        return Err(Errno::EINVAL.into());
    }
    accept_common(ctx, args, flags)
}

fn accept_common(ctx: &mut SyscallContext<'_>, args: &SyscallArgs, flags: u64) -> SyscallResult {
    let id = ctx.socket(args.int(0))?;
    let addr_ptr = args.ptr(1);
    let len_ptr = args.ptr(2);
    if !addr_ptr.is_null() {
        // Fault before a connection is taken off the queue.
        let capacity = ctx.read_u32(len_ptr)? as usize;
        ctx.memory()?.check(addr_ptr, capacity.min(SOCKADDR_IN_SIZE))?;
    }

    let child = match ctx.net().accept(id) {
        Ok(child) => child,
        Err(Errno::EAGAIN) => return ctx.would_block(id, BlockReason::SocketAcceptable(id), false),
        Err(errno) => return Err(errno.into()),
    };
    if flags & SOCK_NONBLOCK != 0 {
        ctx.net().get_mut(child)?.nonblocking = true;
    }
    let peer = ctx.net_ref().peer_name(child)?;
    let fd = install(ctx, child, flags & SOCK_CLOEXEC != 0)?;
    ctx.write_sockaddr(addr_ptr, len_ptr, peer)?;
    Ok(fd)
}

/// `connect(fd, addr, len)`.
///
/// A stream connect sends a SYN and waits for the handshake; re-entry polls
/// the outcome.
pub fn connect(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let id = ctx.socket(args.int(0))?;
    if ctx.resumption().is_some() {
        return match ctx.net().poll_connect(id)? {
            true => Ok(0),
            false => Err(SyscallError::Blocked(SyscallCondition::new(
                BlockReason::SocketConnected(id),
            ))),
        };
    }

    let addr = ctx.read_sockaddr(args.ptr(1), args.usize(2))?;
    let sock = ctx.net_ref().get(id)?;
    let (kind, nonblocking) = (sock.kind, sock.nonblocking);
    if kind == SocketKind::Tcp && !ctx.host_ref().is_reachable(addr.addr) {
        return Err(Errno::ENETUNREACH.into());
    }

    let mut fx = NetEffects::default();
    let result = ctx.net().connect(id, addr, &mut fx);
    ctx.apply(fx)?;
    match result {
        Ok(()) => Ok(0),
        Err(Errno::EINPROGRESS) if !nonblocking => Err(SyscallError::Blocked(
            SyscallCondition::new(BlockReason::SocketConnected(id)),
        )),
        Err(errno) => Err(errno.into()),
    }
}

/// `sendto(fd, buf, len, flags, addr, addrlen)`.
pub fn sendto(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let id = ctx.socket(args.int(0))?;
    let addr_ptr = args.ptr(4);
    let dst = if addr_ptr.is_null() {
        None
    } else {
        Some(ctx.read_sockaddr(addr_ptr, args.usize(5))?)
    };
    send_common(ctx, id, args.ptr(1), args.usize(2), args.get(3), dst)
}

/// Shared by `sendto` and `write`.
pub(crate) fn send_common(
    ctx: &mut SyscallContext<'_>,
    id: SocketId,
    buf: GuestPtr,
    len: usize,
    flags: u64,
    dst: Option<SockaddrIn>,
) -> SyscallResult {
    if len == 0 {
        return Ok(0);
    }
    let data = ctx.read_bytes(buf, len)?;
    // Stream sockets ignore the destination, like a connected socket does.
    let dst = match ctx.net_ref().get(id)?.kind {
        SocketKind::Udp => dst,
        SocketKind::Tcp => None,
    };
    let mut fx = NetEffects::default();
    let result = ctx.net().send(id, dst, &data, &mut fx);
    ctx.apply(fx)?;
    match result {
        Ok(n) => Ok(n as i64),
        Err(Errno::EAGAIN) => ctx.would_block(
            id,
            BlockReason::SocketWritable(id),
            flags & MSG_DONTWAIT != 0,
        ),
        Err(errno) => Err(errno.into()),
    }
}

/// `recvfrom(fd, buf, len, flags, addr, addrlen)`.
pub fn recvfrom(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let id = ctx.socket(args.int(0))?;
    recv_common(
        ctx,
        id,
        args.ptr(1),
        args.usize(2),
        args.get(3),
        args.ptr(4),
        args.ptr(5),
    )
}

/// Shared by `recvfrom` and `read`.
pub(crate) fn recv_common(
    ctx: &mut SyscallContext<'_>,
    id: SocketId,
    buf: GuestPtr,
    len: usize,
    flags: u64,
    addr_ptr: GuestPtr,
    len_ptr: GuestPtr,
) -> SyscallResult {
    if len == 0 {
        return Ok(0);
    }
    ctx.memory()?.check(buf, len)?;
    let kind = ctx.net_ref().get(id)?.kind;

    let mut fx = NetEffects::default();
    let result = ctx.net().recv(id, len, flags & MSG_PEEK != 0, &mut fx);
    ctx.apply(fx)?;
    let received = match result {
        Ok(received) => received,
        Err(Errno::EAGAIN) => {
            return ctx.would_block(
                id,
                BlockReason::SocketReadable(id),
                flags & MSG_DONTWAIT != 0,
            )
        }
        Err(errno) => return Err(errno.into()),
    };

    ctx.write_bytes(buf, &received.data)?;
    if let (SocketKind::Udp, Some(from)) = (kind, received.from) {
        ctx.write_sockaddr(addr_ptr, len_ptr, from)?;
    }
    Ok(received.data.len() as i64)
}

pub fn shutdown(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let id = ctx.socket(args.int(0))?;
    let mut fx = NetEffects::default();
    let result = ctx.net().shutdown(id, args.get(1), &mut fx);
    ctx.apply(fx)?;
    result?;
    Ok(0)
}

pub fn getsockname(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let id = ctx.socket(args.int(0))?;
    let name = ctx.net_ref().local_name(id)?;
    write_name(ctx, args, name)
}

pub fn getpeername(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let id = ctx.socket(args.int(0))?;
    let name = ctx.net_ref().peer_name(id)?;
    write_name(ctx, args, name)
}

fn write_name(ctx: &mut SyscallContext<'_>, args: &SyscallArgs, name: SockaddrIn) -> SyscallResult {
    let addr_ptr = args.ptr(1);
    if addr_ptr.is_null() {
        return Err(Errno::EFAULT.into());
    }
    ctx.write_sockaddr(addr_ptr, args.ptr(2), name)?;
    Ok(0)
}

/// `setsockopt(fd, level, name, value, len)`: `SO_RCVTIMEO` and
/// `SO_REUSEADDR`.
pub fn setsockopt(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> SyscallResult {
    let id = ctx.socket(args.int(0))?;
    let level = args.get(1);
    let name = args.get(2);
    let value = args.ptr(3);
    let len = args.usize(4);
    match (level, name) {
        (SOL_SOCKET, SO_RCVTIMEO) => {
            if len < TIMESPEC_SIZE {
                return Err(Errno::EINVAL.into());
            }
            let bytes = ctx.read_bytes(value, TIMESPEC_SIZE)?;
            let ns = Timeval::from_bytes(&bytes)
                .and_then(|tv| tv.to_nanos())
                .ok_or(Errno::EINVAL)?;
            ctx.net().get_mut(id)?.recv_timeout =
                (ns > 0).then(|| SimulationTime::from_nanos(ns));
            Ok(0)
        }
        (SOL_SOCKET, SO_REUSEADDR) => {
            if len < 4 {
                return Err(Errno::EINVAL.into());
            }
            let on = ctx.read_u32(value)? != 0;
            ctx.net().get_mut(id)?.reuse_addr = on;
            Ok(0)
        }
        _ => {
            debug!(
                "{} {}: unsupported socket option level {level} name {name}",
                ctx.pid(),
                ctx.tid()
            );
            Err(Errno::ENOPROTOOPT.into())
        }
    }
}
