//! Syscall ABI shared between hostsim guests and the virtual kernel.
//!
//! This crate defines the syscall numbers, error codes, flag bits and
//! in-memory struct layouts of the Linux x86_64 ABI that hostsim emulates.
//! It is `no_std`-compatible with zero dependencies, so guest-side code
//! and the kernel agree on one set of constants.
//!
//! # Calling convention
//!
//! A guest syscall is a number plus six raw 64-bit argument slots.  The
//! return value is a signed 64-bit integer; values in `-4095..=-1` denote
//! a negated [`Errno`], anything else is a successful result.
//!
//! ```text
//! guest                      kernel
//! ─────                      ──────
//! nr, [a0..a5]  ──────────→  dispatch(nr, args)
//!               ←──────────  rv >= 0        (success)
//!               ←──────────  rv == -errno   (failure)
//! ```

#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]

use core::fmt;

/// Number of argument slots in a syscall.
pub const SYSCALL_ARG_COUNT: usize = 6;

/// Size of the dispatch table; every emulated syscall number is below this.
pub const SYSCALL_TABLE_SIZE: usize = 512;

// ═══════════════════════════════════════════════════════════════════════
//  Syscall numbers (x86_64)
// ═══════════════════════════════════════════════════════════════════════

pub mod nr {
    //! x86_64 syscall numbers for the emulated subset.

    pub const READ: u64 = 0;
    pub const WRITE: u64 = 1;
    pub const CLOSE: u64 = 3;
    pub const MMAP: u64 = 9;
    pub const MUNMAP: u64 = 11;
    pub const BRK: u64 = 12;
    pub const NANOSLEEP: u64 = 35;
    pub const GETPID: u64 = 39;
    pub const SOCKET: u64 = 41;
    pub const CONNECT: u64 = 42;
    pub const ACCEPT: u64 = 43;
    pub const SENDTO: u64 = 44;
    pub const RECVFROM: u64 = 45;
    pub const SHUTDOWN: u64 = 48;
    pub const BIND: u64 = 49;
    pub const LISTEN: u64 = 50;
    pub const GETSOCKNAME: u64 = 51;
    pub const GETPEERNAME: u64 = 52;
    pub const SETSOCKOPT: u64 = 54;
    pub const CLONE: u64 = 56;
    pub const FORK: u64 = 57;
    pub const EXIT: u64 = 60;
    pub const WAIT4: u64 = 61;
    pub const KILL: u64 = 62;
    pub const GETTIMEOFDAY: u64 = 96;
    pub const GETPPID: u64 = 110;
    pub const ARCH_PRCTL: u64 = 158;
    pub const GETTID: u64 = 186;
    pub const FUTEX: u64 = 202;
    pub const SET_TID_ADDRESS: u64 = 218;
    pub const CLOCK_GETTIME: u64 = 228;
    pub const EXIT_GROUP: u64 = 231;
    pub const TGKILL: u64 = 234;
    pub const ACCEPT4: u64 = 288;
    pub const GETRANDOM: u64 = 318;
}

/// Human-readable name of a syscall number, for logs.
pub fn syscall_name(number: u64) -> Option<&'static str> {
    let name = match number {
        nr::READ => "read",
        nr::WRITE => "write",
        nr::CLOSE => "close",
        nr::MMAP => "mmap",
        nr::MUNMAP => "munmap",
        nr::BRK => "brk",
        nr::NANOSLEEP => "nanosleep",
        nr::GETPID => "getpid",
        nr::SOCKET => "socket",
        nr::CONNECT => "connect",
        nr::ACCEPT => "accept",
        nr::SENDTO => "sendto",
        nr::RECVFROM => "recvfrom",
        nr::SHUTDOWN => "shutdown",
        nr::BIND => "bind",
        nr::LISTEN => "listen",
        nr::GETSOCKNAME => "getsockname",
        nr::GETPEERNAME => "getpeername",
        nr::SETSOCKOPT => "setsockopt",
        nr::CLONE => "clone",
        nr::FORK => "fork",
        nr::EXIT => "exit",
        nr::WAIT4 => "wait4",
        nr::KILL => "kill",
        nr::GETTIMEOFDAY => "gettimeofday",
        nr::GETPPID => "getppid",
        nr::ARCH_PRCTL => "arch_prctl",
        nr::GETTID => "gettid",
        nr::FUTEX => "futex",
        nr::SET_TID_ADDRESS => "set_tid_address",
        nr::CLOCK_GETTIME => "clock_gettime",
        nr::EXIT_GROUP => "exit_group",
        nr::TGKILL => "tgkill",
        nr::ACCEPT4 => "accept4",
        nr::GETRANDOM => "getrandom",
        _ => return None,
    };
    Some(name)
}

// ═══════════════════════════════════════════════════════════════════════
//  Error numbers
// ═══════════════════════════════════════════════════════════════════════

/// A Linux error number, as returned (negated) from a failed syscall.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Errno(i32);

impl Errno {
    pub const EPERM: Errno = Errno(1);
    pub const ENOENT: Errno = Errno(2);
    pub const ESRCH: Errno = Errno(3);
    pub const EINTR: Errno = Errno(4);
    pub const EBADF: Errno = Errno(9);
    pub const ECHILD: Errno = Errno(10);
    pub const EAGAIN: Errno = Errno(11);
    pub const ENOMEM: Errno = Errno(12);
    pub const EFAULT: Errno = Errno(14);
    pub const ENODEV: Errno = Errno(19);
    pub const EINVAL: Errno = Errno(22);
    pub const EMFILE: Errno = Errno(24);
    pub const EPIPE: Errno = Errno(32);
    pub const ENOSYS: Errno = Errno(38);
    pub const ENOTSOCK: Errno = Errno(88);
    pub const EDESTADDRREQ: Errno = Errno(89);
    pub const EMSGSIZE: Errno = Errno(90);
    pub const ENOPROTOOPT: Errno = Errno(92);
    pub const EPROTONOSUPPORT: Errno = Errno(93);
    pub const ENOTSUP: Errno = Errno(95);
    pub const EAFNOSUPPORT: Errno = Errno(97);
    pub const EADDRINUSE: Errno = Errno(98);
    pub const EADDRNOTAVAIL: Errno = Errno(99);
    pub const ENETUNREACH: Errno = Errno(101);
    pub const ECONNRESET: Errno = Errno(104);
    pub const EISCONN: Errno = Errno(106);
    pub const ENOTCONN: Errno = Errno(107);
    pub const ETIMEDOUT: Errno = Errno(110);
    pub const ECONNREFUSED: Errno = Errno(111);
    pub const EALREADY: Errno = Errno(114);
    pub const EINPROGRESS: Errno = Errno(115);

    /// `EWOULDBLOCK` is the same value as `EAGAIN` on Linux.
    pub const EWOULDBLOCK: Errno = Errno::EAGAIN;
    /// `EOPNOTSUPP` is the same value as `ENOTSUP` on Linux.
    pub const EOPNOTSUPP: Errno = Errno::ENOTSUP;

    /// Largest value the kernel ever returns as an error.
    pub const MAX: i32 = 4095;

    /// Wrap a raw positive error number.
    pub const fn from_raw(raw: i32) -> Self {
        Errno(raw)
    }

    /// The positive error number.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// The value a syscall returns for this error.
    pub const fn to_syscall_return(self) -> i64 {
        -(self.0 as i64)
    }

    /// Interpret a raw syscall return value.
    ///
    /// Returns `Some(errno)` for values in the error range, `None` for
    /// successful results.
    pub const fn from_syscall_return(rv: i64) -> Option<Self> {
        if rv < 0 && rv >= -(Self::MAX as i64) {
            Some(Errno((-rv) as i32))
        } else {
            None
        }
    }

    /// Symbolic name, if this is one of the errors hostsim produces.
    pub const fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            1 => "EPERM",
            2 => "ENOENT",
            3 => "ESRCH",
            4 => "EINTR",
            9 => "EBADF",
            10 => "ECHILD",
            11 => "EAGAIN",
            12 => "ENOMEM",
            14 => "EFAULT",
            19 => "ENODEV",
            22 => "EINVAL",
            24 => "EMFILE",
            32 => "EPIPE",
            38 => "ENOSYS",
            88 => "ENOTSOCK",
            89 => "EDESTADDRREQ",
            90 => "EMSGSIZE",
            92 => "ENOPROTOOPT",
            93 => "EPROTONOSUPPORT",
            95 => "ENOTSUP",
            97 => "EAFNOSUPPORT",
            98 => "EADDRINUSE",
            99 => "EADDRNOTAVAIL",
            101 => "ENETUNREACH",
            104 => "ECONNRESET",
            106 => "EISCONN",
            107 => "ENOTCONN",
            110 => "ETIMEDOUT",
            111 => "ECONNREFUSED",
            114 => "EALREADY",
            115 => "EINPROGRESS",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Errno({})", self.0),
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  clone(2) flags
// ═══════════════════════════════════════════════════════════════════════

pub mod clone {
    //! Flag bits of the raw `clone` syscall (not the libc wrapper).

    pub const CSIGNAL: u64 = 0x0000_00ff;
    pub const CLONE_VM: u64 = 0x0000_0100;
    pub const CLONE_FS: u64 = 0x0000_0200;
    pub const CLONE_FILES: u64 = 0x0000_0400;
    pub const CLONE_SIGHAND: u64 = 0x0000_0800;
    pub const CLONE_PIDFD: u64 = 0x0000_1000;
    pub const CLONE_PTRACE: u64 = 0x0000_2000;
    pub const CLONE_VFORK: u64 = 0x0000_4000;
    pub const CLONE_PARENT: u64 = 0x0000_8000;
    pub const CLONE_THREAD: u64 = 0x0001_0000;
    pub const CLONE_NEWNS: u64 = 0x0002_0000;
    pub const CLONE_SYSVSEM: u64 = 0x0004_0000;
    pub const CLONE_SETTLS: u64 = 0x0008_0000;
    pub const CLONE_PARENT_SETTID: u64 = 0x0010_0000;
    pub const CLONE_CHILD_CLEARTID: u64 = 0x0020_0000;
    pub const CLONE_DETACHED: u64 = 0x0040_0000;
    pub const CLONE_UNTRACED: u64 = 0x0080_0000;
    pub const CLONE_CHILD_SETTID: u64 = 0x0100_0000;

    /// Sharing flags a thread-creating clone must carry.
    ///
    /// Anything less would give the new thread a partially private view of
    /// its process, which the virtual kernel does not model.
    pub const REQUIRED_THREAD_FLAGS: u64 =
        CLONE_VM | CLONE_FS | CLONE_FILES | CLONE_SIGHAND | CLONE_THREAD | CLONE_SYSVSEM;

    /// Flags whose effect the virtual kernel applies itself.
    pub const EMULATED_FLAGS: u64 = CLONE_PARENT_SETTID | CLONE_CHILD_SETTID | CLONE_CHILD_CLEARTID;

    /// Flags that only affect the native thread and may pass through.
    pub const NATIVE_FLAGS: u64 = CLONE_SETTLS;

    /// The flags glibc's `pthread_create` passes.
    pub const PTHREAD_CREATE_FLAGS: u64 = REQUIRED_THREAD_FLAGS
        | CLONE_SETTLS
        | CLONE_PARENT_SETTID
        | CLONE_CHILD_CLEARTID;
}

// ═══════════════════════════════════════════════════════════════════════
//  Sockets
// ═══════════════════════════════════════════════════════════════════════

pub mod socket {
    //! Socket families, types, options and message flags.

    pub const AF_UNIX: u64 = 1;
    pub const AF_INET: u64 = 2;
    pub const AF_INET6: u64 = 10;

    pub const SOCK_STREAM: u64 = 1;
    pub const SOCK_DGRAM: u64 = 2;
    pub const SOCK_TYPE_MASK: u64 = 0xf;
    pub const SOCK_NONBLOCK: u64 = 0o4000;
    pub const SOCK_CLOEXEC: u64 = 0o2000000;

    pub const IPPROTO_IP: u64 = 0;
    pub const IPPROTO_TCP: u64 = 6;
    pub const IPPROTO_UDP: u64 = 17;

    pub const SOL_SOCKET: u64 = 1;
    pub const SO_REUSEADDR: u64 = 2;
    pub const SO_RCVTIMEO: u64 = 20;

    pub const MSG_PEEK: u64 = 0x2;
    pub const MSG_DONTWAIT: u64 = 0x40;
    pub const MSG_NOSIGNAL: u64 = 0x4000;

    pub const SHUT_RD: u64 = 0;
    pub const SHUT_WR: u64 = 1;
    pub const SHUT_RDWR: u64 = 2;

    /// Wildcard IPv4 address.
    pub const INADDR_ANY: [u8; 4] = [0, 0, 0, 0];
    /// Loopback IPv4 address.
    pub const INADDR_LOOPBACK: [u8; 4] = [127, 0, 0, 1];
}

/// Size of `struct sockaddr_in` in bytes.
pub const SOCKADDR_IN_SIZE: usize = 16;

/// An IPv4 socket address as laid out in `struct sockaddr_in`.
///
/// ```text
/// Offset  Size  Field
/// ──────  ────  ─────────────
/// 0x00    2     sin_family   (native endian)
/// 0x02    2     sin_port     (network byte order)
/// 0x04    4     sin_addr     (network byte order)
/// 0x08    8     sin_zero
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SockaddrIn {
    pub addr: [u8; 4],
    pub port: u16,
}

impl SockaddrIn {
    pub const fn new(addr: [u8; 4], port: u16) -> Self {
        Self { addr, port }
    }

    /// Encode into the guest-visible byte layout.
    pub fn to_bytes(&self) -> [u8; SOCKADDR_IN_SIZE] {
        let mut buf = [0u8; SOCKADDR_IN_SIZE];
        buf[0..2].copy_from_slice(&(socket::AF_INET as u16).to_le_bytes());
        buf[2..4].copy_from_slice(&self.port.to_be_bytes());
        buf[4..8].copy_from_slice(&self.addr);
        buf
    }

    /// Decode from guest bytes.
    ///
    /// Returns `None` if the buffer is too short or the family is not
    /// `AF_INET`.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < SOCKADDR_IN_SIZE {
            return None;
        }
        let family = u16::from_le_bytes([buf[0], buf[1]]) as u64;
        if family != socket::AF_INET {
            return None;
        }
        let port = u16::from_be_bytes([buf[2], buf[3]]);
        let addr = [buf[4], buf[5], buf[6], buf[7]];
        Some(Self { addr, port })
    }

    pub fn is_unspecified(&self) -> bool {
        self.addr == socket::INADDR_ANY
    }

    pub fn is_loopback(&self) -> bool {
        self.addr[0] == 127
    }
}

impl fmt::Display for SockaddrIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}:{}",
            self.addr[0], self.addr[1], self.addr[2], self.addr[3], self.port
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Futex
// ═══════════════════════════════════════════════════════════════════════

pub mod futex {
    pub const FUTEX_WAIT: u64 = 0;
    pub const FUTEX_WAKE: u64 = 1;
    pub const FUTEX_PRIVATE_FLAG: u64 = 128;
    pub const FUTEX_CLOCK_REALTIME: u64 = 256;
    pub const FUTEX_CMD_MASK: u64 = !(FUTEX_PRIVATE_FLAG | FUTEX_CLOCK_REALTIME);
}

// ═══════════════════════════════════════════════════════════════════════
//  Memory mapping
// ═══════════════════════════════════════════════════════════════════════

pub mod mman {
    pub const PROT_NONE: u64 = 0x0;
    pub const PROT_READ: u64 = 0x1;
    pub const PROT_WRITE: u64 = 0x2;
    pub const PROT_EXEC: u64 = 0x4;

    pub const MAP_SHARED: u64 = 0x01;
    pub const MAP_PRIVATE: u64 = 0x02;
    pub const MAP_FIXED: u64 = 0x10;
    pub const MAP_ANONYMOUS: u64 = 0x20;

    /// Guest page size.
    pub const PAGE_SIZE: u64 = 4096;
}

// ═══════════════════════════════════════════════════════════════════════
//  Signals and wait status
// ═══════════════════════════════════════════════════════════════════════

pub mod signal {
    pub const SIGHUP: i32 = 1;
    pub const SIGINT: i32 = 2;
    pub const SIGQUIT: i32 = 3;
    pub const SIGABRT: i32 = 6;
    pub const SIGKILL: i32 = 9;
    pub const SIGUSR1: i32 = 10;
    pub const SIGSEGV: i32 = 11;
    pub const SIGUSR2: i32 = 12;
    pub const SIGPIPE: i32 = 13;
    pub const SIGALRM: i32 = 14;
    pub const SIGTERM: i32 = 15;
    pub const SIGCHLD: i32 = 17;
    pub const SIGCONT: i32 = 18;
    pub const SIGSTOP: i32 = 19;
    pub const SIGWINCH: i32 = 28;

    /// Highest valid signal number.
    pub const SIGRTMAX: i32 = 64;

    /// Whether the default disposition of `sig` terminates the process.
    pub const fn default_is_fatal(sig: i32) -> bool {
        !matches!(sig, 0 | SIGCHLD | SIGCONT | SIGSTOP | SIGWINCH)
    }

    /// Exit code a shell reports for a process killed by `sig`.
    pub const fn return_code_for_signal(sig: i32) -> i32 {
        128 + sig
    }
}

pub mod wait {
    pub const WNOHANG: u64 = 1;

    /// Wait status for a normal exit with `code`.
    pub const fn status_exited(code: i32) -> i32 {
        (code & 0xff) << 8
    }

    /// Wait status for termination by `sig`.
    pub const fn status_signaled(sig: i32) -> i32 {
        sig & 0x7f
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Time
// ═══════════════════════════════════════════════════════════════════════

pub mod time {
    pub const CLOCK_REALTIME: u64 = 0;
    pub const CLOCK_MONOTONIC: u64 = 1;
    pub const CLOCK_PROCESS_CPUTIME_ID: u64 = 2;
    pub const CLOCK_THREAD_CPUTIME_ID: u64 = 3;
    pub const CLOCK_MONOTONIC_RAW: u64 = 4;
    pub const CLOCK_REALTIME_COARSE: u64 = 5;
    pub const CLOCK_MONOTONIC_COARSE: u64 = 6;
    pub const CLOCK_BOOTTIME: u64 = 7;

    /// Wall-clock time at simulation start: 2000-01-01T00:00:00Z.
    pub const SIMULATION_EPOCH_SECS: u64 = 946_684_800;

    pub const NANOS_PER_SEC: u64 = 1_000_000_000;
}

/// Size of `struct timespec` / `struct timeval` in bytes.
pub const TIMESPEC_SIZE: usize = 16;

/// `struct timespec { tv_sec: i64, tv_nsec: i64 }`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub const fn from_nanos(ns: u64) -> Self {
        Self {
            sec: (ns / time::NANOS_PER_SEC) as i64,
            nsec: (ns % time::NANOS_PER_SEC) as i64,
        }
    }

    /// Total nanoseconds, or `None` for negative or out-of-range fields.
    pub fn to_nanos(&self) -> Option<u64> {
        if self.sec < 0 || self.nsec < 0 || self.nsec >= time::NANOS_PER_SEC as i64 {
            return None;
        }
        (self.sec as u64)
            .checked_mul(time::NANOS_PER_SEC)?
            .checked_add(self.nsec as u64)
    }

    pub fn to_bytes(&self) -> [u8; TIMESPEC_SIZE] {
        let mut buf = [0u8; TIMESPEC_SIZE];
        buf[0..8].copy_from_slice(&self.sec.to_le_bytes());
        buf[8..16].copy_from_slice(&self.nsec.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < TIMESPEC_SIZE {
            return None;
        }
        let mut sec = [0u8; 8];
        let mut nsec = [0u8; 8];
        sec.copy_from_slice(&buf[0..8]);
        nsec.copy_from_slice(&buf[8..16]);
        Some(Self {
            sec: i64::from_le_bytes(sec),
            nsec: i64::from_le_bytes(nsec),
        })
    }
}

/// `struct timeval { tv_sec: i64, tv_usec: i64 }`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeval {
    pub sec: i64,
    pub usec: i64,
}

impl Timeval {
    pub const fn from_nanos(ns: u64) -> Self {
        Self {
            sec: (ns / time::NANOS_PER_SEC) as i64,
            usec: ((ns % time::NANOS_PER_SEC) / 1_000) as i64,
        }
    }

    /// Total nanoseconds, or `None` for negative or out-of-range fields.
    pub fn to_nanos(&self) -> Option<u64> {
        if self.sec < 0 || self.usec < 0 || self.usec >= 1_000_000 {
            return None;
        }
        (self.sec as u64)
            .checked_mul(time::NANOS_PER_SEC)?
            .checked_add(self.usec as u64 * 1_000)
    }

    pub fn to_bytes(&self) -> [u8; TIMESPEC_SIZE] {
        let mut buf = [0u8; TIMESPEC_SIZE];
        buf[0..8].copy_from_slice(&self.sec.to_le_bytes());
        buf[8..16].copy_from_slice(&self.usec.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        let ts = Timespec::from_bytes(buf)?;
        Some(Self {
            sec: ts.sec,
            usec: ts.nsec,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  arch_prctl
// ═══════════════════════════════════════════════════════════════════════

pub mod prctl {
    pub const ARCH_SET_GS: u64 = 0x1001;
    pub const ARCH_SET_FS: u64 = 0x1002;
    pub const ARCH_GET_FS: u64 = 0x1003;
    pub const ARCH_GET_GS: u64 = 0x1004;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_return_value_roundtrip() {
        assert_eq!(Errno::EFAULT.to_syscall_return(), -14);
        assert_eq!(Errno::from_syscall_return(-14), Some(Errno::EFAULT));
        assert_eq!(Errno::from_syscall_return(0), None);
        assert_eq!(Errno::from_syscall_return(1234), None);
        // Large negative values are valid results (e.g. mmap addresses), not errors.
        assert_eq!(Errno::from_syscall_return(-5000), None);
    }

    #[test]
    fn errno_aliases() {
        assert_eq!(Errno::EWOULDBLOCK, Errno::EAGAIN);
        assert_eq!(Errno::EOPNOTSUPP, Errno::ENOTSUP);
    }

    #[test]
    fn errno_debug_uses_symbolic_name() {
        assert_eq!(format!("{:?}", Errno::ENOSYS), "ENOSYS");
        assert_eq!(format!("{:?}", Errno::from_raw(200)), "Errno(200)");
    }

    #[test]
    fn syscall_names_cover_table() {
        assert_eq!(syscall_name(nr::CLONE), Some("clone"));
        assert_eq!(syscall_name(nr::GETTID), Some("gettid"));
        assert_eq!(syscall_name(9999), None);
        for n in [nr::GETRANDOM, nr::ACCEPT4, nr::TGKILL, nr::EXIT_GROUP] {
            assert!((n as usize) < SYSCALL_TABLE_SIZE);
        }
    }

    #[test]
    fn required_thread_flags_exclude_emulated_flags() {
        assert_eq!(clone::REQUIRED_THREAD_FLAGS & clone::EMULATED_FLAGS, 0);
        assert_eq!(clone::REQUIRED_THREAD_FLAGS & clone::NATIVE_FLAGS, 0);
        assert_eq!(
            clone::PTHREAD_CREATE_FLAGS & clone::REQUIRED_THREAD_FLAGS,
            clone::REQUIRED_THREAD_FLAGS
        );
    }

    #[test]
    fn sockaddr_layout() {
        let sa = SockaddrIn::new([10, 0, 0, 2], 8080);
        let bytes = sa.to_bytes();
        assert_eq!(&bytes[0..2], &[2, 0]);
        assert_eq!(&bytes[2..4], &[0x1f, 0x90]);
        assert_eq!(&bytes[4..8], &[10, 0, 0, 2]);
        assert_eq!(SockaddrIn::from_bytes(&bytes), Some(sa));
        assert_eq!(sa.to_string(), "10.0.0.2:8080");
    }

    #[test]
    fn sockaddr_rejects_short_or_foreign_family() {
        assert!(SockaddrIn::from_bytes(&[2, 0, 0]).is_none());
        let mut bytes = SockaddrIn::new([1, 2, 3, 4], 1).to_bytes();
        bytes[0] = socket::AF_INET6 as u8;
        assert!(SockaddrIn::from_bytes(&bytes).is_none());
    }

    #[test]
    fn timespec_validation() {
        let ts = Timespec::from_nanos(5_000_000_123);
        assert_eq!(ts, Timespec { sec: 5, nsec: 123 });
        assert_eq!(ts.to_nanos(), Some(5_000_000_123));
        assert_eq!(Timespec::from_bytes(&ts.to_bytes()), Some(ts));
        assert!(Timespec { sec: -1, nsec: 0 }.to_nanos().is_none());
        assert!(Timespec { sec: 0, nsec: 1_000_000_000 }.to_nanos().is_none());
    }

    #[test]
    fn timeval_truncates_to_micros() {
        let tv = Timeval::from_nanos(1_500_001_999);
        assert_eq!(tv, Timeval { sec: 1, usec: 500_001 });
        assert_eq!(tv.to_nanos(), Some(1_500_001_000));
    }

    #[test]
    fn wait_status_encoding() {
        assert_eq!(wait::status_exited(3), 0x300);
        assert_eq!(wait::status_signaled(signal::SIGKILL), 9);
        assert_eq!(signal::return_code_for_signal(signal::SIGKILL), 137);
        assert!(signal::default_is_fatal(signal::SIGTERM));
        assert!(!signal::default_is_fatal(signal::SIGCHLD));
    }
}
