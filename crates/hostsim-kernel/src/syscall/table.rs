//! Syscall number → handler table.

use super::handler::{clone, futex, io, memory, process, random, signal, socket, time};
use super::{SyscallArgs, SyscallContext, SyscallResult};
use hostsim_abi::{nr, SYSCALL_TABLE_SIZE};

/// Signature shared by every handler.
pub type SyscallHandler = fn(&mut SyscallContext<'_>, &SyscallArgs) -> SyscallResult;

/// Fixed dispatch table, built once and shared read-only by all workers.
#[derive(Clone)]
pub struct SyscallTable {
    handlers: Vec<Option<SyscallHandler>>,
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl SyscallTable {
    /// A table with no handlers.
    pub fn empty() -> Self {
        Self {
            handlers: vec![None; SYSCALL_TABLE_SIZE],
        }
    }

    /// Every syscall the virtual kernel emulates.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        let entries: &[(u64, SyscallHandler)] = &[
            // Threads and processes
            (nr::CLONE, clone::clone),
            (nr::FORK, process::fork),
            (nr::GETTID, process::gettid),
            (nr::GETPID, process::getpid),
            (nr::GETPPID, process::getppid),
            (nr::SET_TID_ADDRESS, process::set_tid_address),
            (nr::EXIT, process::exit),
            (nr::EXIT_GROUP, process::exit_group),
            (nr::WAIT4, process::wait4),
            (nr::KILL, signal::kill),
            (nr::TGKILL, signal::tgkill),
            // Memory
            (nr::MMAP, memory::mmap),
            (nr::MUNMAP, memory::munmap),
            (nr::BRK, memory::brk),
            // Time
            (nr::CLOCK_GETTIME, time::clock_gettime),
            (nr::GETTIMEOFDAY, time::gettimeofday),
            (nr::NANOSLEEP, time::nanosleep),
            // Futex
            (nr::FUTEX, futex::futex),
            // Sockets
            (nr::SOCKET, socket::socket),
            (nr::BIND, socket::bind),
            (nr::LISTEN, socket::listen),
            (nr::ACCEPT, socket::accept),
            (nr::ACCEPT4, socket::accept4),
            (nr::CONNECT, socket::connect),
            (nr::SENDTO, socket::sendto),
            (nr::RECVFROM, socket::recvfrom),
            (nr::SHUTDOWN, socket::shutdown),
            (nr::GETSOCKNAME, socket::getsockname),
            (nr::GETPEERNAME, socket::getpeername),
            (nr::SETSOCKOPT, socket::setsockopt),
            // Descriptors
            (nr::READ, io::read),
            (nr::WRITE, io::write),
            (nr::CLOSE, io::close),
            // Randomness
            (nr::GETRANDOM, random::getrandom),
        ];
        for &(number, handler) in entries {
            table.register(number, handler);
        }
        table
    }

    /// Install `handler` for `number`, replacing any previous one.
    ///
    /// Numbers beyond the table size are ignored.
    pub fn register(&mut self, number: u64, handler: SyscallHandler) {
        if let Some(slot) = self.handlers.get_mut(number as usize) {
            *slot = Some(handler);
        }
    }

    pub fn lookup(&self, number: u64) -> Option<SyscallHandler> {
        self.handlers.get(number as usize).copied().flatten()
    }

    /// Number of installed handlers.
    pub fn len(&self) -> usize {
        self.handlers.iter().filter(|h| h.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_covers_emulated_syscalls() {
        let table = SyscallTable::standard();
        for number in [nr::CLONE, nr::GETTID, nr::FUTEX, nr::RECVFROM, nr::GETRANDOM] {
            assert!(table.lookup(number).is_some(), "missing {number}");
        }
        assert_eq!(table.len(), 34);
    }

    #[test]
    fn unknown_and_native_numbers_have_no_handler() {
        let table = SyscallTable::standard();
        assert!(table.lookup(nr::ARCH_PRCTL).is_none());
        assert!(table.lookup(400).is_none());
        assert!(table.lookup(u64::MAX).is_none());
    }

    #[test]
    fn register_ignores_out_of_range_numbers() {
        let mut table = SyscallTable::empty();
        table.register(u64::MAX, process::gettid);
        assert!(table.is_empty());
        table.register(nr::GETTID, process::gettid);
        assert_eq!(table.len(), 1);
    }
}
