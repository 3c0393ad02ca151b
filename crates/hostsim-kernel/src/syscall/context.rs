//! What a handler sees: the calling thread, its process and its host.

use super::condition::{BlockReason, Resumption, SyscallCondition};
use super::{SyscallError, SyscallRequest, SyscallResult, SyscallTable};
use crate::error::SimError;
use crate::host::Host;
use crate::id::{ProcessId, SocketId, ThreadId};
use crate::memory::{GuestPtr, MemoryView};
use crate::net::{NetEffects, NetStack};
use crate::process::Process;
use crate::thread::ManagedThread;
use crate::time::{SimulationTime, VirtualTime};
use hostsim_abi::{Errno, SockaddrIn, Timespec, SOCKADDR_IN_SIZE, TIMESPEC_SIZE};

/// Borrowed state for one handler invocation.
pub struct SyscallContext<'a> {
    host: &'a mut Host,
    pid: ProcessId,
    tid: ThreadId,
    backend: &'a mut dyn ManagedThread,
    resumption: Option<Resumption>,
}

impl<'a> SyscallContext<'a> {
    pub fn new(
        host: &'a mut Host,
        pid: ProcessId,
        tid: ThreadId,
        backend: &'a mut dyn ManagedThread,
        resumption: Option<Resumption>,
    ) -> Self {
        Self {
            host,
            pid,
            tid,
            backend,
            resumption,
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    pub fn now(&self) -> VirtualTime {
        self.host.now()
    }

    /// `None` on first entry; set when a blocked call is re-entered.
    pub fn resumption(&self) -> Option<Resumption> {
        self.resumption
    }

    pub fn timed_out(&self) -> bool {
        self.resumption == Some(Resumption::TimedOut)
    }

    pub fn table(&self) -> &SyscallTable {
        &self.host.shared().table
    }

    pub fn is_native(&self, number: u64) -> bool {
        self.host.shared().params.native_syscalls.contains(&number)
    }

    /// Run `request` on the backend itself.
    pub fn native_syscall(&mut self, request: &SyscallRequest) -> Result<i64, SimError> {
        let process = self.host.process_mut(self.pid)?;
        Ok(self.backend.native_syscall(&mut process.memory, request))
    }

    pub(crate) fn host(&mut self) -> &mut Host {
        &mut *self.host
    }

    pub(crate) fn host_ref(&self) -> &Host {
        &*self.host
    }

    pub(crate) fn backend(&mut self) -> &mut dyn ManagedThread {
        &mut *self.backend
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Process and memory
    // ═══════════════════════════════════════════════════════════════════

    pub fn process(&self) -> Result<&Process, SyscallError> {
        Ok(self.host.process(self.pid)?)
    }

    pub fn process_mut(&mut self) -> Result<&mut Process, SyscallError> {
        Ok(self.host.process_mut(self.pid)?)
    }

    pub fn memory(&self) -> Result<&MemoryView, SyscallError> {
        Ok(&self.process()?.memory)
    }

    pub fn memory_mut(&mut self) -> Result<&mut MemoryView, SyscallError> {
        Ok(&mut self.process_mut()?.memory)
    }

    pub fn read_bytes(&self, ptr: GuestPtr, len: usize) -> Result<Vec<u8>, SyscallError> {
        Ok(self.memory()?.read(ptr, len)?)
    }

    pub fn write_bytes(&mut self, ptr: GuestPtr, bytes: &[u8]) -> Result<(), SyscallError> {
        Ok(self.memory_mut()?.write(ptr, bytes)?)
    }

    pub fn read_u32(&self, ptr: GuestPtr) -> Result<u32, SyscallError> {
        Ok(self.memory()?.read_u32(ptr)?)
    }

    pub fn write_u32(&mut self, ptr: GuestPtr, value: u32) -> Result<(), SyscallError> {
        Ok(self.memory_mut()?.write_u32(ptr, value)?)
    }

    pub fn write_i32(&mut self, ptr: GuestPtr, value: i32) -> Result<(), SyscallError> {
        Ok(self.memory_mut()?.write_i32(ptr, value)?)
    }

    /// Decode a `struct sockaddr_in` of `len` bytes.
    pub fn read_sockaddr(&self, ptr: GuestPtr, len: usize) -> Result<SockaddrIn, SyscallError> {
        if len < SOCKADDR_IN_SIZE {
            return Err(Errno::EINVAL.into());
        }
        let bytes = self.read_bytes(ptr, SOCKADDR_IN_SIZE)?;
        SockaddrIn::from_bytes(&bytes).ok_or_else(|| Errno::EAFNOSUPPORT.into())
    }

    /// Store `addr` through the `addr`/`addrlen` pair of an accept, recvfrom
    /// or get*name call.
    ///
    /// `*len_ptr` holds the buffer size on entry and the full address size
    /// on return; the address is truncated to fit.  A null `ptr` skips the
    /// write entirely.
    pub fn write_sockaddr(
        &mut self,
        ptr: GuestPtr,
        len_ptr: GuestPtr,
        addr: SockaddrIn,
    ) -> Result<(), SyscallError> {
        if ptr.is_null() {
            return Ok(());
        }
        let capacity = self.read_u32(len_ptr)? as usize;
        let bytes = addr.to_bytes();
        let n = capacity.min(SOCKADDR_IN_SIZE);
        self.write_bytes(ptr, &bytes[..n])?;
        self.write_u32(len_ptr, SOCKADDR_IN_SIZE as u32)
    }

    /// Decode a relative `struct timespec`.
    pub fn read_timespec(&self, ptr: GuestPtr) -> Result<SimulationTime, SyscallError> {
        let bytes = self.read_bytes(ptr, TIMESPEC_SIZE)?;
        Timespec::from_bytes(&bytes)
            .and_then(|ts| ts.to_nanos())
            .map(SimulationTime::from_nanos)
            .ok_or_else(|| Errno::EINVAL.into())
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Sockets
    // ═══════════════════════════════════════════════════════════════════

    pub fn net(&mut self) -> &mut NetStack {
        &mut self.host.net
    }

    pub fn net_ref(&self) -> &NetStack {
        &self.host.net
    }

    /// The socket behind descriptor `fd` of the calling process.
    pub fn socket(&self, fd: i32) -> Result<SocketId, SyscallError> {
        Ok(self.process()?.fds.socket(fd)?)
    }

    /// Send the packets and notifications a network operation produced.
    pub fn apply(&mut self, fx: NetEffects) -> Result<(), SyscallError> {
        Ok(self.host.apply_net_effects(fx)?)
    }

    /// Turn a socket's "would block" into either `EAGAIN` or a wait.
    ///
    /// Nonblocking sockets, `MSG_DONTWAIT` and expired waits get `EAGAIN`.
    /// Reads and accepts wait at most the socket's receive timeout.  Writes
    /// wait without a deadline: `SO_SNDTIMEO` is not modelled.
    pub fn would_block(
        &self,
        id: SocketId,
        reason: BlockReason,
        dontwait: bool,
    ) -> SyscallResult {
        let sock = self.host.net.get(id)?;
        if sock.nonblocking || dontwait || self.timed_out() {
            return Err(Errno::EAGAIN.into());
        }
        let mut cond = SyscallCondition::new(reason);
        let timed = matches!(
            reason,
            BlockReason::SocketReadable(_) | BlockReason::SocketAcceptable(_)
        );
        if let (true, Some(timeout)) = (timed, sock.recv_timeout) {
            cond = cond.with_deadline(self.now().saturating_add(timeout));
        }
        Err(SyscallError::Blocked(cond))
    }
}
