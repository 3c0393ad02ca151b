//! Syscall dispatch.
//!
//! A guest syscall arrives as a number plus six raw argument slots.  The
//! dispatcher looks the number up in the fixed [`SyscallTable`], runs the
//! handler against a [`SyscallContext`] and folds its result into a
//! [`SyscallOutcome`].  A handler that cannot finish returns
//! [`SyscallError::Blocked`]; the host then parks the thread and re-enters
//! the same handler with the same arguments when the condition resolves.

pub mod condition;
pub mod context;
pub mod handler;
pub mod table;

pub use condition::{BlockReason, Resumption, SyscallCondition};
pub use context::SyscallContext;
pub use table::{SyscallHandler, SyscallTable};

use crate::error::{RegistryError, SimError};
use crate::memory::{GuestPtr, MemoryError};
use hostsim_abi::{syscall_name, Errno, SYSCALL_ARG_COUNT};
use log::{trace, warn};
use std::fmt;

/// Raw syscall arguments.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyscallArgs {
    pub raw: [u64; SYSCALL_ARG_COUNT],
}

impl SyscallArgs {
    pub fn new(raw: [u64; SYSCALL_ARG_COUNT]) -> Self {
        Self { raw }
    }

    pub fn get(&self, index: usize) -> u64 {
        self.raw[index]
    }

    pub fn ptr(&self, index: usize) -> GuestPtr {
        GuestPtr::new(self.raw[index])
    }

    /// The slot as a C `int` (file descriptors, flags, signal numbers).
    pub fn int(&self, index: usize) -> i32 {
        self.raw[index] as i32
    }

    pub fn usize(&self, index: usize) -> usize {
        self.raw[index] as usize
    }
}

/// A syscall as issued by a guest thread.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SyscallRequest {
    pub number: u64,
    pub args: SyscallArgs,
}

impl SyscallRequest {
    /// Build a request from up to six arguments; missing slots are zero.
    pub fn new(number: u64, args: &[u64]) -> Self {
        let mut raw = [0u64; SYSCALL_ARG_COUNT];
        raw[..args.len()].copy_from_slice(args);
        Self {
            number,
            args: SyscallArgs::new(raw),
        }
    }

    pub fn name(&self) -> &'static str {
        syscall_name(self.number).unwrap_or("unknown")
    }
}

impl fmt::Debug for SyscallRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.number)?;
        f.debug_list().entries(self.args.raw.iter().map(|a| format!("{a:#x}"))).finish()
    }
}

/// Why a handler did not complete with a value.
#[derive(Debug)]
pub enum SyscallError {
    Failed(Errno),
    Blocked(SyscallCondition),
    /// The simulation itself is broken; the run stops.
    Fatal(SimError),
}

impl From<SimError> for SyscallError {
    fn from(err: SimError) -> Self {
        SyscallError::Fatal(err)
    }
}

impl From<RegistryError> for SyscallError {
    fn from(err: RegistryError) -> Self {
        SyscallError::Fatal(err.into())
    }
}

impl From<Errno> for SyscallError {
    fn from(errno: Errno) -> Self {
        SyscallError::Failed(errno)
    }
}

impl From<MemoryError> for SyscallError {
    fn from(err: MemoryError) -> Self {
        SyscallError::Failed(err.into())
    }
}

/// What a handler returns.
pub type SyscallResult = Result<i64, SyscallError>;

/// Final shape of a dispatched syscall.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyscallOutcome {
    Done(i64),
    DoneWithError(Errno),
    Blocked(SyscallCondition),
}

impl SyscallOutcome {
    /// The value the guest sees, if the syscall completed.
    pub fn return_value(&self) -> Option<i64> {
        match self {
            SyscallOutcome::Done(rv) => Some(*rv),
            SyscallOutcome::DoneWithError(errno) => Some(errno.to_syscall_return()),
            SyscallOutcome::Blocked(_) => None,
        }
    }
}

impl SyscallOutcome {
    /// Fold a handler result; fatal errors pass through.
    pub fn from_result(result: SyscallResult) -> Result<Self, SimError> {
        match result {
            Ok(rv) => Ok(SyscallOutcome::Done(rv)),
            Err(SyscallError::Failed(errno)) => Ok(SyscallOutcome::DoneWithError(errno)),
            Err(SyscallError::Blocked(cond)) => Ok(SyscallOutcome::Blocked(cond)),
            Err(SyscallError::Fatal(err)) => Err(err),
        }
    }
}

/// Route one syscall to its handler.
///
/// Numbers on the native allow-list go straight to the thread's backend.
/// Numbers without a handler fail with `ENOSYS`.  Only a broken simulator
/// state produces `Err`.
pub fn dispatch(
    ctx: &mut SyscallContext<'_>,
    request: &SyscallRequest,
) -> Result<SyscallOutcome, SimError> {
    if ctx.is_native(request.number) {
        let rv = ctx.native_syscall(request)?;
        trace!("{} {}: native {:?} = {}", ctx.pid(), ctx.tid(), request, rv);
        return Ok(match Errno::from_syscall_return(rv) {
            Some(errno) => SyscallOutcome::DoneWithError(errno),
            None => SyscallOutcome::Done(rv),
        });
    }

    let Some(handler) = ctx.table().lookup(request.number) else {
        warn!(
            "{} {}: unsupported syscall {} ({}), returning ENOSYS",
            ctx.pid(),
            ctx.tid(),
            request.number,
            request.name()
        );
        return Ok(SyscallOutcome::DoneWithError(Errno::ENOSYS));
    };

    let outcome = SyscallOutcome::from_result(handler(ctx, &request.args))?;
    trace!("{} {}: {:?} -> {:?}", ctx.pid(), ctx.tid(), request, outcome);
    Ok(outcome)
}
