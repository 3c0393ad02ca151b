//! Syscall handlers, one module per subsystem.
//!
//! Every handler has the [`SyscallHandler`](super::SyscallHandler) shape.
//! A handler that may block is written so that re-entering it with the same
//! arguments is safe: state changes that must happen once are made before
//! the point where it can return `Blocked`, or are idempotent.

pub mod clone;
pub mod futex;
pub mod io;
pub mod memory;
pub mod process;
pub mod random;
pub mod signal;
pub mod socket;
pub mod time;
