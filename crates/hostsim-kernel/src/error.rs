//! Fatal simulator errors.
//!
//! Guest-visible failures are [`Errno`](hostsim_abi::Errno) values and never
//! reach this module.  A [`SimError`] aborts the run.

use crate::config::ConfigError;
use crate::id::{HostId, ProcessId, ThreadId};
use crate::time::VirtualTime;
use thiserror::Error;

/// Errors that stop the simulation.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("event scheduled in the past: requested {requested}, now {now}")]
    InvalidTime {
        requested: VirtualTime,
        now: VirtualTime,
    },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("unknown program: {0}")]
    UnknownProgram(String),

    #[error("program {program} rejected its arguments: {message}")]
    ProgramArgs { program: String, message: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Stale-id lookups in the host/process/thread registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{0} not found")]
    HostNotFound(HostId),

    #[error("process {0} not found")]
    ProcessNotFound(ProcessId),

    #[error("thread {0} not found")]
    ThreadNotFound(ThreadId),
}

impl SimError {
    pub fn invariant(message: impl Into<String>) -> Self {
        SimError::InvariantViolation(message.into())
    }
}
