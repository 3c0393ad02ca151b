//! Identifiers for simulated entities.
//!
//! Ids are plain lookup keys.  A stale id is never dereferenced; lookups
//! through the registry return [`RegistryError`](crate::error::RegistryError)
//! instead.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub const fn as_u32(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Index of a host in the simulation; also its fixed cross-host priority.
    HostId,
    "host"
);
id_type!(
    /// Process id, unique within a host.
    ProcessId,
    "pid"
);
id_type!(
    /// Thread id, unique within a host.  A main thread's tid equals its pid.
    ThreadId,
    "tid"
);
id_type!(
    /// Socket handle in a host's network stack.
    SocketId,
    "sock"
);

impl From<ProcessId> for ThreadId {
    fn from(pid: ProcessId) -> Self {
        ThreadId(pid.0)
    }
}

impl HostId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}
