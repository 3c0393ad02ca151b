//! Per-process file descriptor table.

use crate::id::SocketId;
use hostsim_abi::Errno;
use std::collections::BTreeMap;

/// Upper bound on open descriptors per process.
pub const MAX_DESCRIPTORS: i32 = 1024;

/// What a descriptor refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Descriptor {
    Stdin,
    Stdout,
    Stderr,
    Socket(SocketId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Entry {
    descriptor: Descriptor,
    cloexec: bool,
}

#[derive(Clone, Debug, Default)]
pub struct DescriptorTable {
    entries: BTreeMap<i32, Entry>,
}

impl DescriptorTable {
    /// A table with stdin, stdout and stderr open on 0, 1 and 2.
    pub fn with_stdio() -> Self {
        let mut table = Self::default();
        for descriptor in [Descriptor::Stdin, Descriptor::Stdout, Descriptor::Stderr] {
            let fd = table.insert(descriptor, false);
            debug_assert!(fd.is_ok());
        }
        table
    }

    /// Register `descriptor` at the lowest free number.
    pub fn insert(&mut self, descriptor: Descriptor, cloexec: bool) -> Result<i32, Errno> {
        let mut fd = 0;
        for &used in self.entries.keys() {
            if used != fd {
                break;
            }
            fd += 1;
        }
        if fd >= MAX_DESCRIPTORS {
            return Err(Errno::EMFILE);
        }
        self.entries.insert(fd, Entry { descriptor, cloexec });
        Ok(fd)
    }

    pub fn get(&self, fd: i32) -> Result<Descriptor, Errno> {
        self.entries
            .get(&fd)
            .map(|entry| entry.descriptor)
            .ok_or(Errno::EBADF)
    }

    /// The socket behind `fd`: `EBADF` if closed, `ENOTSOCK` if not a socket.
    pub fn socket(&self, fd: i32) -> Result<SocketId, Errno> {
        match self.get(fd)? {
            Descriptor::Socket(id) => Ok(id),
            _ => Err(Errno::ENOTSOCK),
        }
    }

    pub fn remove(&mut self, fd: i32) -> Result<Descriptor, Errno> {
        self.entries
            .remove(&fd)
            .map(|entry| entry.descriptor)
            .ok_or(Errno::EBADF)
    }

    pub fn is_cloexec(&self, fd: i32) -> bool {
        self.entries.get(&fd).is_some_and(|entry| entry.cloexec)
    }

    /// Remove every descriptor, returning them in fd order.
    pub fn drain(&mut self) -> Vec<Descriptor> {
        std::mem::take(&mut self.entries)
            .into_values()
            .map(|entry| entry.descriptor)
            .collect()
    }

    /// Sockets referenced by this table, one entry per descriptor.
    pub fn sockets(&self) -> impl Iterator<Item = SocketId> + '_ {
        self.entries.values().filter_map(|entry| match entry.descriptor {
            Descriptor::Socket(id) => Some(id),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdio_occupies_first_three() {
        let mut table = DescriptorTable::with_stdio();
        assert_eq!(table.get(1), Ok(Descriptor::Stdout));
        assert_eq!(table.insert(Descriptor::Socket(SocketId(0)), false), Ok(3));
    }

    #[test]
    fn lowest_free_number_is_reused() {
        let mut table = DescriptorTable::with_stdio();
        table.insert(Descriptor::Socket(SocketId(0)), false).unwrap();
        table.insert(Descriptor::Socket(SocketId(1)), true).unwrap();
        table.remove(3).unwrap();
        assert_eq!(table.insert(Descriptor::Socket(SocketId(2)), false), Ok(3));
        assert!(table.is_cloexec(4));
        assert_eq!(table.sockets().count(), 2);
    }

    #[test]
    fn bad_descriptors() {
        let mut table = DescriptorTable::with_stdio();
        assert_eq!(table.get(17), Err(Errno::EBADF));
        assert_eq!(table.remove(-1), Err(Errno::EBADF));
        assert_eq!(table.socket(1), Err(Errno::ENOTSOCK));
    }

    #[test]
    fn table_full_is_emfile() {
        let mut table = DescriptorTable::default();
        for _ in 0..MAX_DESCRIPTORS {
            table.insert(Descriptor::Stdin, false).unwrap();
        }
        assert_eq!(table.insert(Descriptor::Stdin, false), Err(Errno::EMFILE));
        assert_eq!(table.drain().len(), MAX_DESCRIPTORS as usize);
        assert!(table.is_empty());
    }
}
