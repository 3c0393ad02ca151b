//! Guest address space.
//!
//! A [`MemoryView`] is the only way handlers touch guest memory.  Every
//! access is checked against the mapped regions; anything outside them is a
//! [`MemoryError`], which the dispatcher reports to the guest as `EFAULT`.
//!
//! # Layout
//!
//! ```text
//! 0x0000_1000_0000  heap     fixed-size arena handed out by `alloc`
//! 0x0000_2000_0000  brk      grows up via brk(2), capped at BRK_LIMIT
//! 0x0000_7f00_0000_0000  mmap   anonymous mappings, bump-allocated upward
//! ```

use hostsim_abi::{mman, Errno};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub const HEAP_BASE: u64 = 0x1000_0000;
pub const HEAP_SIZE: u64 = 1 << 20;
pub const BRK_BASE: u64 = 0x2000_0000;
pub const BRK_LIMIT: u64 = 64 << 20;
pub const MMAP_BASE: u64 = 0x7f00_0000_0000;

/// Upper bound on the total bytes mapped by one process.
pub const MAX_MAPPED_BYTES: u64 = 256 << 20;

/// A guest virtual address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GuestPtr(u64);

impl GuestPtr {
    pub const NULL: GuestPtr = GuestPtr(0);

    pub const fn new(addr: u64) -> Self {
        GuestPtr(addr)
    }

    pub const fn addr(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn add(self, offset: u64) -> Self {
        GuestPtr(self.0.wrapping_add(offset))
    }
}

impl fmt::Display for GuestPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("bad address {addr:#x} (+{len})")]
    Fault { addr: u64, len: u64 },

    #[error("out of guest memory")]
    OutOfMemory,

    #[error("no mapping of exactly {len} bytes at {addr:#x}")]
    NotMapped { addr: u64, len: u64 },
}

impl From<MemoryError> for Errno {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::Fault { .. } => Errno::EFAULT,
            MemoryError::OutOfMemory => Errno::ENOMEM,
            MemoryError::NotMapped { .. } => Errno::EINVAL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RegionKind {
    Heap,
    Brk,
    Mmap,
}

#[derive(Clone, Debug)]
struct Region {
    kind: RegionKind,
    data: Vec<u8>,
}

impl Region {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

/// One process's address space.
///
/// `Clone` produces an independent copy, which is what `fork` needs.
#[derive(Clone, Debug)]
pub struct MemoryView {
    regions: BTreeMap<u64, Region>,
    brk: u64,
    mmap_next: u64,
    alloc_next: u64,
    mapped_bytes: u64,
}

impl Default for MemoryView {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryView {
    /// A fresh address space with the heap arena mapped and an empty brk.
    pub fn new() -> Self {
        let mut regions = BTreeMap::new();
        regions.insert(
            HEAP_BASE,
            Region {
                kind: RegionKind::Heap,
                data: vec![0; HEAP_SIZE as usize],
            },
        );
        Self {
            regions,
            brk: BRK_BASE,
            mmap_next: MMAP_BASE,
            alloc_next: HEAP_BASE,
            mapped_bytes: HEAP_SIZE,
        }
    }

    /// Region containing `[addr, addr + len)`, as (start, region).
    fn region(&self, addr: u64, len: u64) -> Result<(u64, &Region), MemoryError> {
        let fault = MemoryError::Fault { addr, len };
        let end = addr.checked_add(len).ok_or(fault.clone())?;
        let (&start, region) = self.regions.range(..=addr).next_back().ok_or(fault.clone())?;
        if end > start + region.len() {
            return Err(fault);
        }
        Ok((start, region))
    }

    fn region_mut(&mut self, addr: u64, len: u64) -> Result<(u64, &mut Region), MemoryError> {
        let fault = MemoryError::Fault { addr, len };
        let end = addr.checked_add(len).ok_or(fault.clone())?;
        let (&start, region) = self
            .regions
            .range_mut(..=addr)
            .next_back()
            .ok_or(fault.clone())?;
        if end > start + region.len() {
            return Err(fault);
        }
        Ok((start, region))
    }

    /// Check that `[ptr, ptr + len)` is mapped, without touching it.
    pub fn check(&self, ptr: GuestPtr, len: usize) -> Result<(), MemoryError> {
        self.region(ptr.addr(), len as u64).map(|_| ())
    }

    pub fn read_into(&self, ptr: GuestPtr, buf: &mut [u8]) -> Result<(), MemoryError> {
        let (start, region) = self.region(ptr.addr(), buf.len() as u64)?;
        let off = (ptr.addr() - start) as usize;
        buf.copy_from_slice(&region.data[off..off + buf.len()]);
        Ok(())
    }

    /// Copy `len` bytes out of guest memory.  The range is checked before
    /// anything is allocated, so a guest-supplied length cannot exhaust the
    /// simulator's own memory.
    pub fn read(&self, ptr: GuestPtr, len: usize) -> Result<Vec<u8>, MemoryError> {
        let (start, region) = self.region(ptr.addr(), len as u64)?;
        let off = (ptr.addr() - start) as usize;
        Ok(region.data[off..off + len].to_vec())
    }

    pub fn write(&mut self, ptr: GuestPtr, bytes: &[u8]) -> Result<(), MemoryError> {
        let (start, region) = self.region_mut(ptr.addr(), bytes.len() as u64)?;
        let off = (ptr.addr() - start) as usize;
        region.data[off..off + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_u32(&self, ptr: GuestPtr) -> Result<u32, MemoryError> {
        let mut buf = [0u8; 4];
        self.read_into(ptr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_u32(&mut self, ptr: GuestPtr, value: u32) -> Result<(), MemoryError> {
        self.write(ptr, &value.to_le_bytes())
    }

    pub fn read_u64(&self, ptr: GuestPtr) -> Result<u64, MemoryError> {
        let mut buf = [0u8; 8];
        self.read_into(ptr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn write_u64(&mut self, ptr: GuestPtr, value: u64) -> Result<(), MemoryError> {
        self.write(ptr, &value.to_le_bytes())
    }

    pub fn write_i32(&mut self, ptr: GuestPtr, value: i32) -> Result<(), MemoryError> {
        self.write(ptr, &value.to_le_bytes())
    }

    /// Bump-allocate `len` bytes (8-byte aligned) from the heap arena.
    ///
    /// This is the guest's own allocator, not a syscall; built-in programs
    /// use it for their buffers.
    pub fn alloc(&mut self, len: usize) -> Result<GuestPtr, MemoryError> {
        let aligned = (self.alloc_next + 7) & !7;
        let end = aligned
            .checked_add(len as u64)
            .ok_or(MemoryError::OutOfMemory)?;
        if end > HEAP_BASE + HEAP_SIZE {
            return Err(MemoryError::OutOfMemory);
        }
        self.alloc_next = end;
        Ok(GuestPtr(aligned))
    }

    /// Allocate and fill a buffer.
    pub fn alloc_bytes(&mut self, bytes: &[u8]) -> Result<GuestPtr, MemoryError> {
        let ptr = self.alloc(bytes.len())?;
        self.write(ptr, bytes)?;
        Ok(ptr)
    }

    /// Current program break.
    pub fn brk(&self) -> u64 {
        self.brk
    }

    /// Move the program break.  Returns the new break, or the old one if the
    /// request is out of range (Linux semantics: brk never fails loudly).
    pub fn set_brk(&mut self, requested: u64) -> u64 {
        if requested < BRK_BASE || requested > BRK_BASE + BRK_LIMIT {
            return self.brk;
        }
        let new_len = requested - BRK_BASE;
        let old_len = self.brk - BRK_BASE;
        let Some(mapped) = (self.mapped_bytes - old_len).checked_add(new_len) else {
            return self.brk;
        };
        if new_len > old_len && mapped > MAX_MAPPED_BYTES {
            return self.brk;
        }
        self.mapped_bytes = mapped;
        if new_len == 0 {
            self.regions.remove(&BRK_BASE);
        } else {
            let region = self.regions.entry(BRK_BASE).or_insert_with(|| Region {
                kind: RegionKind::Brk,
                data: Vec::new(),
            });
            region.data.resize(new_len as usize, 0);
        }
        self.brk = requested;
        self.brk
    }

    /// Map `len` zeroed bytes (rounded up to a page) and return the address.
    pub fn map_anonymous(&mut self, len: u64) -> Result<GuestPtr, MemoryError> {
        let len = page_round_up(len).ok_or(MemoryError::OutOfMemory)?;
        let mapped = self
            .mapped_bytes
            .checked_add(len)
            .ok_or(MemoryError::OutOfMemory)?;
        if len == 0 || mapped > MAX_MAPPED_BYTES {
            return Err(MemoryError::OutOfMemory);
        }
        let addr = self.mmap_next;
        self.regions.insert(
            addr,
            Region {
                kind: RegionKind::Mmap,
                data: vec![0; len as usize],
            },
        );
        // One guard page between mappings.
        self.mmap_next = addr + len + mman::PAGE_SIZE;
        self.mapped_bytes = mapped;
        Ok(GuestPtr(addr))
    }

    /// Remove a mapping created by [`map_anonymous`](Self::map_anonymous).
    ///
    /// Only whole mappings can be removed; partial unmaps are rejected.
    pub fn unmap(&mut self, ptr: GuestPtr, len: u64) -> Result<(), MemoryError> {
        let not_mapped = MemoryError::NotMapped {
            addr: ptr.addr(),
            len,
        };
        let len = page_round_up(len).ok_or(not_mapped.clone())?;
        match self.regions.get(&ptr.addr()) {
            Some(region) if region.kind == RegionKind::Mmap && region.len() == len => {
                self.regions.remove(&ptr.addr());
                self.mapped_bytes -= len;
                Ok(())
            }
            _ => Err(not_mapped),
        }
    }

    /// Total bytes currently mapped.
    pub fn mapped_bytes(&self) -> u64 {
        self.mapped_bytes
    }
}

fn page_round_up(len: u64) -> Option<u64> {
    let mask = mman::PAGE_SIZE - 1;
    len.checked_add(mask).map(|v| v & !mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_write_read_roundtrip() {
        let mut mem = MemoryView::new();
        let p = mem.alloc_bytes(b"hello").unwrap();
        assert_eq!(mem.read(p, 5).unwrap(), b"hello");
        let q = mem.alloc(4).unwrap();
        assert_eq!(q.addr() % 8, 0);
        assert!(q.addr() >= p.addr() + 5);
    }

    #[test]
    fn access_outside_regions_faults() {
        let mut mem = MemoryView::new();
        assert_eq!(
            mem.read_u32(GuestPtr::new(0x10)),
            Err(MemoryError::Fault { addr: 0x10, len: 4 })
        );
        assert!(mem.write(GuestPtr::NULL, &[1]).is_err());
        // Straddling the end of the heap.
        let end = GuestPtr::new(HEAP_BASE + HEAP_SIZE - 2);
        assert!(mem.read_u32(end).is_err());
        assert_eq!(Errno::from(mem.read_u64(GuestPtr::new(u64::MAX - 2)).unwrap_err()), Errno::EFAULT);
    }

    #[test]
    fn brk_grows_and_shrinks() {
        let mut mem = MemoryView::new();
        assert_eq!(mem.brk(), BRK_BASE);
        assert_eq!(mem.set_brk(0), BRK_BASE);
        assert_eq!(mem.set_brk(BRK_BASE + 8192), BRK_BASE + 8192);
        mem.write_u64(GuestPtr::new(BRK_BASE + 8000), 7).unwrap();
        assert_eq!(mem.set_brk(BRK_BASE), BRK_BASE);
        assert!(mem.read_u64(GuestPtr::new(BRK_BASE)).is_err());
        // Beyond the limit the old break is returned.
        assert_eq!(mem.set_brk(BRK_BASE + BRK_LIMIT + 1), BRK_BASE);
    }

    #[test]
    fn mmap_is_zeroed_and_page_rounded() {
        let mut mem = MemoryView::new();
        let p = mem.map_anonymous(10).unwrap();
        assert_eq!(p.addr() % mman::PAGE_SIZE, 0);
        assert_eq!(mem.read(p, 4096).unwrap(), vec![0; 4096]);
        assert!(mem.read(p.add(4096), 1).is_err());
    }

    #[test]
    fn munmap_requires_exact_region() {
        let mut mem = MemoryView::new();
        let p = mem.map_anonymous(8192).unwrap();
        assert!(mem.unmap(p, 4096).is_err());
        assert!(mem.unmap(p.add(4096), 4096).is_err());
        mem.unmap(p, 8192).unwrap();
        assert!(mem.read_u32(p).is_err());
    }

    #[test]
    fn mapping_cap_returns_out_of_memory() {
        let mut mem = MemoryView::new();
        assert_eq!(
            mem.map_anonymous(MAX_MAPPED_BYTES),
            Err(MemoryError::OutOfMemory)
        );
    }

    #[test]
    fn huge_lengths_fault_without_allocating() {
        let mut mem = MemoryView::new();
        let p = mem.alloc_bytes(b"abc").unwrap();
        assert_eq!(
            mem.read(p, usize::MAX),
            Err(MemoryError::Fault {
                addr: p.addr(),
                len: u64::MAX
            })
        );
        assert!(mem.read(p, 1 << 40).is_err());
        assert!(mem.check(p, 1 << 40).is_err());
    }

    #[test]
    fn huge_mappings_are_out_of_memory() {
        let mut mem = MemoryView::new();
        assert_eq!(
            mem.map_anonymous(0xFFFF_FFFF_FFFF_F000),
            Err(MemoryError::OutOfMemory)
        );
        assert_eq!(mem.map_anonymous(u64::MAX), Err(MemoryError::OutOfMemory));
        // Nothing leaked into the accounting.
        assert!(mem.map_anonymous(4096).is_ok());
    }

    #[test]
    fn clone_is_independent() {
        let mut parent = MemoryView::new();
        let p = parent.alloc_bytes(&[1, 2, 3, 4]).unwrap();
        let mut child = parent.clone();
        child.write(p, &[9]).unwrap();
        assert_eq!(parent.read(p, 1).unwrap(), vec![1]);
        assert_eq!(child.read(p, 1).unwrap(), vec![9]);
    }
}
