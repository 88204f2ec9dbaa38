//! Access to physical memory and the kernel heap that hands it out.
//!
//! Page tables, kernel stacks, user stacks and loaded images are all carved from
//! one heap. The paging code never dereferences raw pointers itself; it reads and
//! writes physical memory through [`PhysicalMemory`], which the kernel implements
//! on top of its direct map and the tests implement with
//! [`EmulatedMemory`](crate::EmulatedMemory).

use crate::PhysicalAddress;

/// The heap could not satisfy an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("kernel heap exhausted")]
pub struct AllocError;

/// Byte-level access to physical memory.
pub trait PhysicalMemory {
    /// Copies `buf.len()` bytes starting at `addr` into `buf`.
    fn read(&self, addr: PhysicalAddress, buf: &mut [u8]);

    /// Copies `data` into physical memory starting at `addr`.
    fn write(&mut self, addr: PhysicalAddress, data: &[u8]);

    /// Sets `len` bytes starting at `addr` to `value`.
    fn fill(&mut self, addr: PhysicalAddress, len: usize, value: u8);

    fn read_u32(&self, addr: PhysicalAddress) -> u32 {
        let mut bytes = [0u8; 4];
        self.read(addr, &mut bytes);
        u32::from_le_bytes(bytes)
    }

    fn write_u32(&mut self, addr: PhysicalAddress, value: u32) {
        self.write(addr, &value.to_le_bytes());
    }
}

/// The kernel's general-purpose allocator, in physical terms.
pub trait KernelHeap: PhysicalMemory {
    /// Allocates `size` bytes aligned to `align`, which must be a power of two.
    fn alloc(&mut self, size: usize, align: usize) -> Result<PhysicalAddress, AllocError>;

    /// Returns a block previously obtained from [`alloc`](Self::alloc).
    fn free(&mut self, addr: PhysicalAddress);

    /// Allocates a block and clears it.
    fn alloc_zeroed(&mut self, size: usize, align: usize) -> Result<PhysicalAddress, AllocError> {
        let addr = self.alloc(size, align)?;
        self.fill(addr, size, 0);
        Ok(addr)
    }
}
