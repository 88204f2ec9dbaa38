//! Emulated physical memory for hosted tests.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::{AllocError, KernelHeap, PhysicalAddress, PhysicalMemory};

/// Physical address at which emulated RAM starts.
///
/// Starting above zero keeps the null address out of every allocation.
pub const EMULATED_BASE: u32 = 0x0010_0000;

/// Emulated memory for software simulation.
///
/// A byte buffer standing in for RAM, with a first-fit allocator on top. Frees are
/// checked: returning an address that is not the start of a live block panics, so
/// tests catch double frees and stray pointers. Allocation failures can be
/// injected to exercise unwinding paths.
pub struct EmulatedMemory {
    memory: Vec<u8>,
    /// Live blocks as offset -> size.
    blocks: BTreeMap<usize, usize>,
    /// Remaining allocations before failures are injected.
    fail_after: Option<usize>,
    total_allocations: usize,
}

impl EmulatedMemory {
    /// Creates a new emulated memory region of the specified size.
    pub fn new(size: usize) -> Self {
        Self {
            memory: alloc::vec![0u8; size],
            blocks: BTreeMap::new(),
            fail_after: None,
            total_allocations: 0,
        }
    }

    /// Returns the size of the emulated memory region.
    pub fn size(&self) -> usize {
        self.memory.len()
    }

    /// Number of blocks currently allocated.
    pub fn live_allocations(&self) -> usize {
        self.blocks.len()
    }

    /// Number of bytes currently allocated.
    pub fn allocated_bytes(&self) -> usize {
        self.blocks.values().sum()
    }

    /// Number of successful allocations since creation.
    pub fn total_allocations(&self) -> usize {
        self.total_allocations
    }

    /// Returns true if `addr` is the start of a live block.
    pub fn is_allocated(&self, addr: PhysicalAddress) -> bool {
        self.offset_of(addr)
            .is_some_and(|offset| self.blocks.contains_key(&offset))
    }

    /// Lets `count` more allocations succeed, then fails every later one.
    pub fn fail_allocations_after(&mut self, count: usize) {
        self.fail_after = Some(count);
    }

    /// Stops injecting allocation failures.
    pub fn allow_allocations(&mut self) {
        self.fail_after = None;
    }

    fn offset_of(&self, addr: PhysicalAddress) -> Option<usize> {
        addr.as_usize().checked_sub(EMULATED_BASE as usize)
    }

    fn range(&self, addr: PhysicalAddress, len: usize) -> core::ops::Range<usize> {
        let start = self
            .offset_of(addr)
            .unwrap_or_else(|| panic!("physical address {addr} below emulated memory"));
        let end = start + len;
        assert!(
            end <= self.memory.len(),
            "physical access {addr}+{len:#x} out of bounds"
        );
        start..end
    }

    /// Finds the first gap that fits `size` bytes at `align`.
    fn first_fit(&self, size: usize, align: usize) -> Option<usize> {
        let base = EMULATED_BASE as usize;
        let mut cursor = 0usize;

        for (&start, &len) in &self.blocks {
            let aligned = (base + cursor).next_multiple_of(align) - base;
            if aligned + size <= start {
                return Some(aligned);
            }
            cursor = cursor.max(start + len);
        }

        let aligned = (base + cursor).next_multiple_of(align) - base;
        (aligned + size <= self.memory.len()).then_some(aligned)
    }
}

impl PhysicalMemory for EmulatedMemory {
    fn read(&self, addr: PhysicalAddress, buf: &mut [u8]) {
        let range = self.range(addr, buf.len());
        buf.copy_from_slice(&self.memory[range]);
    }

    fn write(&mut self, addr: PhysicalAddress, data: &[u8]) {
        let range = self.range(addr, data.len());
        self.memory[range].copy_from_slice(data);
    }

    fn fill(&mut self, addr: PhysicalAddress, len: usize, value: u8) {
        let range = self.range(addr, len);
        self.memory[range].fill(value);
    }
}

impl KernelHeap for EmulatedMemory {
    fn alloc(&mut self, size: usize, align: usize) -> Result<PhysicalAddress, AllocError> {
        assert!(align.is_power_of_two(), "alignment must be a power of two");

        if let Some(remaining) = self.fail_after.as_mut() {
            if *remaining == 0 {
                return Err(AllocError);
            }
            *remaining -= 1;
        }

        // Zero-sized requests still get a distinct address.
        let size = size.max(1);
        let offset = self.first_fit(size, align).ok_or(AllocError)?;
        self.blocks.insert(offset, size);
        self.total_allocations += 1;

        PhysicalAddress::try_from_usize(EMULATED_BASE as usize + offset).ok_or(AllocError)
    }

    fn free(&mut self, addr: PhysicalAddress) {
        let removed = self
            .offset_of(addr)
            .and_then(|offset| self.blocks.remove(&offset));
        assert!(removed.is_some(), "free of unallocated address {addr}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PAGE_SIZE;

    #[test]
    fn allocations_are_aligned_and_distinct() {
        let mut mem = EmulatedMemory::new(64 * 1024);
        let a = mem.alloc(100, 16).unwrap();
        let b = mem.alloc(PAGE_SIZE, PAGE_SIZE).unwrap();
        assert!(a.is_aligned(16));
        assert!(b.is_aligned(PAGE_SIZE));
        assert_ne!(a, b);
        assert!(!a.is_null());
        assert_eq!(mem.live_allocations(), 2);
    }

    #[test]
    fn freed_space_is_reused() {
        let mut mem = EmulatedMemory::new(4 * PAGE_SIZE);
        let a = mem.alloc(PAGE_SIZE, PAGE_SIZE).unwrap();
        let _b = mem.alloc(PAGE_SIZE, PAGE_SIZE).unwrap();
        mem.free(a);
        let c = mem.alloc(PAGE_SIZE, PAGE_SIZE).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn exhaustion_reports_error() {
        let mut mem = EmulatedMemory::new(2 * PAGE_SIZE);
        mem.alloc(PAGE_SIZE, PAGE_SIZE).unwrap();
        mem.alloc(PAGE_SIZE, PAGE_SIZE).unwrap();
        assert_eq!(mem.alloc(1, 1), Err(AllocError));
    }

    #[test]
    fn injected_failures() {
        let mut mem = EmulatedMemory::new(64 * 1024);
        mem.fail_allocations_after(1);
        assert!(mem.alloc(16, 16).is_ok());
        assert_eq!(mem.alloc(16, 16), Err(AllocError));
        mem.allow_allocations();
        assert!(mem.alloc(16, 16).is_ok());
    }

    #[test]
    fn alloc_zeroed_clears_reused_memory() {
        let mut mem = EmulatedMemory::new(PAGE_SIZE);
        let a = mem.alloc(64, 16).unwrap();
        mem.fill(a, 64, 0xAA);
        mem.free(a);
        let b = mem.alloc_zeroed(64, 16).unwrap();
        let mut buf = [0xFFu8; 64];
        mem.read(b, &mut buf);
        assert!(buf.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn word_access_is_little_endian() {
        let mut mem = EmulatedMemory::new(PAGE_SIZE);
        let a = mem.alloc(8, 4).unwrap();
        mem.write_u32(a, 0x1122_3344);
        let mut bytes = [0u8; 4];
        mem.read(a, &mut bytes);
        assert_eq!(bytes, [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(mem.read_u32(a), 0x1122_3344);
    }

    #[test]
    #[should_panic(expected = "free of unallocated address")]
    fn double_free_panics() {
        let mut mem = EmulatedMemory::new(PAGE_SIZE);
        let a = mem.alloc(16, 16).unwrap();
        mem.free(a);
        mem.free(a);
    }
}
