//! Virtual memory regions.
//!
//! Every address space keeps a list of the ranges it has handed out (segments,
//! stacks, heaps). The list is what page faults are validated against and what
//! teardown walks to find memory to release.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use bitflags::bitflags;

use crate::{MemoryError, PAGE_SIZE, PageFlags, PhysicalAddress, VirtualAddress};

bitflags! {
    /// Access rights of a region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Protection: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

/// Whether a region's pages belong to this address space alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharing {
    /// Unmapped and released when the address space is cleaned.
    Private,
    /// Left mapped on clean; only released when the address space is destroyed.
    Shared,
}

/// A contiguous range of virtual memory inside one address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    start: VirtualAddress,
    /// Page-aligned, exclusive.
    end: VirtualAddress,
    size: usize,
    backing: Option<PhysicalAddress>,
    protection: Protection,
    sharing: Sharing,
    /// If false, `backing` is a reference and is never freed through this region.
    owns_backing: bool,
}

impl Region {
    /// Describes `size` bytes at `start`, with the end rounded up to a page boundary.
    pub fn new(
        start: VirtualAddress,
        backing: Option<PhysicalAddress>,
        size: usize,
        protection: Protection,
        sharing: Sharing,
        owns_backing: bool,
    ) -> Result<Self, MemoryError> {
        if size == 0 {
            return Err(MemoryError::EmptyRegion);
        }
        let end = start
            .checked_add(size)
            .and_then(|end| end.align_up(PAGE_SIZE))
            .ok_or(MemoryError::Overflow)?;

        Ok(Self {
            start,
            end,
            size,
            backing,
            protection,
            sharing,
            owns_backing: owns_backing && backing.is_some(),
        })
    }

    pub fn start(&self) -> VirtualAddress {
        self.start
    }

    pub fn end(&self) -> VirtualAddress {
        self.end
    }

    /// Size as requested, before rounding.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn backing(&self) -> Option<PhysicalAddress> {
        self.backing
    }

    pub fn protection(&self) -> Protection {
        self.protection
    }

    pub fn sharing(&self) -> Sharing {
        self.sharing
    }

    pub fn is_private(&self) -> bool {
        self.sharing == Sharing::Private
    }

    pub fn owns_backing(&self) -> bool {
        self.owns_backing
    }

    /// Returns true if `addr` lies in `[start, end)`.
    pub fn contains(&self, addr: VirtualAddress) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Returns true if the two ranges share at least one byte.
    pub fn overlaps(&self, other: &Region) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// First page covered by the region.
    pub fn first_page(&self) -> VirtualAddress {
        self.start.align_down(PAGE_SIZE)
    }

    /// Number of bytes from the first page to the end.
    pub fn mapped_span(&self) -> usize {
        self.end - self.first_page()
    }

    /// Leaf-entry flags for user mappings of this region.
    pub fn page_flags(&self) -> PageFlags {
        let mut flags = PageFlags::PRESENT | PageFlags::USER;
        if self.protection.contains(Protection::WRITE) {
            flags |= PageFlags::WRITABLE;
        }
        flags
    }
}

/// The regions of one address space.
///
/// New regions go to the front; lookups scan from the front and take the first hit.
#[derive(Debug, Default)]
pub struct RegionList {
    regions: VecDeque<Region>,
}

impl RegionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    /// Adds a region, refusing any overlap with an existing one.
    pub fn add(&mut self, region: Region) -> Result<(), MemoryError> {
        if self.regions.iter().any(|existing| existing.overlaps(&region)) {
            return Err(MemoryError::Overlap);
        }
        self.regions.push_front(region);
        Ok(())
    }

    /// Finds the region covering `addr`.
    pub fn lookup(&self, addr: VirtualAddress) -> Option<&Region> {
        self.regions.iter().find(|region| region.contains(addr))
    }

    /// Removes the region starting exactly at `start` with exactly `size` bytes.
    pub fn remove(&mut self, start: VirtualAddress, size: usize) -> Option<Region> {
        let index = self
            .regions
            .iter()
            .position(|region| region.start == start && region.size == size)?;
        self.regions.remove(index)
    }

    /// Removes and returns every private region.
    pub fn take_private(&mut self) -> Vec<Region> {
        let (private, shared): (Vec<_>, Vec<_>) = core::mem::take(&mut self.regions)
            .into_iter()
            .partition(Region::is_private);
        self.regions = shared.into();
        private
    }

    /// Removes and returns every region.
    pub fn take_all(&mut self) -> Vec<Region> {
        core::mem::take(&mut self.regions).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn region(start: u32, size: usize) -> Region {
        Region::new(
            VirtualAddress::new(start),
            None,
            size,
            Protection::READ,
            Sharing::Private,
            false,
        )
        .unwrap()
    }

    #[test]
    fn end_is_page_aligned() {
        let r = region(0x0804_8010, 0x1000);
        assert_eq!(r.end(), VirtualAddress::new(0x0804_A000));
        assert_eq!(r.size(), 0x1000);
        assert_eq!(r.first_page(), VirtualAddress::new(0x0804_8000));
        assert_eq!(r.mapped_span(), 0x2000);
    }

    #[test]
    fn empty_region_rejected() {
        let err = Region::new(
            VirtualAddress::new(0x1000),
            None,
            0,
            Protection::READ,
            Sharing::Private,
            false,
        );
        assert_eq!(err, Err(MemoryError::EmptyRegion));
    }

    #[test]
    fn ownership_requires_backing() {
        let r = Region::new(
            VirtualAddress::new(0x1000),
            None,
            0x1000,
            Protection::READ,
            Sharing::Private,
            true,
        )
        .unwrap();
        assert!(!r.owns_backing());
    }

    #[test]
    fn page_flags_follow_protection() {
        let mut r = region(0x1000, 0x1000);
        assert!(!r.page_flags().contains(PageFlags::WRITABLE));
        r.protection |= Protection::WRITE;
        assert!(r.page_flags().contains(PageFlags::WRITABLE | PageFlags::USER));
    }

    #[test]
    fn overlapping_add_rejected() {
        let mut list = RegionList::new();
        list.add(region(0x1000, 0x2000)).unwrap();
        assert_eq!(list.add(region(0x2000, 0x1000)), Err(MemoryError::Overlap));
        // Touching at the end boundary is fine.
        list.add(region(0x3000, 0x1000)).unwrap();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn lookup_returns_covering_region() {
        let mut list = RegionList::new();
        list.add(region(0x1000, 0x1000)).unwrap();
        list.add(region(0x8000, 0x2000)).unwrap();

        let found = list.lookup(VirtualAddress::new(0x9ABC)).unwrap();
        assert_eq!(found.start(), VirtualAddress::new(0x8000));
        assert!(list.lookup(VirtualAddress::new(0x2000)).is_none());
    }

    #[test]
    fn newest_region_first() {
        let mut list = RegionList::new();
        list.add(region(0x1000, 0x1000)).unwrap();
        list.add(region(0x8000, 0x1000)).unwrap();
        let starts: Vec<_> = list.iter().map(Region::start).collect();
        assert_eq!(
            starts,
            [VirtualAddress::new(0x8000), VirtualAddress::new(0x1000)]
        );
    }

    #[test]
    fn remove_requires_exact_match() {
        let mut list = RegionList::new();
        list.add(region(0x1000, 0x1800)).unwrap();
        assert!(list.remove(VirtualAddress::new(0x1000), 0x2000).is_none());
        assert!(list.remove(VirtualAddress::new(0x1000), 0x1800).is_some());
        assert!(list.is_empty());
    }

    #[test]
    fn take_private_keeps_shared() {
        let mut list = RegionList::new();
        list.add(region(0x1000, 0x1000)).unwrap();
        let shared = Region::new(
            VirtualAddress::new(0x4000),
            None,
            0x1000,
            Protection::READ,
            Sharing::Shared,
            false,
        )
        .unwrap();
        list.add(shared).unwrap();

        let private = list.take_private();
        assert_eq!(private.len(), 1);
        assert_eq!(list.len(), 1);
        assert!(!list.iter().next().unwrap().is_private());
    }

    proptest! {
        #[test]
        fn regions_never_overlap(
            ranges in proptest::collection::vec((0u32..0x1000, 1usize..0x8000), 1..32),
        ) {
            let mut list = RegionList::new();
            for (page, size) in ranges {
                let _ = list.add(region(page * PAGE_SIZE as u32, size));
            }

            let regions: Vec<_> = list.iter().collect();
            for (i, a) in regions.iter().enumerate() {
                for b in &regions[i + 1..] {
                    prop_assert!(!a.overlaps(b));
                }
            }
        }
    }
}
