//! Two-level i386 page directories.
//!
//! A [`PageDirectory`] owns one directory frame and the page tables hanging off
//! it. Slot [`SELF_MAP_INDEX`] always points back at the directory frame, so once
//! the directory is active every table is visible at [`SELF_MAP_TABLES`] and the
//! directory itself at [`SELF_MAP_DIRECTORY`]. Tables in the kernel half can be
//! borrowed from the kernel directory; those carry [`PageFlags::SHARED`] and are
//! never written through or freed by the borrowing directory.
//!
//! [`SELF_MAP_TABLES`]: crate::SELF_MAP_TABLES
//! [`SELF_MAP_DIRECTORY`]: crate::SELF_MAP_DIRECTORY

use crate::{
    KernelHeap, MemoryError, PageEntry, PageFlags, PhysicalAddress, PhysicalMemory,
    VirtualAddress,
    arch::{self, ENTRIES_PER_TABLE, KERNEL_DIRECTORY_INDEX, PAGE_SIZE, SELF_MAP_INDEX},
};

const ENTRY_SIZE: usize = core::mem::size_of::<u32>();

fn read_entry<M: PhysicalMemory + ?Sized>(
    mem: &M,
    table: PhysicalAddress,
    index: usize,
) -> PageEntry {
    PageEntry::from_raw(mem.read_u32(table + index * ENTRY_SIZE))
}

fn write_entry<M: PhysicalMemory + ?Sized>(
    mem: &mut M,
    table: PhysicalAddress,
    index: usize,
    entry: PageEntry,
) {
    mem.write_u32(table + index * ENTRY_SIZE, entry.raw());
}

fn page_count(size: usize) -> usize {
    size.div_ceil(PAGE_SIZE)
}

/// A hardware page directory and the tables it owns.
///
/// A directory is not freed when dropped; it must be handed back to the heap with
/// [`destroy`](Self::destroy).
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct PageDirectory {
    root: PhysicalAddress,
    /// Present directory slots, counting the self-map and shared tables.
    table_count: usize,
}

impl PageDirectory {
    /// Allocates an empty directory and installs the self-map.
    pub fn new<H: KernelHeap + ?Sized>(heap: &mut H) -> Result<Self, MemoryError> {
        let root = heap.alloc_zeroed(PAGE_SIZE, PAGE_SIZE)?;
        if !root.is_aligned(PAGE_SIZE) {
            heap.free(root);
            return Err(MemoryError::BadAlignment);
        }

        write_entry(
            heap,
            root,
            SELF_MAP_INDEX,
            PageEntry::new(root, PageFlags::PRESENT | PageFlags::WRITABLE),
        );

        log::trace!("created page directory at {root}");
        Ok(Self {
            root,
            table_count: 1,
        })
    }

    /// Physical address of the directory frame.
    pub fn root(&self) -> PhysicalAddress {
        self.root
    }

    /// Number of present directory slots, including the self-map.
    pub fn table_count(&self) -> usize {
        self.table_count
    }

    /// Reads directory slot `index`.
    pub fn entry<M: PhysicalMemory + ?Sized>(&self, mem: &M, index: usize) -> PageEntry {
        assert!(index < ENTRIES_PER_TABLE, "directory index out of range");
        read_entry(mem, self.root, index)
    }

    /// Checks the structural invariants a directory must hold before it is loaded.
    pub fn validate(&self) -> Result<(), MemoryError> {
        if !self.root.is_aligned(PAGE_SIZE) {
            return Err(MemoryError::BadAlignment);
        }
        if self.table_count == 0 || self.table_count > ENTRIES_PER_TABLE {
            return Err(MemoryError::CorruptDirectory);
        }
        Ok(())
    }

    /// Returns true if the self-map slot is present and points at this directory.
    pub fn is_self_mapped<M: PhysicalMemory + ?Sized>(&self, mem: &M) -> bool {
        self.entry(mem, SELF_MAP_INDEX).address() == Some(self.root)
    }

    /// Looks up the table covering `virt`, rejecting the self-map window and shared tables.
    fn owned_table<M: PhysicalMemory + ?Sized>(
        &self,
        mem: &M,
        virt: VirtualAddress,
    ) -> Result<Option<PhysicalAddress>, MemoryError> {
        let index = virt.directory_index();
        if index == SELF_MAP_INDEX {
            return Err(MemoryError::Reserved);
        }

        let entry = self.entry(mem, index);
        if entry.is_shared() {
            return Err(MemoryError::SharedTable);
        }
        Ok(entry.address())
    }

    /// Maps one page, allocating its page table if needed.
    pub fn map<H: KernelHeap + ?Sized>(
        &mut self,
        heap: &mut H,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), MemoryError> {
        if !virt.is_aligned(PAGE_SIZE) || !phys.is_aligned(PAGE_SIZE) {
            return Err(MemoryError::BadAlignment);
        }

        let table = match self.owned_table(&*heap, virt)? {
            Some(table) => table,
            None => {
                let table = heap.alloc_zeroed(PAGE_SIZE, PAGE_SIZE)?;
                // Leaf entries carry the real restrictions.
                let mut table_flags = PageFlags::PRESENT | PageFlags::WRITABLE;
                if !virt.is_kernel() {
                    table_flags |= PageFlags::USER;
                }
                write_entry(
                    heap,
                    self.root,
                    virt.directory_index(),
                    PageEntry::new(table, table_flags),
                );
                self.table_count += 1;
                table
            }
        };

        let index = virt.table_index();
        if read_entry(&*heap, table, index).is_present() {
            return Err(MemoryError::AlreadyMapped);
        }
        write_entry(heap, table, index, PageEntry::new(phys, flags | PageFlags::PRESENT));
        Ok(())
    }

    /// Maps `size` bytes (rounded up to whole pages) of contiguous physical memory.
    ///
    /// If any page fails, the pages mapped by this call are unmapped again.
    pub fn map_range<H: KernelHeap + ?Sized>(
        &mut self,
        heap: &mut H,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        size: usize,
        flags: PageFlags,
    ) -> Result<(), MemoryError> {
        let pages = page_count(size);
        let last = (pages * PAGE_SIZE).saturating_sub(1);
        if virt.checked_add(last).is_none() || phys.checked_add(last).is_none() {
            return Err(MemoryError::Overflow);
        }

        for page in 0..pages {
            let offset = page * PAGE_SIZE;
            if let Err(error) = self.map(heap, virt + offset, phys + offset, flags) {
                for undo in 0..page {
                    let undone = self.unmap(heap, virt + undo * PAGE_SIZE);
                    assert_eq!(
                        undone,
                        Ok(phys + undo * PAGE_SIZE),
                        "rolling back a partial mapping at {virt}"
                    );
                }
                return Err(error);
            }
        }
        Ok(())
    }

    /// Unmaps one page and returns the frame it pointed to.
    ///
    /// The page table is freed once its last entry is cleared.
    pub fn unmap<H: KernelHeap + ?Sized>(
        &mut self,
        heap: &mut H,
        virt: VirtualAddress,
    ) -> Result<PhysicalAddress, MemoryError> {
        if !virt.is_aligned(PAGE_SIZE) {
            return Err(MemoryError::BadAlignment);
        }

        let table = self.owned_table(&*heap, virt)?.ok_or(MemoryError::NotMapped)?;
        let index = virt.table_index();
        let phys = read_entry(&*heap, table, index)
            .address()
            .ok_or(MemoryError::NotMapped)?;

        write_entry(heap, table, index, PageEntry::EMPTY);
        arch::flush(virt);

        let empty = (0..ENTRIES_PER_TABLE).all(|i| !read_entry(&*heap, table, i).is_present());
        if empty {
            write_entry(heap, self.root, virt.directory_index(), PageEntry::EMPTY);
            heap.free(table);
            self.table_count -= 1;
        }

        Ok(phys)
    }

    /// Unmaps every mapped page in `size` bytes starting at `virt`, skipping holes.
    ///
    /// Returns the number of pages that were unmapped.
    pub fn unmap_range<H: KernelHeap + ?Sized>(
        &mut self,
        heap: &mut H,
        virt: VirtualAddress,
        size: usize,
    ) -> Result<usize, MemoryError> {
        let mut unmapped = 0;
        for page in 0..page_count(size) {
            let Some(addr) = virt.checked_add(page * PAGE_SIZE) else {
                return Err(MemoryError::Overflow);
            };
            match self.unmap(heap, addr) {
                Ok(_) => unmapped += 1,
                Err(MemoryError::NotMapped) => {}
                Err(error) => return Err(error),
            }
        }
        Ok(unmapped)
    }

    /// Translates a virtual address, keeping its offset within the page.
    ///
    /// Returns `None` if the covering directory or table entry is absent.
    pub fn translate<M: PhysicalMemory + ?Sized>(
        &self,
        mem: &M,
        virt: VirtualAddress,
    ) -> Option<PhysicalAddress> {
        let table = self.entry(mem, virt.directory_index()).address()?;
        let frame = read_entry(mem, table, virt.table_index()).address()?;
        Some(frame + virt.page_offset())
    }

    /// Borrows every present kernel-half table from `kernel`.
    ///
    /// Borrowed slots are tagged [`PageFlags::SHARED`]. Slots this directory
    /// already populates are left alone. Returns the number of tables borrowed.
    pub fn share_kernel_tables<M: PhysicalMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        kernel: &PageDirectory,
    ) -> usize {
        let mut shared = 0;
        for index in KERNEL_DIRECTORY_INDEX..SELF_MAP_INDEX {
            let source = kernel.entry(mem, index);
            let Some(table) = source.address() else {
                continue;
            };
            if self.entry(mem, index).is_present() {
                continue;
            }

            let entry = PageEntry::new(table, source.flags() | PageFlags::SHARED);
            write_entry(mem, self.root, index, entry);
            self.table_count += 1;
            shared += 1;
        }
        shared
    }

    /// Frees the directory frame and every table it owns.
    ///
    /// Shared tables and the frames mapped by leaf entries are left untouched.
    pub fn destroy<H: KernelHeap + ?Sized>(self, heap: &mut H) {
        let mut freed = 0;
        for index in 0..SELF_MAP_INDEX {
            let entry = self.entry(&*heap, index);
            if entry.is_shared() {
                continue;
            }
            if let Some(table) = entry.address() {
                heap.free(table);
                freed += 1;
            }
        }
        heap.free(self.root);
        log::trace!("destroyed page directory at {} ({freed} tables)", self.root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EmulatedMemory, KERNEL_SPLIT, SELF_MAP_DIRECTORY, SELF_MAP_TABLES};
    use proptest::prelude::*;

    const RW_USER: PageFlags = PageFlags::WRITABLE.union(PageFlags::USER);

    fn setup() -> (EmulatedMemory, PageDirectory) {
        let mut mem = EmulatedMemory::new(1024 * 1024);
        let dir = PageDirectory::new(&mut mem).unwrap();
        (mem, dir)
    }

    fn frame(mem: &mut EmulatedMemory) -> PhysicalAddress {
        mem.alloc(PAGE_SIZE, PAGE_SIZE).unwrap()
    }

    #[test]
    fn new_directory_is_self_mapped() {
        let (mem, dir) = setup();
        assert!(dir.is_self_mapped(&mem));
        assert_eq!(dir.table_count(), 1);
        assert!(dir.root().is_aligned(PAGE_SIZE));
        assert!(dir.validate().is_ok());
    }

    #[test]
    fn self_map_window_translates_to_directory() {
        let (mem, dir) = setup();
        assert_eq!(
            dir.translate(&mem, VirtualAddress::new(SELF_MAP_DIRECTORY)),
            Some(dir.root())
        );
        assert_eq!(
            dir.translate(&mem, VirtualAddress::new(SELF_MAP_DIRECTORY + 0x10)),
            Some(dir.root() + 0x10)
        );
    }

    #[test]
    fn tables_visible_through_self_map() {
        let (mut mem, mut dir) = setup();
        let phys = frame(&mut mem);
        let virt = VirtualAddress::new(0x0040_0000);
        dir.map(&mut mem, virt, phys, RW_USER).unwrap();

        let table = dir.entry(&mem, virt.directory_index()).address().unwrap();
        let window = VirtualAddress::new(SELF_MAP_TABLES + (virt.directory_index() * PAGE_SIZE) as u32);
        assert_eq!(dir.translate(&mem, window), Some(table));
    }

    #[test]
    fn map_single_page() {
        let (mut mem, mut dir) = setup();
        let phys = frame(&mut mem);
        let virt = VirtualAddress::new(0x0804_8000);

        dir.map(&mut mem, virt, phys, RW_USER).unwrap();
        assert_eq!(dir.translate(&mem, virt), Some(phys));
        assert_eq!(dir.translate(&mem, virt + 0x123), Some(phys + 0x123));
        assert_eq!(dir.table_count(), 2);
    }

    #[test]
    fn map_rejects_unaligned() {
        let (mut mem, mut dir) = setup();
        let phys = frame(&mut mem);
        assert_eq!(
            dir.map(&mut mem, VirtualAddress::new(0x1001), phys, RW_USER),
            Err(MemoryError::BadAlignment)
        );
        assert_eq!(
            dir.map(&mut mem, VirtualAddress::new(0x1000), phys + 4, RW_USER),
            Err(MemoryError::BadAlignment)
        );
    }

    #[test]
    fn map_twice_fails() {
        let (mut mem, mut dir) = setup();
        let phys = frame(&mut mem);
        let virt = VirtualAddress::new(0x1000);
        dir.map(&mut mem, virt, phys, RW_USER).unwrap();
        assert_eq!(
            dir.map(&mut mem, virt, phys, RW_USER),
            Err(MemoryError::AlreadyMapped)
        );
    }

    #[test]
    fn self_map_window_is_reserved() {
        let (mut mem, mut dir) = setup();
        let phys = frame(&mut mem);
        let virt = VirtualAddress::new(SELF_MAP_TABLES);
        assert_eq!(dir.map(&mut mem, virt, phys, RW_USER), Err(MemoryError::Reserved));
        assert_eq!(dir.unmap(&mut mem, virt), Err(MemoryError::Reserved));
        assert!(dir.is_self_mapped(&mem));
    }

    #[test]
    fn unmap_returns_frame_and_frees_empty_table() {
        let (mut mem, mut dir) = setup();
        let phys = frame(&mut mem);
        let virt = VirtualAddress::new(0x0040_0000);
        let before = mem.live_allocations();

        dir.map(&mut mem, virt, phys, RW_USER).unwrap();
        assert_eq!(mem.live_allocations(), before + 1);

        assert_eq!(dir.unmap(&mut mem, virt), Ok(phys));
        assert_eq!(dir.translate(&mem, virt), None);
        assert_eq!(dir.table_count(), 1);
        assert_eq!(mem.live_allocations(), before);
    }

    #[test]
    fn unmap_keeps_table_with_remaining_entries() {
        let (mut mem, mut dir) = setup();
        let a = frame(&mut mem);
        let b = frame(&mut mem);
        let virt = VirtualAddress::new(0x0040_0000);
        dir.map(&mut mem, virt, a, RW_USER).unwrap();
        dir.map(&mut mem, virt + PAGE_SIZE, b, RW_USER).unwrap();

        dir.unmap(&mut mem, virt).unwrap();
        assert_eq!(dir.table_count(), 2);
        assert_eq!(dir.translate(&mem, virt + PAGE_SIZE), Some(b));
    }

    #[test]
    fn unmap_unmapped_page() {
        let (mut mem, mut dir) = setup();
        assert_eq!(
            dir.unmap(&mut mem, VirtualAddress::new(0x1000)),
            Err(MemoryError::NotMapped)
        );
    }

    #[test]
    fn map_range_spanning_tables() {
        let (mut mem, mut dir) = setup();
        let phys = mem.alloc(4 * PAGE_SIZE, PAGE_SIZE).unwrap();
        // Two pages either side of a 4 MiB boundary.
        let virt = VirtualAddress::new(0x0040_0000 - 2 * PAGE_SIZE as u32);

        dir.map_range(&mut mem, virt, phys, 4 * PAGE_SIZE - 10, RW_USER).unwrap();
        assert_eq!(dir.table_count(), 3);
        for page in 0..4 {
            let offset = page * PAGE_SIZE;
            assert_eq!(dir.translate(&mem, virt + offset), Some(phys + offset));
        }

        assert_eq!(dir.unmap_range(&mut mem, virt, 4 * PAGE_SIZE), Ok(4));
        assert_eq!(dir.table_count(), 1);
    }

    #[test]
    fn map_range_unwinds_on_failure() {
        let (mut mem, mut dir) = setup();
        let phys = mem.alloc(2 * PAGE_SIZE, PAGE_SIZE).unwrap();
        let first = VirtualAddress::new(0x003F_F000);
        let before = mem.live_allocations();

        // The second page needs a new table, which cannot be allocated.
        mem.fail_allocations_after(1);
        assert_eq!(
            dir.map_range(&mut mem, first, phys, 2 * PAGE_SIZE, RW_USER),
            Err(MemoryError::OutOfMemory)
        );
        mem.allow_allocations();

        assert_eq!(dir.translate(&mem, first), None);
        assert_eq!(dir.table_count(), 1);
        assert_eq!(mem.live_allocations(), before);
    }

    #[test]
    fn shared_kernel_tables_are_borrowed_not_owned() {
        let mut mem = EmulatedMemory::new(1024 * 1024);
        let mut kernel = PageDirectory::new(&mut mem).unwrap();
        let phys = frame(&mut mem);
        let kvirt = VirtualAddress::new(KERNEL_SPLIT);
        kernel.map(&mut mem, kvirt, phys, PageFlags::WRITABLE).unwrap();

        let mut user = PageDirectory::new(&mut mem).unwrap();
        assert_eq!(user.share_kernel_tables(&mut mem, &kernel), 1);
        assert_eq!(user.table_count(), 2);
        assert_eq!(user.translate(&mem, kvirt), Some(phys));

        assert_eq!(
            user.map(&mut mem, kvirt + PAGE_SIZE, phys, PageFlags::WRITABLE),
            Err(MemoryError::SharedTable)
        );
        assert_eq!(user.unmap(&mut mem, kvirt), Err(MemoryError::SharedTable));

        user.destroy(&mut mem);
        assert_eq!(kernel.translate(&mem, kvirt), Some(phys));
        assert!(kernel.is_self_mapped(&mem));
    }

    #[test]
    fn destroy_frees_owned_tables() {
        let (mut mem, mut dir) = setup();
        let phys = frame(&mut mem);
        let baseline = mem.live_allocations() - 1;
        dir.map(&mut mem, VirtualAddress::new(0x1000), phys, RW_USER).unwrap();
        dir.map(&mut mem, VirtualAddress::new(0x0080_0000), phys, RW_USER).unwrap();

        dir.destroy(&mut mem);
        // Only the leaf frame remains.
        assert_eq!(mem.live_allocations(), baseline);
        assert!(mem.is_allocated(phys));
    }

    #[test]
    fn validate_rejects_corrupt_directories() {
        let unaligned = PageDirectory {
            root: PhysicalAddress::new(0x0010_0010),
            table_count: 1,
        };
        assert_eq!(unaligned.validate(), Err(MemoryError::BadAlignment));

        let empty = PageDirectory {
            root: PhysicalAddress::new(0x0010_0000),
            table_count: 0,
        };
        assert_eq!(empty.validate(), Err(MemoryError::CorruptDirectory));

        let overfull = PageDirectory {
            root: PhysicalAddress::new(0x0010_0000),
            table_count: ENTRIES_PER_TABLE + 1,
        };
        assert_eq!(overfull.validate(), Err(MemoryError::CorruptDirectory));
    }

    proptest! {
        #[test]
        fn translate_round_trip(page in 0usize..0x0004_0000, offset in 0usize..PAGE_SIZE) {
            let (mut mem, mut dir) = setup();
            let phys = frame(&mut mem);
            let virt = VirtualAddress::new((page * PAGE_SIZE) as u32);

            dir.map(&mut mem, virt, phys, RW_USER).unwrap();
            prop_assert_eq!(dir.translate(&mem, virt + offset), Some(phys + offset));
        }

        #[test]
        fn self_map_survives_map_and_unmap(
            pages in proptest::collection::vec(0usize..0x000B_FFFF, 1..16),
        ) {
            let (mut mem, mut dir) = setup();
            let phys = frame(&mut mem);

            for &page in &pages {
                let virt = VirtualAddress::new((page * PAGE_SIZE) as u32);
                let _ = dir.map(&mut mem, virt, phys, RW_USER);
                prop_assert!(dir.is_self_mapped(&mem));
            }
            for &page in &pages {
                let virt = VirtualAddress::new((page * PAGE_SIZE) as u32);
                let _ = dir.unmap(&mut mem, virt);
                prop_assert!(dir.is_self_mapped(&mem));
            }
            prop_assert_eq!(dir.table_count(), 1);
        }
    }
}
