//! Address space management.
//!
//! An [`AddressSpace`] pairs a page directory with the regions carved out of it.
//! The directory says what is mapped; the regions say what is allowed and who
//! owns the memory behind it.

use crate::{
    KernelHeap, MemoryError, PAGE_SIZE, PageDirectory, PageFlags, PhysicalAddress,
    PhysicalMemory, Protection, Region, RegionList, Sharing, VirtualAddress,
};

/// A virtual address space: one page directory and its region list.
///
/// Like [`PageDirectory`], an address space must be released with
/// [`destroy`](Self::destroy).
#[derive(Debug)]
#[must_use]
pub struct AddressSpace {
    directory: PageDirectory,
    regions: RegionList,
}

impl AddressSpace {
    /// Creates an empty address space.
    pub fn new<H: KernelHeap + ?Sized>(heap: &mut H) -> Result<Self, MemoryError> {
        Ok(Self {
            directory: PageDirectory::new(heap)?,
            regions: RegionList::new(),
        })
    }

    /// Creates an address space that borrows the kernel half of `kernel`.
    pub fn with_kernel<H: KernelHeap + ?Sized>(
        heap: &mut H,
        kernel: &AddressSpace,
    ) -> Result<Self, MemoryError> {
        let mut space = Self::new(heap)?;
        let shared = space.directory.share_kernel_tables(heap, &kernel.directory);
        log::trace!(
            "address space {} shares {shared} kernel tables",
            space.directory.root()
        );
        Ok(space)
    }

    pub fn directory(&self) -> &PageDirectory {
        &self.directory
    }

    pub fn regions(&self) -> &RegionList {
        &self.regions
    }

    /// Maps `size` bytes of physical memory at `virt` without recording a region.
    pub fn map<H: KernelHeap + ?Sized>(
        &mut self,
        heap: &mut H,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        size: usize,
        flags: PageFlags,
    ) -> Result<(), MemoryError> {
        self.directory.map_range(heap, virt, phys, size, flags)
    }

    /// Unmaps `size` bytes at `virt`, returning how many pages were mapped.
    pub fn unmap<H: KernelHeap + ?Sized>(
        &mut self,
        heap: &mut H,
        virt: VirtualAddress,
        size: usize,
    ) -> Result<usize, MemoryError> {
        self.directory.unmap_range(heap, virt, size)
    }

    pub fn translate<M: PhysicalMemory + ?Sized>(
        &self,
        mem: &M,
        virt: VirtualAddress,
    ) -> Option<PhysicalAddress> {
        self.directory.translate(mem, virt)
    }

    /// Records a region without touching the page tables.
    pub fn vma_add(
        &mut self,
        start: VirtualAddress,
        backing: Option<PhysicalAddress>,
        size: usize,
        protection: Protection,
        sharing: Sharing,
        owns_backing: bool,
    ) -> Result<(), MemoryError> {
        let region = Region::new(start, backing, size, protection, sharing, owns_backing)?;
        self.regions.add(region)
    }

    /// Records a region and maps its backing memory at the region's first page.
    ///
    /// On failure nothing is recorded or mapped, and the backing memory still
    /// belongs to the caller.
    pub fn vma_map<H: KernelHeap + ?Sized>(
        &mut self,
        heap: &mut H,
        region: Region,
    ) -> Result<(), MemoryError> {
        let backing = region.backing();
        let (first_page, span, flags) = (region.first_page(), region.mapped_span(), region.page_flags());
        let (start, size) = (region.start(), region.size());

        self.regions.add(region)?;
        if let Some(backing) = backing {
            if let Err(error) = self.directory.map_range(heap, first_page, backing, span, flags) {
                self.regions.remove(start, size);
                return Err(error);
            }
        }
        Ok(())
    }

    /// Finds the region covering `addr`.
    pub fn vma_lookup(&self, addr: VirtualAddress) -> Option<&Region> {
        self.regions.lookup(addr)
    }

    /// Removes the region at exactly `start`/`size`, releasing what it owns.
    pub fn vma_remove<H: KernelHeap + ?Sized>(
        &mut self,
        heap: &mut H,
        start: VirtualAddress,
        size: usize,
    ) -> Result<(), MemoryError> {
        let region = self
            .regions
            .remove(start, size)
            .ok_or(MemoryError::NotFound)?;
        self.release(heap, region, true);
        Ok(())
    }

    /// Releases every private region: unmaps its pages, then frees owned backing.
    pub fn vma_clean<H: KernelHeap + ?Sized>(&mut self, heap: &mut H) {
        for region in self.regions.take_private() {
            self.release(heap, region, true);
        }
    }

    fn release<H: KernelHeap + ?Sized>(&mut self, heap: &mut H, region: Region, unmap: bool) {
        // Clear translations before the memory behind them goes back to the heap.
        if unmap && region.is_private() {
            if let Err(error) =
                self.directory
                    .unmap_range(heap, region.first_page(), region.mapped_span())
            {
                log::warn!("failed to unmap region at {}: {error}", region.start());
            }
        }
        if region.owns_backing() {
            if let Some(backing) = region.backing() {
                heap.free(backing);
            }
        }
    }

    /// Copies `data` into this address space at `virt`, page by page.
    pub fn write_user<M: PhysicalMemory + ?Sized>(
        &self,
        mem: &mut M,
        virt: VirtualAddress,
        data: &[u8],
    ) -> Result<(), MemoryError> {
        let mut done = 0;
        while done < data.len() {
            let addr = virt.checked_add(done).ok_or(MemoryError::Overflow)?;
            let phys = self
                .directory
                .translate(&*mem, addr)
                .ok_or(MemoryError::NotMapped)?;
            let chunk = (PAGE_SIZE - addr.page_offset()).min(data.len() - done);
            mem.write(phys, &data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Copies bytes out of this address space at `virt`, page by page.
    pub fn read_user<M: PhysicalMemory + ?Sized>(
        &self,
        mem: &M,
        virt: VirtualAddress,
        buf: &mut [u8],
    ) -> Result<(), MemoryError> {
        let mut done = 0;
        while done < buf.len() {
            let addr = virt.checked_add(done).ok_or(MemoryError::Overflow)?;
            let phys = self
                .directory
                .translate(mem, addr)
                .ok_or(MemoryError::NotMapped)?;
            let chunk = (PAGE_SIZE - addr.page_offset()).min(buf.len() - done);
            mem.read(phys, &mut buf[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Releases every region and then the directory itself.
    pub fn destroy<H: KernelHeap + ?Sized>(mut self, heap: &mut H) {
        self.vma_clean(heap);
        for region in self.regions.take_all() {
            self.release(heap, region, false);
        }
        self.directory.destroy(heap);
    }
}
