//! The kernel heap on bare metal.
//!
//! One linked-list heap in `.bss` backs both Rust's global allocator and the
//! [`KernelHeap`] the paging and process code allocate from. The heap lies
//! inside the kernel's direct map, so physical addresses are its virtual
//! addresses minus the direct-map offset.

use alloc::collections::BTreeMap;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

use linked_list_allocator::Heap;
use mm::{AddressTranslator, AllocError, KernelHeap, PhysicalAddress, PhysicalMemory, VirtualAddress};

const HEAP_SIZE: usize = 8 * 1024 * 1024;

#[repr(C, align(4096))]
struct HeapArea([u8; HEAP_SIZE]);

static mut HEAP_AREA: HeapArea = HeapArea([0; HEAP_SIZE]);

#[global_allocator]
static KERNEL_ALLOCATOR: KernelAllocator = KernelAllocator {
    heap: spin::Mutex::new(Heap::empty()),
};

struct KernelAllocator {
    heap: spin::Mutex<Heap>,
}

unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.heap
            .lock()
            .allocate_first_fit(layout)
            .map(|block| block.as_ptr())
            .unwrap_or(ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let Some(block) = NonNull::new(ptr) else {
            return;
        };
        // SAFETY: `block` came from `alloc` with the same layout.
        unsafe { self.heap.lock().deallocate(block, layout) };
    }
}

/// Hands the heap area to the allocator. Must run once, before anything allocates.
pub fn init_heap() {
    let start = (&raw mut HEAP_AREA).cast::<u8>();
    // SAFETY: the area is a static used for nothing else, and this runs once.
    unsafe { KERNEL_ALLOCATOR.heap.lock().init(start, HEAP_SIZE) };
    log::debug!("kernel heap: {HEAP_SIZE:#x} bytes at {start:p}");
}

/// The kernel heap seen in physical terms, through the direct map.
pub struct DirectMappedHeap {
    translator: AddressTranslator,
    /// Layouts of live blocks, needed to return them.
    blocks: BTreeMap<PhysicalAddress, Layout>,
}

impl DirectMappedHeap {
    pub fn new(translator: AddressTranslator) -> Self {
        Self {
            translator,
            blocks: BTreeMap::new(),
        }
    }

    fn pointer(&self, addr: PhysicalAddress) -> *mut u8 {
        self.translator.phys_to_virt(addr).as_mut_ptr()
    }
}

impl PhysicalMemory for DirectMappedHeap {
    fn read(&self, addr: PhysicalAddress, buf: &mut [u8]) {
        // SAFETY: every physical address the kernel handles is inside the direct map.
        unsafe { ptr::copy_nonoverlapping(self.pointer(addr), buf.as_mut_ptr(), buf.len()) };
    }

    fn write(&mut self, addr: PhysicalAddress, data: &[u8]) {
        // SAFETY: as for `read`.
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), self.pointer(addr), data.len()) };
    }

    fn fill(&mut self, addr: PhysicalAddress, len: usize, value: u8) {
        // SAFETY: as for `read`.
        unsafe { ptr::write_bytes(self.pointer(addr), value, len) };
    }
}

impl KernelHeap for DirectMappedHeap {
    fn alloc(&mut self, size: usize, align: usize) -> Result<PhysicalAddress, AllocError> {
        let layout = Layout::from_size_align(size.max(1), align).map_err(|_| AllocError)?;
        let block = KERNEL_ALLOCATOR
            .heap
            .lock()
            .allocate_first_fit(layout)
            .map_err(|()| AllocError)?;
        let virt = VirtualAddress::new(block.as_ptr() as u32);
        let phys = self.translator.virt_to_phys(virt);
        // Inserting allocates, so the heap lock must already be released.
        self.blocks.insert(phys, layout);
        Ok(phys)
    }

    fn free(&mut self, addr: PhysicalAddress) {
        let Some(layout) = self.blocks.remove(&addr) else {
            panic!("freeing {addr}, which is not a live heap block");
        };
        let Some(block) = NonNull::new(self.pointer(addr)) else {
            panic!("heap block {addr} maps to a null pointer");
        };
        // SAFETY: the block was allocated by `alloc` with `layout`.
        unsafe { KERNEL_ALLOCATOR.heap.lock().deallocate(block, layout) };
    }
}
