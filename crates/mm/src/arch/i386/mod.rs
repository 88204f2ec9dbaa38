//! i386 hardware backend.

use core::arch::asm;

use crate::{PhysicalAddress, VirtualAddress};

/// Loads `root` into CR3, making it the active page directory.
///
/// # Safety
///
/// `root` must be a valid page directory that maps the currently executing code
/// and stack at the same addresses as the directory being replaced.
#[inline]
pub unsafe fn load_directory(root: PhysicalAddress) {
    // SAFETY: guaranteed by the caller.
    unsafe {
        asm!("mov cr3, {}", in(reg) root.as_u32(), options(nostack, preserves_flags));
    }
}

/// Invalidates the TLB entry for the page containing `virt`.
#[inline]
pub fn flush(virt: VirtualAddress) {
    // SAFETY: invlpg has no effect beyond dropping a cached translation.
    unsafe {
        asm!("invlpg [{}]", in(reg) virt.as_u32(), options(nostack, preserves_flags));
    }
}
