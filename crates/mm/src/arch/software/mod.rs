//! Software backend used on the host.
//!
//! Page tables live in [`EmulatedMemory`](crate::EmulatedMemory), which no
//! processor walks, so directory loads and TLB flushes have nothing to do.

use crate::{PhysicalAddress, VirtualAddress};

/// Records nothing; there is no MMU to program.
///
/// # Safety
///
/// Always safe on the host. The signature matches the hardware backend.
#[inline]
pub unsafe fn load_directory(root: PhysicalAddress) {
    log::trace!("emulated directory load of {root}");
}

#[inline]
pub fn flush(_virt: VirtualAddress) {}
