//! Page table entries for i386 two-level paging.

use bitflags::bitflags;

use crate::PhysicalAddress;

bitflags! {
    /// Flag bits of an i386 page directory or page table entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PageFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        const HUGE_PAGE = 1 << 7;
        const GLOBAL = 1 << 8;
        /// Software-available bit marking a directory entry whose table belongs to
        /// the kernel half and is shared by every address space.
        const SHARED = 1 << 9;
    }
}

/// A single 32-bit page directory or page table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(u32);

impl PageEntry {
    /// Bits 12-31 hold the frame address.
    const ADDRESS_MASK: u32 = 0xFFFF_F000;

    /// Bits 0-11 hold the flags.
    const FLAGS_MASK: u32 = !Self::ADDRESS_MASK;

    /// The empty, not-present entry.
    pub const EMPTY: Self = Self(0);

    /// Creates a new entry pointing at `address`.
    ///
    /// The physical address must be page-aligned.
    pub fn new(address: PhysicalAddress, flags: PageFlags) -> Self {
        debug_assert!(
            address.as_u32() & Self::FLAGS_MASK == 0,
            "physical address must be page-aligned"
        );

        Self((address.as_u32() & Self::ADDRESS_MASK) | (flags.bits() & Self::FLAGS_MASK))
    }

    /// Reinterprets a raw entry value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw entry value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns the physical address stored in this entry, or `None` if it is not present.
    pub fn address(self) -> Option<PhysicalAddress> {
        if self.is_present() {
            Some(PhysicalAddress::new(self.0 & Self::ADDRESS_MASK))
        } else {
            None
        }
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_retain(self.0 & Self::FLAGS_MASK)
    }

    /// Sets the flags for this entry, preserving the address.
    pub fn set_flags(&mut self, flags: PageFlags) {
        self.0 = (self.0 & Self::ADDRESS_MASK) | (flags.bits() & Self::FLAGS_MASK);
    }

    pub fn is_present(self) -> bool {
        self.flags().contains(PageFlags::PRESENT)
    }

    pub fn is_shared(self) -> bool {
        self.flags().contains(PageFlags::SHARED)
    }

    /// Clears this entry.
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_keeps_address_and_flags() {
        let entry = PageEntry::new(
            PhysicalAddress::new(0x0040_3000),
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
        );
        assert_eq!(entry.raw(), 0x0040_3007);
        assert_eq!(entry.address(), Some(PhysicalAddress::new(0x0040_3000)));
        assert!(entry.flags().contains(PageFlags::USER));
    }

    #[test]
    fn not_present_has_no_address() {
        let entry = PageEntry::new(PhysicalAddress::new(0x5000), PageFlags::WRITABLE);
        assert!(!entry.is_present());
        assert_eq!(entry.address(), None);
    }

    #[test]
    fn shared_bit_is_software_available_bit() {
        assert_eq!(PageFlags::SHARED.bits(), 0x200);
        let entry = PageEntry::new(
            PhysicalAddress::new(0x1000),
            PageFlags::PRESENT | PageFlags::SHARED,
        );
        assert!(entry.is_shared());
    }

    #[test]
    fn set_flags_preserves_address() {
        let mut entry = PageEntry::new(PhysicalAddress::new(0x9000), PageFlags::PRESENT);
        entry.set_flags(PageFlags::PRESENT | PageFlags::DIRTY);
        assert_eq!(entry.address(), Some(PhysicalAddress::new(0x9000)));
        assert!(entry.flags().contains(PageFlags::DIRTY));
    }

    #[test]
    fn clear() {
        let mut entry = PageEntry::new(PhysicalAddress::new(0x9000), PageFlags::PRESENT);
        entry.clear();
        assert_eq!(entry, PageEntry::EMPTY);
    }
}
