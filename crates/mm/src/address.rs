//! Address types for physical and virtual memory management.
//!
//! Both address kinds are 32 bits wide, matching i386 two-level paging. Virtual
//! addresses additionally expose the directory and table indices used by the
//! page-table walk.

use core::fmt;
use core::ops::{Add, Sub};

use crate::arch::{self, ENTRIES_PER_TABLE, KERNEL_SPLIT, PAGE_SIZE};

/// Converts between physical addresses and the kernel's direct-mapped view of them.
///
/// The kernel maps all of physical memory at a fixed offset in the upper half, so
/// the heap can hand out physical addresses and still reach them through a pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressTranslator {
    direct_map_offset: u32,
}

impl AddressTranslator {
    /// Creates a translator for a direct map starting at `direct_map_offset`.
    pub const fn new(direct_map_offset: u32) -> Self {
        Self { direct_map_offset }
    }

    /// Returns the direct-map offset.
    pub const fn direct_map_offset(&self) -> u32 {
        self.direct_map_offset
    }

    /// Translates a physical address into its direct-mapped virtual address.
    pub const fn phys_to_virt(&self, phys: PhysicalAddress) -> VirtualAddress {
        VirtualAddress(phys.0.wrapping_add(self.direct_map_offset))
    }

    /// Translates a direct-mapped virtual address back to its physical address.
    pub const fn virt_to_phys(&self, virt: VirtualAddress) -> PhysicalAddress {
        PhysicalAddress(virt.0.wrapping_sub(self.direct_map_offset))
    }

    /// Returns true if `virt` lies inside the direct-mapped window.
    pub const fn is_direct_mapped(&self, virt: VirtualAddress) -> bool {
        virt.0 >= self.direct_map_offset
    }
}

/// Generates the structure and helpers shared by physical and virtual addresses.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// The zero address.
            pub const NULL: Self = Self(0);

            /// Creates a new address.
            #[inline]
            pub const fn new(addr: u32) -> Self {
                Self(addr)
            }

            /// Creates an address from a host-sized value.
            ///
            /// Returns `None` if the value does not fit in 32 bits.
            #[inline]
            pub const fn try_from_usize(addr: usize) -> Option<Self> {
                if addr > u32::MAX as usize {
                    None
                } else {
                    Some(Self(addr as u32))
                }
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_u32(self) -> u32 {
                self.0
            }

            /// Returns the raw address value widened to `usize`.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0 as usize
            }

            /// Returns true for the zero address.
            #[inline]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                (self.0 as usize) & (align - 1) == 0
            }

            /// Aligns the address down to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !((align - 1) as u32))
            }

            /// Aligns the address up to the given alignment.
            ///
            /// Returns `None` if the result would not fit in 32 bits.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_up(self, align: usize) -> Option<Self> {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                let mask = (align - 1) as u32;
                match self.0.checked_add(mask) {
                    Some(sum) => Some(Self(sum & !mask)),
                    None => None,
                }
            }

            /// Adds a byte offset, returning `None` on overflow.
            #[inline]
            pub const fn checked_add(self, offset: usize) -> Option<Self> {
                if offset > u32::MAX as usize {
                    return None;
                }
                match self.0.checked_add(offset as u32) {
                    Some(sum) => Some(Self(sum)),
                    None => None,
                }
            }

            /// Subtracts a byte offset, returning `None` on underflow.
            #[inline]
            pub const fn checked_sub(self, offset: usize) -> Option<Self> {
                if offset > u32::MAX as usize {
                    return None;
                }
                match self.0.checked_sub(offset as u32) {
                    Some(diff) => Some(Self(diff)),
                    None => None,
                }
            }

            /// Returns the offset of this address within its page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                (self.0 as usize) & (PAGE_SIZE - 1)
            }
        }

        impl fmt::Pointer for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#010x}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(addr: u32) -> Self {
                Self::new(addr)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs as u32)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self(self.0 - rhs as u32)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                (self.0 - rhs.0) as usize
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     Frames handed out by the kernel heap are identified by their physical address."
);

impl_address_common!(
    VirtualAddress,
    "A virtual memory address.\n\n\
     Provides the directory and table indices of the two-level i386 page walk."
);

impl VirtualAddress {
    /// Returns the page directory index (bits 22-31).
    #[inline]
    pub const fn directory_index(self) -> usize {
        ((self.0 as usize) >> 22) & (ENTRIES_PER_TABLE - 1)
    }

    /// Returns the page table index (bits 12-21).
    #[inline]
    pub const fn table_index(self) -> usize {
        ((self.0 as usize) >> 12) & (ENTRIES_PER_TABLE - 1)
    }

    /// Builds the address covered by the given directory and table indices.
    #[inline]
    pub const fn from_indices(directory: usize, table: usize) -> Self {
        Self(((directory as u32) << 22) | ((table as u32) << 12))
    }

    /// Returns true if the address lies in the kernel half.
    #[inline]
    pub const fn is_kernel(self) -> bool {
        self.0 >= KERNEL_SPLIT
    }

    /// Returns true if the address lies inside the self-map window.
    #[inline]
    pub const fn is_self_map(self) -> bool {
        self.directory_index() == arch::SELF_MAP_INDEX
    }

    /// Converts the address to a pointer.
    #[inline]
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as usize as *const T
    }

    /// Converts the address to a mutable pointer.
    #[inline]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as usize as *mut T
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod physical_address {
        use super::*;

        #[test]
        fn alignment() {
            let addr = PhysicalAddress::new(0x2000);
            assert!(addr.is_aligned(PAGE_SIZE));
            assert!(!PhysicalAddress::new(0x2004).is_aligned(PAGE_SIZE));
        }

        #[test]
        fn align_down() {
            let addr = PhysicalAddress::new(0x2345);
            assert_eq!(addr.align_down(PAGE_SIZE), PhysicalAddress::new(0x2000));
        }

        #[test]
        fn align_up() {
            let addr = PhysicalAddress::new(0x2345);
            assert_eq!(addr.align_up(PAGE_SIZE), Some(PhysicalAddress::new(0x3000)));
        }

        #[test]
        fn align_up_overflow() {
            let addr = PhysicalAddress::new(0xFFFF_F001);
            assert_eq!(addr.align_up(PAGE_SIZE), None);
        }

        #[test]
        fn align_already_aligned() {
            let addr = PhysicalAddress::new(0x2000);
            assert_eq!(addr.align_down(PAGE_SIZE), addr);
            assert_eq!(addr.align_up(PAGE_SIZE), Some(addr));
        }

        #[test]
        fn operators() {
            let addr = PhysicalAddress::new(0x0100);
            assert_eq!((addr + 0x50).as_u32(), 0x0150);
            assert_eq!((addr - 0x50).as_u32(), 0x00B0);
            assert_eq!(PhysicalAddress::new(0x0150) - addr, 0x50);
        }

        #[test]
        fn checked_arithmetic() {
            let addr = PhysicalAddress::new(0xFFFF_F000);
            assert_eq!(addr.checked_add(0x1000), None);
            assert_eq!(addr.checked_add(0xFFF), Some(PhysicalAddress::new(0xFFFF_FFFF)));
            assert_eq!(PhysicalAddress::new(0x10).checked_sub(0x11), None);
        }

        #[test]
        fn try_from_usize() {
            assert_eq!(
                PhysicalAddress::try_from_usize(0x1234),
                Some(PhysicalAddress::new(0x1234))
            );
            assert_eq!(PhysicalAddress::try_from_usize(1 << 33), None);
        }

        #[test]
        fn formats() {
            let addr = PhysicalAddress::new(0x0100);
            assert_eq!(format!("{:?}", addr), "PhysicalAddress(0x100)");
            assert_eq!(format!("{}", addr), "0x100");
            assert_eq!(format!("{:p}", addr), "0x00000100");
        }
    }

    mod virtual_address {
        use super::*;

        #[test]
        fn indices() {
            let addr = VirtualAddress::new(0xC030_1234);
            assert_eq!(addr.directory_index(), 0x300);
            assert_eq!(addr.table_index(), 0x301);
            assert_eq!(addr.page_offset(), 0x234);
        }

        #[test]
        fn from_indices_round_trip() {
            let addr = VirtualAddress::from_indices(768, 5);
            assert_eq!(addr, VirtualAddress::new(0xC000_5000));
            assert_eq!(addr.directory_index(), 768);
            assert_eq!(addr.table_index(), 5);
        }

        #[test]
        fn kernel_half() {
            assert!(!VirtualAddress::new(0xBFFF_FFFF).is_kernel());
            assert!(VirtualAddress::new(0xC000_0000).is_kernel());
        }

        #[test]
        fn self_map_window() {
            assert!(VirtualAddress::new(0xFFC0_0000).is_self_map());
            assert!(VirtualAddress::new(0xFFFF_F000).is_self_map());
            assert!(!VirtualAddress::new(0xFFBF_FFFF).is_self_map());
        }
    }

    mod direct_mapping {
        use super::*;

        const TRANSLATOR: AddressTranslator = AddressTranslator::new(0xC000_0000);

        #[test]
        fn physical_to_virtual() {
            let virt = TRANSLATOR.phys_to_virt(PhysicalAddress::new(0x0010_0000));
            assert_eq!(virt, VirtualAddress::new(0xC010_0000));
        }

        #[test]
        fn round_trip() {
            let phys = PhysicalAddress::new(0x1234);
            assert_eq!(TRANSLATOR.virt_to_phys(TRANSLATOR.phys_to_virt(phys)), phys);
        }

        #[test]
        fn is_direct_mapped() {
            assert!(TRANSLATOR.is_direct_mapped(VirtualAddress::new(0xC000_0000)));
            assert!(!TRANSLATOR.is_direct_mapped(VirtualAddress::new(0xBFFF_F000)));
        }
    }
}
