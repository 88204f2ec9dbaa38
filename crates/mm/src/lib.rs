#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Wey Memory Manager
//!
//! Virtual memory for the Wey kernel on i386:
//!
//! - Two-level page directories with a self-map slot and kernel-shared tables.
//! - Per-address-space region tracking.
//! - Active-directory bookkeeping for context switches.
//! - Software emulation of physical memory for testing in non-kernel environments.

extern crate alloc;

mod address;
mod address_space;
mod arch;
#[cfg(any(test, feature = "software-emulation"))]
mod emulated;
mod entry;
mod error;
mod heap;
mod mmu;
mod page_directory;
mod region;

pub use address::{AddressTranslator, PhysicalAddress, VirtualAddress};
pub use address_space::AddressSpace;
#[cfg(any(test, feature = "software-emulation"))]
pub use emulated::{EMULATED_BASE, EmulatedMemory};
pub use entry::{PageEntry, PageFlags};
pub use error::MemoryError;
pub use heap::{AllocError, KernelHeap, PhysicalMemory};
pub use mmu::Mmu;
pub use page_directory::PageDirectory;
pub use region::{Protection, Region, RegionList, Sharing};

pub use arch::{
    ENTRIES_PER_TABLE, KERNEL_DIRECTORY_INDEX, KERNEL_SPLIT, PAGE_SIZE, SELF_MAP_DIRECTORY,
    SELF_MAP_INDEX, SELF_MAP_TABLES, TABLE_COVERAGE, flush, load_directory,
};
