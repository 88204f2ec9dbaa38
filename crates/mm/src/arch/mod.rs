//! Architecture-specific implementations for memory management.
//!
//! The paging geometry is fixed by i386 two-level paging. Only the operations that
//! touch the processor (loading CR3, flushing the TLB) differ between the hardware
//! backend and the software emulation used on the host.

// NOTE: We DO include the hardware module during tests on x86 so that rust-analyzer can see it.
#[cfg(target_arch = "x86")]
mod i386;
#[cfg(all(target_arch = "x86", not(test), not(feature = "software-emulation")))]
pub use i386::*;

// Software emulation when testing, when explicitly requested, or when the host is not i386.
#[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
mod software;
#[cfg(any(test, feature = "software-emulation", not(target_arch = "x86")))]
pub use software::*;

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Number of entries in a page directory or a page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Size in bytes of the address range covered by one page table (4 MiB).
pub const TABLE_COVERAGE: usize = PAGE_SIZE * ENTRIES_PER_TABLE;

/// Directory slot that points back at the directory itself.
pub const SELF_MAP_INDEX: usize = ENTRIES_PER_TABLE - 1;

/// First virtual address of the kernel half.
pub const KERNEL_SPLIT: u32 = 0xC000_0000;

/// Directory index of the first kernel-half table.
pub const KERNEL_DIRECTORY_INDEX: usize = (KERNEL_SPLIT as usize) / TABLE_COVERAGE;

/// Virtual address through which every page table of the active directory is visible.
pub const SELF_MAP_TABLES: u32 = (SELF_MAP_INDEX * TABLE_COVERAGE) as u32;

/// Virtual address at which the active directory sees itself.
pub const SELF_MAP_DIRECTORY: u32 = SELF_MAP_TABLES + (SELF_MAP_INDEX * PAGE_SIZE) as u32;
