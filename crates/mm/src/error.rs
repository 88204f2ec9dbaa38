use crate::heap::AllocError;

/// Errors reported by the paging layer and the region tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("address is not page-aligned")]
    BadAlignment,
    #[error("address range wraps around the address space")]
    Overflow,
    #[error("page is already mapped")]
    AlreadyMapped,
    #[error("page is not mapped")]
    NotMapped,
    #[error("address lies in the reserved self-map window")]
    Reserved,
    #[error("page table is shared with the kernel address space")]
    SharedTable,
    #[error("region is empty")]
    EmptyRegion,
    #[error("region overlaps an existing region")]
    Overlap,
    #[error("no such region")]
    NotFound,
    #[error("page directory is corrupt")]
    CorruptDirectory,
}

impl From<AllocError> for MemoryError {
    fn from(_: AllocError) -> Self {
        Self::OutOfMemory
    }
}
