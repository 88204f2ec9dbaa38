use mm::{AllocError, MemoryError};

/// Recoverable kernel errors.
///
/// Conditions that mean the kernel's own state is inconsistent are not
/// represented here; they panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("null or stale reference")]
    NullReference,
    #[error("out of memory")]
    OutOfMemory,
    #[error("out of bounds")]
    OutOfBounds,
    #[error("bad alignment")]
    BadAlignment,
    #[error("not found")]
    NotFound,
    #[error("not supported")]
    NotSupported,
    #[error("invalid file format")]
    InvalidFormat,
}

impl KernelError {
    /// Status code reported across the system-call boundary.
    pub const fn code(self) -> i32 {
        match self {
            Self::InvalidArgument => -2,
            Self::OutOfMemory => -3,
            Self::NullReference => -5,
            Self::OutOfBounds => -6,
            Self::BadAlignment => -7,
            Self::NotFound => -8,
            Self::NotSupported => -9,
            Self::InvalidFormat => -10,
        }
    }
}

impl From<AllocError> for KernelError {
    fn from(_: AllocError) -> Self {
        Self::OutOfMemory
    }
}

impl From<MemoryError> for KernelError {
    fn from(error: MemoryError) -> Self {
        match error {
            MemoryError::OutOfMemory => Self::OutOfMemory,
            MemoryError::BadAlignment => Self::BadAlignment,
            MemoryError::Overflow | MemoryError::Overlap => Self::OutOfBounds,
            MemoryError::AlreadyMapped
            | MemoryError::Reserved
            | MemoryError::SharedTable
            | MemoryError::EmptyRegion
            | MemoryError::CorruptDirectory => Self::InvalidArgument,
            MemoryError::NotMapped | MemoryError::NotFound => Self::NotFound,
        }
    }
}

pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_and_negative() {
        let all = [
            KernelError::InvalidArgument,
            KernelError::NullReference,
            KernelError::OutOfMemory,
            KernelError::OutOfBounds,
            KernelError::BadAlignment,
            KernelError::NotFound,
            KernelError::NotSupported,
            KernelError::InvalidFormat,
        ];
        for (i, a) in all.iter().enumerate() {
            assert!(a.code() < 0);
            for b in &all[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }

    #[test]
    fn memory_errors_map_into_taxonomy() {
        assert_eq!(KernelError::from(MemoryError::OutOfMemory), KernelError::OutOfMemory);
        assert_eq!(KernelError::from(MemoryError::Overlap), KernelError::OutOfBounds);
        assert_eq!(KernelError::from(MemoryError::NotMapped), KernelError::NotFound);
        assert_eq!(KernelError::from(AllocError), KernelError::OutOfMemory);
    }
}
