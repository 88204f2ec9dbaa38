//! Tracking of the active page directory.

use crate::{MemoryError, PageDirectory, PhysicalAddress, arch};

/// The processor's view of which directory is loaded.
///
/// Switching to the directory that is already active does nothing; every real
/// switch is counted.
#[derive(Debug, Default)]
pub struct Mmu {
    active: Option<PhysicalAddress>,
    switches: u64,
}

impl Mmu {
    pub const fn new() -> Self {
        Self {
            active: None,
            switches: 0,
        }
    }

    /// Root of the active directory, if one has been loaded.
    pub fn active(&self) -> Option<PhysicalAddress> {
        self.active
    }

    pub fn is_active(&self, directory: &PageDirectory) -> bool {
        self.active == Some(directory.root())
    }

    /// Number of directory loads performed so far.
    pub fn switch_count(&self) -> u64 {
        self.switches
    }

    /// Makes `directory` the active one.
    ///
    /// Returns `Ok(false)` if it already was. A directory that fails validation is
    /// never loaded.
    pub fn switch(&mut self, directory: &PageDirectory) -> Result<bool, MemoryError> {
        if self.is_active(directory) {
            return Ok(false);
        }
        directory.validate()?;

        // SAFETY: validated directories share the kernel half, which holds the
        // executing code and stack.
        unsafe { arch::load_directory(directory.root()) };
        self.active = Some(directory.root());
        self.switches += 1;
        log::trace!("activated page directory {}", directory.root());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmulatedMemory;

    #[test]
    fn switching_to_active_directory_is_noop() {
        let mut mem = EmulatedMemory::new(64 * 1024);
        let dir = PageDirectory::new(&mut mem).unwrap();
        let mut mmu = Mmu::new();

        assert_eq!(mmu.switch(&dir), Ok(true));
        assert_eq!(mmu.switch(&dir), Ok(false));
        assert_eq!(mmu.switch_count(), 1);
        assert!(mmu.is_active(&dir));
        dir.destroy(&mut mem);
    }

    #[test]
    fn switching_between_directories_counts() {
        let mut mem = EmulatedMemory::new(64 * 1024);
        let a = PageDirectory::new(&mut mem).unwrap();
        let b = PageDirectory::new(&mut mem).unwrap();
        let mut mmu = Mmu::new();

        mmu.switch(&a).unwrap();
        mmu.switch(&b).unwrap();
        mmu.switch(&a).unwrap();
        assert_eq!(mmu.switch_count(), 3);
        assert_eq!(mmu.active(), Some(a.root()));
        a.destroy(&mut mem);
        b.destroy(&mut mem);
    }
}
