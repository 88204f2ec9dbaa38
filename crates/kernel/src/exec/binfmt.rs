use alloc::string::String;
use alloc::vec::Vec;

use mm::{AddressSpace, KernelHeap, VirtualAddress};

use super::binfmt_elf::ElfFormat;
use super::binfmt_script::ScriptFormat;
use crate::config::BINPRM_BUF_SIZE;
use crate::error::KernelResult;

/// A program image offered to the binary-format loaders.
#[derive(Debug, Clone, Copy)]
pub struct BinaryRequest<'a> {
    pub path: &'a str,
    pub image: &'a [u8],
    pub argv: &'a [String],
    /// Number of interpreters already followed for this exec.
    pub depth: usize,
}

impl BinaryRequest<'_> {
    /// The leading bytes loaders sniff to recognise their format.
    pub fn header(&self) -> &[u8] {
        &self.image[..self.image.len().min(BINPRM_BUF_SIZE)]
    }
}

/// Where a loader puts the program: the new address space and the heap
/// backing it.
pub struct LoadTarget<'a> {
    pub heap: &'a mut dyn KernelHeap,
    pub space: &'a mut AddressSpace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The program is mapped and starts at `entry`.
    Loaded { entry: VirtualAddress },
    /// Run `path` instead, with `argv`.
    Interpreter { path: String, argv: Vec<String> },
    NotThisFormat,
}

pub trait BinaryFormat {
    fn name(&self) -> &'static str;

    /// Loads `request` into `target`, or reports that the image is not in
    /// this format without touching `target`.
    fn load(
        &self,
        request: &BinaryRequest<'_>,
        target: &mut LoadTarget<'_>,
    ) -> KernelResult<LoadOutcome>;
}

/// Registered formats in the order they are tried.
pub fn formats() -> [&'static dyn BinaryFormat; 2] {
    [&ElfFormat, &ScriptFormat]
}
