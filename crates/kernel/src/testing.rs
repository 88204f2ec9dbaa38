//! Kernels and program images for hosted tests.

use alloc::boxed::Box;
use alloc::vec::Vec;

use mm::{EmulatedMemory, VirtualAddress};

use crate::config::KernelConfig;
use crate::error::KernelResult;
use crate::interrupts::{InterruptRegistry, InterruptVector};
use crate::kernel::Kernel;
use crate::process::Pid;
use crate::sched::Dispatch;
use crate::task::TaskHandle;
use crate::vfs::MemFs;

const MEMORY_SIZE: usize = 8 * 1024 * 1024;

pub fn config() -> KernelConfig {
    KernelConfig {
        direct_map_size: 4 * 1024 * 1024,
        idle_entry: 0xC010_0000,
        ..KernelConfig::default()
    }
}

pub fn kernel() -> Kernel<EmulatedMemory> {
    kernel_with_config(config())
}

pub fn kernel_with_config(config: KernelConfig) -> Kernel<EmulatedMemory> {
    Kernel::new(EmulatedMemory::new(MEMORY_SIZE), config, Box::new(MemFs::new())).unwrap()
}

pub fn kernel_with_fs(fs: MemFs) -> Kernel<EmulatedMemory> {
    Kernel::new(EmulatedMemory::new(MEMORY_SIZE), config(), Box::new(fs)).unwrap()
}

pub fn started_kernel() -> Kernel<EmulatedMemory> {
    let mut kernel = kernel();
    kernel
        .scheduler_start(&mut RecordingRegistry::default())
        .unwrap();
    kernel
}

/// Creates process `p` with one task and switches to it, starting the
/// scheduler if needed.
pub fn running_task(kernel: &mut Kernel<EmulatedMemory>) -> (Pid, TaskHandle) {
    let pid = kernel.process_create("p", None, &[], &[]).unwrap();
    let task = kernel.task_new(pid, VirtualAddress::new(0x0040_0000)).unwrap();
    kernel.scheduler_add_task(task).unwrap();
    if !kernel.scheduler().is_active() {
        kernel
            .scheduler_start(&mut RecordingRegistry::default())
            .unwrap();
    }
    assert_eq!(kernel.schedule(), Dispatch::Resume(task));
    (pid, task)
}

#[derive(Debug, Default)]
pub struct RecordingRegistry {
    pub vectors: Vec<InterruptVector>,
}

impl InterruptRegistry for RecordingRegistry {
    fn register(&mut self, vector: InterruptVector) -> KernelResult<()> {
        self.vectors.push(vector);
        Ok(())
    }
}

/// One loadable segment of a test executable.
pub struct Segment {
    pub vaddr: u32,
    pub data: Vec<u8>,
    pub memsz: u32,
    pub flags: u32,
}

impl Segment {
    pub fn new(vaddr: u32, data: Vec<u8>, memsz: u32, flags: u32) -> Self {
        Self {
            vaddr,
            data,
            memsz,
            flags,
        }
    }
}

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;
const PT_LOAD: u32 = 1;

/// Builds a static ELF32 little-endian i386 executable.
pub fn elf_image(entry: u32, segments: &[Segment]) -> Vec<u8> {
    let mut image = Vec::new();
    image.extend_from_slice(b"\x7fELF");
    image.extend_from_slice(&[1, 1, 1, 0]);
    image.extend_from_slice(&[0; 8]);
    image.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    image.extend_from_slice(&3u16.to_le_bytes()); // EM_386
    image.extend_from_slice(&1u32.to_le_bytes());
    image.extend_from_slice(&entry.to_le_bytes());
    image.extend_from_slice(&(EHDR_SIZE as u32).to_le_bytes()); // e_phoff
    image.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
    image.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    image.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    image.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    image.extend_from_slice(&(segments.len() as u16).to_le_bytes());
    image.extend_from_slice(&40u16.to_le_bytes()); // e_shentsize
    image.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    image.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    assert_eq!(image.len(), EHDR_SIZE);

    let mut offset = EHDR_SIZE + PHDR_SIZE * segments.len();
    for segment in segments {
        let fields = [
            PT_LOAD,
            offset as u32,
            segment.vaddr,
            segment.vaddr,
            segment.data.len() as u32,
            segment.memsz,
            segment.flags,
            0x1000,
        ];
        for field in fields {
            image.extend_from_slice(&field.to_le_bytes());
        }
        offset += segment.data.len();
    }
    for segment in segments {
        image.extend_from_slice(&segment.data);
    }
    image
}

/// An executable with one text segment covering `entry`.
pub fn simple_elf(entry: u32) -> Vec<u8> {
    let base = entry & !0xFFF;
    let code = alloc::vec![0x90, 0x90, 0xEB, 0xFE];
    let memsz = (entry - base + 0x10).max(code.len() as u32);
    elf_image(entry, &[Segment::new(base, code, memsz, elf::abi::PF_R | elf::abi::PF_X)])
}
