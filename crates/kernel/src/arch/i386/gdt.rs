//! Flat segmentation plus the task-state segment the processor reads the
//! ring 0 stack from when a ring 3 task is interrupted.

use core::arch::asm;
use core::mem::size_of;

use mm::VirtualAddress;

use crate::config::{KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR};

const TSS_SELECTOR: u16 = 0x28;

#[repr(C)]
struct TaskStateSegment {
    link: u32,
    esp0: u32,
    ss0: u32,
    unused: [u32; 22],
    trap: u16,
    iomap_base: u16,
}

static mut TSS: TaskStateSegment = TaskStateSegment {
    link: 0,
    esp0: 0,
    ss0: KERNEL_DATA_SELECTOR as u32,
    unused: [0; 22],
    trap: 0,
    iomap_base: size_of::<TaskStateSegment>() as u16,
};

static mut GDT: [u64; 6] = [
    0,
    0x00CF_9A00_0000_FFFF, // kernel code
    0x00CF_9200_0000_FFFF, // kernel data
    0x00CF_FA00_0000_FFFF, // user code
    0x00CF_F200_0000_FFFF, // user data
    0,                     // TSS, filled in by `init`
];

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

fn tss_descriptor(base: u32, limit: u32) -> u64 {
    let mut descriptor = u64::from(limit & 0xFFFF);
    descriptor |= u64::from(base & 0x00FF_FFFF) << 16;
    descriptor |= 0x89 << 40;
    descriptor |= u64::from((limit >> 16) & 0xF) << 48;
    descriptor |= u64::from(base >> 24) << 56;
    descriptor
}

pub fn init() {
    let tss = (&raw const TSS) as u32;
    let limit = size_of::<TaskStateSegment>() as u32 - 1;
    let pointer = DescriptorTablePointer {
        limit: (size_of::<[u64; 6]>() - 1) as u16,
        base: (&raw const GDT) as u32,
    };

    // SAFETY: runs once during bring-up, before interrupts are enabled. The
    // new code and data descriptors are flat, so every address stays valid.
    unsafe {
        (*&raw mut GDT)[5] = tss_descriptor(tss, limit);
        asm!("lgdt [{}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
        asm!(
            "push {code:e}",
            "lea {tmp}, [3f]",
            "push {tmp}",
            "retf",
            "3:",
            "mov ds, {data:x}",
            "mov es, {data:x}",
            "mov fs, {data:x}",
            "mov gs, {data:x}",
            "mov ss, {data:x}",
            code = in(reg) u32::from(KERNEL_CODE_SELECTOR),
            data = in(reg) u32::from(KERNEL_DATA_SELECTOR),
            tmp = out(reg) _,
        );
        asm!("ltr {0:x}", in(reg) TSS_SELECTOR, options(nomem, nostack, preserves_flags));
    }
    log::debug!("GDT loaded, TSS at {tss:#x}");
}

/// Sets the stack the processor switches to on an interrupt from ring 3.
pub fn set_kernel_stack(top: VirtualAddress) {
    // SAFETY: single CPU; only called with interrupts masked.
    unsafe { (*&raw mut TSS).esp0 = top.as_u32() };
}
