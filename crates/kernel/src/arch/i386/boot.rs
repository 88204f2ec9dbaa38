//! Multiboot entry.
//!
//! The loader jumps to `boot_entry` with paging off. A boot directory of
//! 4 MiB pages maps the first 16 MiB both at 0 and at the kernel split, so
//! the code keeps running while paging is switched on and then jumps to its
//! linked, higher-half address. The kernel builds and loads its own
//! directory during bring-up.

use core::arch::global_asm;

use mm::PhysicalAddress;

const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

global_asm!(
    r#"
    .set MULTIBOOT_MAGIC, 0x1BADB002
    .set MULTIBOOT_FLAGS, 0x3
    .set KERNEL_OFFSET, 0xC0000000

    .section .multiboot, "a"
    .balign 4
    .long MULTIBOOT_MAGIC
    .long MULTIBOOT_FLAGS
    .long -(MULTIBOOT_MAGIC + MULTIBOOT_FLAGS)

    .section .bss
    .balign 16
boot_stack_bottom:
    .skip 65536
boot_stack_top:

    .section .data
    .balign 4096
boot_page_directory:
    .long 0x00000083
    .fill 767, 4, 0
    .long 0x00000083
    .long 0x00400083
    .long 0x00800083
    .long 0x00C00083
    .fill 252, 4, 0

    .section .text.boot, "ax"
    .global boot_entry
boot_entry:
    mov ecx, offset boot_page_directory - KERNEL_OFFSET
    mov cr3, ecx
    mov ecx, cr4
    or ecx, 0x10
    mov cr4, ecx
    mov ecx, cr0
    or ecx, 0x80000000
    mov cr0, ecx
    lea ecx, [boot_higher_half]
    jmp ecx
boot_higher_half:
    mov esp, offset boot_stack_top
    xor ebp, ebp
    push ebx
    push eax
    call wey_boot
.Lboot_hang:
    cli
    hlt
    jmp .Lboot_hang
"#
);

#[unsafe(no_mangle)]
extern "C" fn wey_boot(magic: u32, info: u32) -> ! {
    if magic != MULTIBOOT_BOOTLOADER_MAGIC {
        crate::arch::park();
    }
    crate::kernel_main(PhysicalAddress::new(info))
}
