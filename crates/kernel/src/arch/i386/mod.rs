//! i386 hardware glue: boot entry, descriptor tables, interrupt delivery and
//! the context-resume trampoline.

use core::arch::asm;

use mm::VirtualAddress;

mod boot;
mod context;
mod gdt;
mod idt;

pub use context::resume;
pub use gdt::set_kernel_stack;
pub use idt::{PicRegistry, end_of_interrupt};

pub fn init() {
    gdt::init();
    idt::init();
}

/// Address whose access raised the last page fault.
pub fn faulting_address() -> VirtualAddress {
    let value: u32;
    // SAFETY: reading CR2 has no side effects.
    unsafe { asm!("mov {}, cr2", out(reg) value, options(nomem, nostack, preserves_flags)) };
    VirtualAddress::new(value)
}

/// Runs `f` with interrupts masked, restoring the previous state afterwards.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let flags: u32;
    // SAFETY: saves EFLAGS and masks interrupts on this CPU.
    unsafe { asm!("pushfd", "pop {}", "cli", out(reg) flags, options(nomem)) };
    let result = f();
    if flags & (1 << 9) != 0 {
        // SAFETY: interrupts were enabled on entry.
        unsafe { asm!("sti", options(nomem, nostack)) };
    }
    result
}

/// Enables interrupts and sleeps until one arrives.
pub fn wait_for_interrupt() {
    // SAFETY: `sti; hlt` wakes on the next interrupt with no window in between.
    unsafe { asm!("sti", "hlt", options(nomem, nostack)) };
}

pub(crate) unsafe fn outb(port: u16, value: u8) {
    // SAFETY: guaranteed by the caller.
    unsafe { asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags)) };
}

pub(crate) unsafe fn inb(port: u16) -> u8 {
    let value: u8;
    // SAFETY: guaranteed by the caller.
    unsafe { asm!("in al, dx", in("dx") port, out("al") value, options(nomem, nostack, preserves_flags)) };
    value
}
