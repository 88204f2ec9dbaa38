//! Interrupt descriptor table, entry stubs, and the legacy PIC and PIT.
//!
//! Every stub pushes the same [`InterruptFrame`] (a zero error code where the
//! processor pushes none, then the vector, then `pushad`) and passes it to
//! `wey_interrupt`. If that returns, the stub restores the frame and
//! `iretd`s to the interrupted context.

use core::arch::{asm, global_asm};
use core::mem::size_of;

use super::{inb, outb};
use crate::config::{KERNEL_CODE_SELECTOR, TIMER_FREQUENCY};
use crate::error::{KernelError, KernelResult};
use crate::interrupts::{InterruptFrame, InterruptRegistry, InterruptVector};

global_asm!(
    r#"
    .macro wey_stub_plain vector
    .global wey_isr_\vector
wey_isr_\vector:
    push 0
    push \vector
    jmp wey_interrupt_common
    .endm

    .macro wey_stub_error vector
    .global wey_isr_\vector
wey_isr_\vector:
    push \vector
    jmp wey_interrupt_common
    .endm

    .section .text
    .irp vector, 0,1,2,3,4,5,6,7,9,15,16,18,19,32,129
    wey_stub_plain \vector
    .endr
    .irp vector, 8,10,11,12,13,14,17
    wey_stub_error \vector
    .endr

wey_interrupt_common:
    pushad
    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    cld
    push esp
    call wey_interrupt
    add esp, 4
    test dword ptr [esp + 44], 3
    jz .Lwey_restore
    mov ax, 0x23
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
.Lwey_restore:
    popad
    add esp, 8
    iretd

    .section .rodata
    .balign 4
    .global wey_exception_stubs
wey_exception_stubs:
    .irp vector, 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19
    .long wey_isr_\vector
    .endr
"#
);

unsafe extern "C" {
    static wey_exception_stubs: [u32; 20];
    fn wey_isr_32();
    fn wey_isr_129();
}

const PIC_MASTER: u16 = 0x20;
const PIC_SLAVE: u16 = 0xA0;
const PIC_EOI: u8 = 0x20;
const IRQ_BASE: u8 = 32;
const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
const PIT_BASE_FREQUENCY: u32 = 1_193_182;

const GATE_KERNEL: u8 = 0x8E;
/// Interrupt gate callable with `int` from ring 3.
const GATE_USER: u8 = 0xEE;

#[derive(Clone, Copy)]
#[repr(C)]
struct Gate {
    offset_low: u16,
    selector: u16,
    zero: u8,
    flags: u8,
    offset_high: u16,
}

impl Gate {
    const MISSING: Self = Self {
        offset_low: 0,
        selector: 0,
        zero: 0,
        flags: 0,
        offset_high: 0,
    };

    fn new(handler: u32, flags: u8) -> Self {
        Self {
            offset_low: handler as u16,
            selector: KERNEL_CODE_SELECTOR,
            zero: 0,
            flags,
            offset_high: (handler >> 16) as u16,
        }
    }
}

static mut IDT: [Gate; 256] = [Gate::MISSING; 256];

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

pub fn init() {
    // SAFETY: runs once during bring-up with interrupts disabled.
    unsafe {
        let idt = &mut *&raw mut IDT;
        for (vector, &stub) in (*&raw const wey_exception_stubs).iter().enumerate() {
            idt[vector] = Gate::new(stub, GATE_KERNEL);
        }
        idt[usize::from(InterruptVector::TIMER.value())] =
            Gate::new(wey_isr_32 as usize as u32, GATE_KERNEL);
        idt[usize::from(InterruptVector::YIELD.value())] =
            Gate::new(wey_isr_129 as usize as u32, GATE_USER);

        let pointer = DescriptorTablePointer {
            limit: (size_of::<[Gate; 256]>() - 1) as u16,
            base: (&raw const IDT) as u32,
        };
        asm!("lidt [{}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));

        remap_pic();
        program_pit(TIMER_FREQUENCY);
    }
    log::debug!("IDT loaded, PIC remapped to {IRQ_BASE}, timer at {TIMER_FREQUENCY} Hz");
}

/// Moves the PIC's lines to vectors 32-47 and masks all of them.
unsafe fn remap_pic() {
    // SAFETY: the PIC ports are standard on every PC.
    unsafe {
        outb(PIC_MASTER, 0x11);
        outb(PIC_SLAVE, 0x11);
        outb(PIC_MASTER + 1, IRQ_BASE);
        outb(PIC_SLAVE + 1, IRQ_BASE + 8);
        outb(PIC_MASTER + 1, 4);
        outb(PIC_SLAVE + 1, 2);
        outb(PIC_MASTER + 1, 1);
        outb(PIC_SLAVE + 1, 1);
        outb(PIC_MASTER + 1, 0xFF);
        outb(PIC_SLAVE + 1, 0xFF);
    }
}

unsafe fn program_pit(frequency: u32) {
    let divisor = (PIT_BASE_FREQUENCY / frequency) as u16;
    // SAFETY: channel 0 in rate-generator mode drives IRQ 0 only.
    unsafe {
        outb(PIT_COMMAND, 0x36);
        outb(PIT_CHANNEL0, divisor as u8);
        outb(PIT_CHANNEL0, (divisor >> 8) as u8);
    }
}

/// Acknowledges a PIC interrupt so the next one can be delivered.
pub fn end_of_interrupt(vector: InterruptVector) {
    let irq_range = IRQ_BASE..IRQ_BASE + 16;
    if !irq_range.contains(&vector.value()) {
        return;
    }
    // SAFETY: writing an EOI only acknowledges the in-service interrupt.
    unsafe {
        if vector.value() >= IRQ_BASE + 8 {
            outb(PIC_SLAVE, PIC_EOI);
        }
        outb(PIC_MASTER, PIC_EOI);
    }
}

/// Unmasks PIC lines and accepts exceptions, whose gates are always installed.
pub struct PicRegistry;

impl InterruptRegistry for PicRegistry {
    fn register(&mut self, vector: InterruptVector) -> KernelResult<()> {
        if vector.is_exception() || vector == InterruptVector::YIELD {
            return Ok(());
        }
        if vector != InterruptVector::TIMER {
            return Err(KernelError::NotSupported);
        }
        // SAFETY: unmasking IRQ 0 lets the programmed PIT through.
        unsafe {
            let mask = inb(PIC_MASTER + 1);
            outb(PIC_MASTER + 1, mask & !1);
        }
        Ok(())
    }
}

const _: () = assert!(size_of::<InterruptFrame>() == 60);
