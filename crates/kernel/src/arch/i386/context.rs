//! The resume trampoline: abandons the current stack and continues a saved
//! [`Registers`] snapshot.

use core::arch::global_asm;

use crate::task::Registers;

// Offsets into `Registers`.
global_asm!(
    r#"
    .section .text
    .global wey_resume
wey_resume:
    mov eax, [esp + 4]
    test dword ptr [eax + 40], 3
    jz .Lwey_resume_kernel

    push dword ptr [eax + 60]
    push dword ptr [eax + 32]
    push dword ptr [eax + 36]
    push dword ptr [eax + 40]
    push dword ptr [eax + 28]
    mov ecx, [eax + 44]
    mov ds, cx
    mov ecx, [eax + 48]
    mov es, cx
    mov ecx, [eax + 52]
    mov fs, cx
    mov ecx, [eax + 56]
    mov gs, cx
    jmp .Lwey_resume_registers

.Lwey_resume_kernel:
    mov esp, [eax + 32]
    push dword ptr [eax + 36]
    push dword ptr [eax + 40]
    push dword ptr [eax + 28]

.Lwey_resume_registers:
    mov ebx, [eax + 4]
    mov ecx, [eax + 8]
    mov edx, [eax + 12]
    mov esi, [eax + 16]
    mov edi, [eax + 20]
    mov ebp, [eax + 24]
    mov eax, [eax + 0]
    iretd
"#
);

unsafe extern "C" {
    fn wey_resume(registers: *const Registers) -> !;
}

/// Continues execution from `registers`, in ring 3 or ring 0 as their code
/// selector says.
///
/// # Safety
///
/// The registers must describe a context that is valid in the active address
/// space, and the TSS must already hold the kernel stack of the task being
/// resumed. Nothing on the current stack survives.
pub unsafe fn resume(registers: Registers) -> ! {
    // SAFETY: guaranteed by the caller.
    unsafe { wey_resume(&registers) }
}

const _: () = {
    assert!(core::mem::offset_of!(Registers, eip) == 28);
    assert!(core::mem::offset_of!(Registers, cs) == 40);
    assert!(core::mem::offset_of!(Registers, ss) == 60);
};
