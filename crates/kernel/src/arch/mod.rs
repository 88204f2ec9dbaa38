#[cfg(target_arch = "x86")]
pub(crate) mod i386;

#[cfg(target_arch = "x86")]
pub use i386::*;

/// Stops the processor for good.
pub fn park() -> ! {
    use core::arch::asm;

    loop {
        // SAFETY: halting with interrupts off only stops this CPU.
        unsafe {
            asm!("cli", "hlt", options(nomem, nostack));
        }
    }
}
