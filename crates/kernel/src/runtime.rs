// cSpell:ignore kmain

//! Bare-metal bring-up and the bridge from the interrupt stubs into the
//! kernel context.

use alloc::boxed::Box;

use mm::{AddressTranslator, PhysicalAddress};
use spin::Mutex;

use crate::arch::{self, PicRegistry};
use crate::config::KernelConfig;
use crate::console::Console;
use crate::interrupts::{InterruptContext, InterruptFrame, InterruptKind, InterruptVector};
use crate::kernel::Kernel;
use crate::mem::{self, DirectMappedHeap};
use crate::sched::Dispatch;
use crate::{modules, serial};

const INIT_PATH: &str = "/bin/init";

static KERNEL: Mutex<Option<Kernel<DirectMappedHeap>>> = Mutex::new(None);

pub fn kernel_main(info: PhysicalAddress) -> ! {
    mem::init_heap();
    let console = Console::init();
    serial::init(console);
    arch::init();
    log::info!("Wey starting");

    let config = KernelConfig {
        idle_entry: idle_loop as usize as u32,
        ..KernelConfig::default()
    };
    let translator = AddressTranslator::new(config.direct_map_offset);
    let fs = modules::load(info, translator);
    let has_init = fs.contains(INIT_PATH);

    let mut kernel = match Kernel::new(DirectMappedHeap::new(translator), config, Box::new(fs)) {
        Ok(kernel) => kernel,
        Err(error) => panic!("kernel bring-up failed: {error}"),
    };

    if has_init {
        match kernel.spawn("init", INIT_PATH, &[INIT_PATH], &[]) {
            Ok(pid) => log::info!("started {INIT_PATH} as {pid}"),
            Err(error) => log::error!("cannot start {INIT_PATH}: {error}"),
        }
    } else {
        log::warn!("no {INIT_PATH} boot module, only the idle task will run");
    }

    if let Err(error) = kernel.scheduler_start(&mut PicRegistry) {
        panic!("cannot start the scheduler: {error}");
    }
    let idle = kernel.scheduler().idle();
    let registers = match kernel.task(idle) {
        Ok(task) => *task.registers(),
        Err(error) => panic!("idle task missing after bring-up: {error}"),
    };
    *KERNEL.lock() = Some(kernel);

    // Leaves the boot stack for the idle task's own stack, enabling interrupts.
    // SAFETY: the idle registers are ring 0 in the kernel space, which is active.
    unsafe { arch::resume(registers) }
}

/// The idle task: frees what finished tasks left behind, then sleeps.
extern "C" fn idle_loop() -> ! {
    loop {
        arch::without_interrupts(|| {
            if let Some(kernel) = KERNEL.lock().as_mut() {
                let reaped = kernel.reap();
                if reaped > 0 {
                    log::trace!("reaped {reaped} tasks");
                }
            }
        });
        arch::wait_for_interrupt();
    }
}

#[unsafe(no_mangle)]
extern "C" fn wey_interrupt(frame: &mut InterruptFrame) {
    let vector = InterruptVector::new(frame.vector as u8);
    let context = if vector == InterruptVector::PAGE_FAULT {
        InterruptContext::page_fault(*frame, arch::faulting_address())
    } else {
        InterruptContext::new(vector, *frame, InterruptKind::Standard)
    };

    let mut guard = KERNEL.lock();
    let Some(kernel) = guard.as_mut() else {
        panic!("{vector} before the kernel was installed");
    };
    let dispatch = kernel.handle_interrupt(&context);
    arch::end_of_interrupt(vector);

    let Dispatch::Resume(next) = dispatch else {
        return;
    };
    let registers = match kernel.task(next) {
        Ok(task) => *task.registers(),
        Err(error) => panic!("dispatching to {next:?}: {error}"),
    };
    let stack_top = match kernel.kernel_stack_top(next) {
        Ok(top) => top,
        Err(error) => panic!("dispatching to {next:?}: {error}"),
    };
    drop(guard);

    arch::set_kernel_stack(stack_top);
    // SAFETY: the scheduler activated the task's address space, and its
    // kernel stack is now in the TSS.
    unsafe { arch::resume(registers) }
}

pub fn handle_panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("kernel panic: {info}");
    arch::park()
}
