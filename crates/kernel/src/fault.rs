//! Page-fault policy.
//!
//! Every region is mapped when it is created, so a fault is never resolved:
//! a fault from user mode finishes the faulting task, a fault from the kernel
//! halts the system.

use mm::{KernelHeap, Protection, Region, VirtualAddress};

use crate::interrupts::{InterruptContext, InterruptKind, PageFaultErrorCode};
use crate::kernel::Kernel;
use crate::sched::Dispatch;

/// Why a faulting access could not proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCause {
    /// No region covers the address.
    Unmapped,
    /// A region covers the address but its page is not present.
    NotPresent,
    /// The access breaks the covering region's protection.
    Protection,
    /// The processor found reserved bits set in a paging entry.
    ReservedBits,
}

/// Decides what went wrong with a faulting access, given the region covering it.
pub fn classify(region: Option<&Region>, error: PageFaultErrorCode) -> FaultCause {
    if error.contains(PageFaultErrorCode::RESERVED_WRITE) {
        return FaultCause::ReservedBits;
    }
    let Some(region) = region else {
        return FaultCause::Unmapped;
    };

    let protection = region.protection();
    let write_denied =
        error.contains(PageFaultErrorCode::WRITE) && !protection.contains(Protection::WRITE);
    let fetch_denied = error.contains(PageFaultErrorCode::INSTRUCTION_FETCH)
        && !protection.contains(Protection::EXEC);
    if write_denied || fetch_denied || error.contains(PageFaultErrorCode::PRESENT) {
        FaultCause::Protection
    } else {
        FaultCause::NotPresent
    }
}

impl<H: KernelHeap> Kernel<H> {
    /// Handles a page fault taken by the current task, whose registers are
    /// already saved.
    pub fn handle_page_fault(&mut self, context: &InterruptContext) -> Dispatch {
        let InterruptKind::PageFault {
            faulting_address,
            error,
        } = *context.kind()
        else {
            panic!("page fault handler called for {}", context.vector());
        };
        let ip = context.instruction_pointer();

        let current = self.scheduler.current();
        if !error.contains(PageFaultErrorCode::USER) || current == self.scheduler.idle() {
            panic!("kernel page fault at {faulting_address} (ip {ip}, {error:?})");
        }

        let cause = self.fault_cause(faulting_address, error);
        let id = self
            .tasks
            .get(current)
            .map(|task| task.id())
            .unwrap_or_default();
        log::error!(
            "task {id} faulted at {faulting_address} (ip {ip}, {error:?}): {cause:?}, terminating"
        );
        self.terminate_current()
    }

    fn fault_cause(&self, address: VirtualAddress, error: PageFaultErrorCode) -> FaultCause {
        let region = self
            .tasks
            .get(self.scheduler.current())
            .ok()
            .and_then(|task| task.process())
            .and_then(|pid| self.processes.get(pid).ok())
            .and_then(|process| process.space().vma_lookup(address));
        classify(region, error)
    }
}
