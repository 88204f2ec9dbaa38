//! The kernel context: every table, queue and address space of one kernel
//! instance, and the entry points the interrupt glue calls into.

use alloc::boxed::Box;
use alloc::vec::Vec;

use mm::{AddressSpace, AddressTranslator, KernelHeap, Mmu, PageFlags, PhysicalAddress, VirtualAddress};

use crate::config::{INITIAL_EFLAGS, KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, KernelConfig};
use crate::error::{KernelError, KernelResult};
use crate::interrupts::{InterruptContext, InterruptVector};
use crate::process::{Pid, Process, ProcessTable, alloc_kernel_stack};
use crate::sched::{Dispatch, Scheduler};
use crate::task::{IdAllocator, Registers, Stack, Task, TaskHandle, TaskId, TaskState, TaskTable};
use crate::vfs::FileSystem;

pub struct Kernel<H: KernelHeap> {
    pub(crate) heap: H,
    pub(crate) config: KernelConfig,
    pub(crate) translator: AddressTranslator,
    pub(crate) mmu: Mmu,
    pub(crate) kernel_space: AddressSpace,
    pub(crate) tasks: TaskTable,
    pub(crate) task_ids: IdAllocator,
    pub(crate) processes: ProcessTable,
    pub(crate) scheduler: Scheduler,
    pub(crate) fs: Box<dyn FileSystem + Send>,
    /// Kernel stacks replaced by exec while still in use; freed by `reap`.
    pub(crate) retired_stacks: Vec<Stack>,
}

impl<H: KernelHeap> Kernel<H> {
    /// Builds the kernel address space, activates it, and creates the idle
    /// task, which becomes the running context.
    pub fn new(
        mut heap: H,
        config: KernelConfig,
        fs: Box<dyn FileSystem + Send>,
    ) -> KernelResult<Self> {
        let translator = AddressTranslator::new(config.direct_map_offset);
        let mut kernel_space = AddressSpace::new(&mut heap)?;
        let mapped = kernel_space.map(
            &mut heap,
            VirtualAddress::new(config.direct_map_offset),
            PhysicalAddress::NULL,
            config.direct_map_size,
            PageFlags::WRITABLE | PageFlags::GLOBAL,
        );
        if let Err(error) = mapped {
            kernel_space.destroy(&mut heap);
            return Err(error.into());
        }

        let mut mmu = Mmu::new();
        if let Err(error) = mmu.switch(kernel_space.directory()) {
            panic!("cannot activate the kernel address space: {error}");
        }

        let idle_stack = match alloc_kernel_stack(&mut heap, &config) {
            Ok(stack) => stack,
            Err(error) => {
                kernel_space.destroy(&mut heap);
                return Err(error);
            }
        };
        let mut tasks = TaskTable::new();
        let mut idle = Task::new(
            TaskId::IDLE,
            None,
            idle_registers(config.idle_entry, translator.phys_to_virt(idle_stack.top())),
            Some(idle_stack),
            None,
        );
        idle.transition(TaskState::Ready);
        idle.transition(TaskState::Running);
        let idle = tasks.insert(idle);

        log::debug!(
            "kernel space {} maps {:#x} bytes at {:#x}",
            kernel_space.directory().root(),
            config.direct_map_size,
            config.direct_map_offset
        );
        Ok(Self {
            heap,
            translator,
            mmu,
            kernel_space,
            tasks,
            task_ids: IdAllocator::new(1, u32::MAX),
            processes: ProcessTable::new(config.max_processes),
            scheduler: Scheduler::new(idle),
            fs,
            retired_stacks: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn heap(&self) -> &H {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut H {
        &mut self.heap
    }

    pub fn mmu(&self) -> &Mmu {
        &self.mmu
    }

    /// The address space holding only the kernel half; the idle task runs in it.
    pub fn kernel_space(&self) -> &AddressSpace {
        &self.kernel_space
    }

    pub fn translator(&self) -> AddressTranslator {
        self.translator
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    pub fn task(&self, handle: TaskHandle) -> KernelResult<&Task> {
        self.tasks.get(handle)
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn process(&self, pid: Pid) -> KernelResult<&Process> {
        self.processes.get(pid)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Where the processor must switch stacks to when `handle` traps out of
    /// ring 3.
    pub fn kernel_stack_top(&self, handle: TaskHandle) -> KernelResult<VirtualAddress> {
        let stack = self
            .tasks
            .get(handle)?
            .kernel_stack()
            .ok_or(KernelError::NotFound)?;
        Ok(self.translator.phys_to_virt(stack.top()))
    }

    /// Routes one delivered interrupt.
    pub fn handle_interrupt(&mut self, context: &InterruptContext) -> Dispatch {
        let frame = context.frame();
        match context.vector() {
            InterruptVector::TIMER => self.timer_tick(frame.registers()),
            InterruptVector::YIELD => {
                self.save_current(frame.registers());
                self.schedule()
            }
            InterruptVector::PAGE_FAULT => {
                self.save_current(frame.registers());
                self.handle_page_fault(context)
            }
            vector if vector.is_exception() => {
                let ip = context.instruction_pointer();
                let current = self.scheduler.current();
                let terminable = frame.from_user()
                    && self.scheduler.is_active()
                    && current != self.scheduler.idle();
                if !terminable {
                    panic!("unhandled {vector} exception at {ip}");
                }
                log::error!(
                    "task {current:?} raised {vector} at {ip} (error code {:#x}), terminating",
                    frame.error_code
                );
                self.save_current(frame.registers());
                self.terminate_current()
            }
            vector => {
                log::debug!("ignoring interrupt {vector}");
                Dispatch::Stay
            }
        }
    }

    /// Creates a process running the program at `path` and makes its task ready.
    pub fn spawn(
        &mut self,
        name: &str,
        path: &str,
        argv: &[&str],
        envp: &[&str],
    ) -> KernelResult<Pid> {
        let pid = self.process_create(name, None, argv, envp)?;
        if let Err(error) = self.start_program(pid, path, argv, envp) {
            if let Err(cleanup) = self.process_terminate(pid) {
                panic!("cannot unwind half-spawned process {pid}: {cleanup}");
            }
            return Err(error);
        }
        log::debug!("spawned process {pid} ({name}) from {path}");
        Ok(pid)
    }

    fn start_program(
        &mut self,
        pid: Pid,
        path: &str,
        argv: &[&str],
        envp: &[&str],
    ) -> KernelResult<()> {
        let task = self.task_new(pid, VirtualAddress::NULL)?;
        self.kernel_exec(task, path, argv, envp)?;
        self.scheduler_add_task(task)
    }
}

fn idle_registers(entry: u32, stack_top: VirtualAddress) -> Registers {
    let data = u32::from(KERNEL_DATA_SELECTOR);
    Registers {
        eip: entry,
        esp: stack_top.as_u32(),
        eflags: INITIAL_EFLAGS,
        cs: u32::from(KERNEL_CODE_SELECTOR),
        ds: data,
        es: data,
        fs: data,
        gs: data,
        ss: data,
        ..Registers::default()
    }
}
