//! Processes and the tasks created inside them.
//!
//! A [`Process`] owns an address space, its identity and argument vectors, and
//! the list of tasks running in it. The task records themselves live in the
//! kernel's [`TaskTable`]; a process only links them.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use mm::{
    AddressSpace, KernelHeap, MemoryError, PAGE_SIZE, Protection, Region, Sharing, VirtualAddress,
};

use crate::config::{
    INITIAL_EFLAGS, KernelConfig, PATH_MAX, USER_CODE_SELECTOR, USER_DATA_SELECTOR,
};
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::task::{
    IdAllocator, ListTag, Registers, Stack, Task, TaskHandle, TaskId, TaskList, TaskState,
    UserStack,
};

/// Alignment of kernel stacks.
const KERNEL_STACK_ALIGN: usize = 16;

/// Process identifier. Pid 0 is never issued; it stands for the idle task.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u32);

impl Pid {
    pub const fn new(pid: u32) -> Self {
        Self(pid)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.0)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct Process {
    pid: Pid,
    name: String,
    pwd: String,
    argv: Vec<String>,
    envp: Vec<String>,
    pub(crate) space: AddressSpace,
    pub(crate) tasks: TaskList,
}

impl Process {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Working directory.
    pub fn pwd(&self) -> &str {
        &self.pwd
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn envp(&self) -> &[String] {
        &self.envp
    }

    pub(crate) fn set_arguments(&mut self, argv: Vec<String>, envp: Vec<String>) {
        self.argv = argv;
        self.envp = envp;
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Handles of this process's tasks, oldest first.
    pub fn tasks<'a>(
        &self,
        table: &'a crate::task::TaskTable,
    ) -> impl Iterator<Item = TaskHandle> + use<'a> {
        self.tasks.iter(table)
    }
}

/// Live processes by pid.
#[derive(Debug)]
pub struct ProcessTable {
    processes: BTreeMap<Pid, Process>,
    pids: IdAllocator,
}

impl ProcessTable {
    /// Creates a table issuing pids from `1..max_processes`.
    pub fn new(max_processes: usize) -> Self {
        let limit = u32::try_from(max_processes).unwrap_or(u32::MAX);
        Self {
            processes: BTreeMap::new(),
            pids: IdAllocator::new(1, limit),
        }
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.processes.contains_key(&pid)
    }

    pub fn get(&self, pid: Pid) -> KernelResult<&Process> {
        self.processes.get(&pid).ok_or(KernelError::NotFound)
    }

    pub(crate) fn get_mut(&mut self, pid: Pid) -> KernelResult<&mut Process> {
        self.processes.get_mut(&pid).ok_or(KernelError::NotFound)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }
}

/// Checks an absolute path against the length limit.
pub(crate) fn validate_path(path: &str) -> KernelResult<()> {
    if !path.starts_with('/') {
        return Err(KernelError::InvalidArgument);
    }
    if path.len() > PATH_MAX {
        return Err(KernelError::OutOfBounds);
    }
    Ok(())
}

pub(crate) fn to_owned_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

/// Initial registers of a ring 3 task.
pub(crate) fn user_registers(entry: VirtualAddress, stack_pointer: VirtualAddress) -> Registers {
    let data = u32::from(USER_DATA_SELECTOR);
    Registers {
        eip: entry.as_u32(),
        esp: stack_pointer.as_u32(),
        eflags: INITIAL_EFLAGS,
        cs: u32::from(USER_CODE_SELECTOR),
        ds: data,
        es: data,
        fs: data,
        gs: data,
        ss: data,
        ..Registers::default()
    }
}

pub(crate) fn alloc_kernel_stack<H: KernelHeap + ?Sized>(
    heap: &mut H,
    config: &KernelConfig,
) -> KernelResult<Stack> {
    let base = heap.alloc(config.kernel_stack_size, KERNEL_STACK_ALIGN)?;
    Ok(Stack::new(base, config.kernel_stack_size))
}

/// Allocates a user stack and maps it at the highest free slot below the
/// configured stack top, leaving a guard page between neighbouring stacks.
///
/// The stack's region does not own its memory; whoever holds the returned
/// [`UserStack`] frees it.
pub(crate) fn map_user_stack<H: KernelHeap + ?Sized>(
    heap: &mut H,
    config: &KernelConfig,
    space: &mut AddressSpace,
) -> KernelResult<UserStack> {
    let size = config.user_stack_size.next_multiple_of(PAGE_SIZE);
    let memory = Stack::new(heap.alloc_zeroed(size, PAGE_SIZE)?, size);

    let placed = place_user_stack(heap, config, space, memory);
    if placed.is_err() {
        heap.free(memory.base());
    }
    placed
}

fn place_user_stack<H: KernelHeap + ?Sized>(
    heap: &mut H,
    config: &KernelConfig,
    space: &mut AddressSpace,
    memory: Stack,
) -> KernelResult<UserStack> {
    let mut top = VirtualAddress::new(config.user_stack_top);
    loop {
        let bottom = top
            .checked_sub(memory.size())
            .filter(|bottom| !bottom.is_null())
            .ok_or(KernelError::OutOfBounds)?;
        let region = Region::new(
            bottom,
            Some(memory.base()),
            memory.size(),
            Protection::READ | Protection::WRITE,
            Sharing::Private,
            false,
        )?;

        match space.vma_map(heap, region) {
            Ok(()) => return Ok(UserStack::new(memory, top)),
            Err(MemoryError::Overlap | MemoryError::AlreadyMapped) => {
                top = bottom.checked_sub(PAGE_SIZE).ok_or(KernelError::OutOfBounds)?;
            }
            Err(error) => return Err(error.into()),
        }
    }
}

impl<H: KernelHeap> Kernel<H> {
    /// Creates a process with a fresh address space and no tasks.
    ///
    /// `pwd` defaults to `/`. The pid is the lowest free one.
    pub fn process_create(
        &mut self,
        name: &str,
        pwd: Option<&str>,
        argv: &[&str],
        envp: &[&str],
    ) -> KernelResult<Pid> {
        if argv.len() > self.config.max_args || envp.len() > self.config.max_envs {
            return Err(KernelError::OutOfBounds);
        }
        if name.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        if name.len() > self.config.max_name {
            return Err(KernelError::OutOfBounds);
        }
        let pwd = pwd.unwrap_or("/");
        validate_path(pwd)?;

        let pid = self
            .processes
            .pids
            .allocate()
            .map(Pid)
            .ok_or(KernelError::OutOfBounds)?;
        let space = match AddressSpace::with_kernel(&mut self.heap, &self.kernel_space) {
            Ok(space) => space,
            Err(error) => {
                self.processes.pids.release(pid.0);
                return Err(error.into());
            }
        };

        let process = Process {
            pid,
            name: name.to_string(),
            pwd: pwd.to_string(),
            argv: to_owned_strings(argv),
            envp: to_owned_strings(envp),
            space,
            tasks: TaskList::new(ListTag::Process(pid)),
        };
        self.processes.processes.insert(pid, process);
        log::debug!("created process {pid} ({name})");
        Ok(pid)
    }

    /// Disposes every task of `pid`, tears down its address space and frees the pid.
    ///
    /// The process owning the running task cannot be terminated.
    pub fn process_terminate(&mut self, pid: Pid) -> KernelResult<()> {
        let running = self.tasks.get(self.scheduler.current())?.process();
        if running == Some(pid) {
            return Err(KernelError::InvalidArgument);
        }

        let handles: Vec<TaskHandle> = self.processes.get(pid)?.tasks(&self.tasks).collect();
        for handle in handles {
            self.task_dispose(handle)?;
        }

        let process = self
            .processes
            .processes
            .remove(&pid)
            .ok_or(KernelError::NotFound)?;
        process.space.destroy(&mut self.heap);
        self.processes.pids.release(pid.0);
        log::debug!("terminated process {pid} ({})", process.name);
        Ok(())
    }

    /// Changes the working directory of `pid`.
    pub fn process_chdir(&mut self, pid: Pid, path: &str) -> KernelResult<()> {
        validate_path(path)?;
        self.processes.get_mut(pid)?.pwd = path.to_string();
        Ok(())
    }

    /// Creates a task in `pid` that will start at `entry` in ring 3.
    ///
    /// The task gets its own kernel stack and a user stack mapped into the
    /// process's address space. It starts out `New` and in no queue.
    pub fn task_new(&mut self, pid: Pid, entry: VirtualAddress) -> KernelResult<TaskHandle> {
        if !self.processes.contains(pid) {
            return Err(KernelError::NotFound);
        }
        let id = self.task_ids.allocate().ok_or(KernelError::OutOfBounds)?;

        let kernel_stack = match alloc_kernel_stack(&mut self.heap, &self.config) {
            Ok(stack) => stack,
            Err(error) => {
                self.task_ids.release(id);
                return Err(error);
            }
        };

        let process = self.processes.get_mut(pid)?;
        let user_stack = match map_user_stack(&mut self.heap, &self.config, &mut process.space) {
            Ok(stack) => stack,
            Err(error) => {
                self.heap.free(kernel_stack.base());
                self.task_ids.release(id);
                return Err(error);
            }
        };

        let registers = user_registers(entry, user_stack.top());
        let handle = self.tasks.insert(Task::new(
            TaskId::new(id),
            Some(pid),
            registers,
            Some(kernel_stack),
            Some(user_stack),
        ));
        if let Err(error) = process.tasks.push_back(&mut self.tasks, handle) {
            panic!("fresh task {id} already in a process list: {error}");
        }

        log::debug!("created task {id} in process {pid}, entry {entry}");
        Ok(handle)
    }

    /// Unlinks a task from its queue and process, then frees its stacks and id.
    ///
    /// The running task and the idle task cannot be disposed.
    pub fn task_dispose(&mut self, handle: TaskHandle) -> KernelResult<()> {
        if handle == self.scheduler.current() || handle == self.scheduler.idle() {
            return Err(KernelError::InvalidArgument);
        }

        let task = self.tasks.get(handle)?;
        let (id, queue, pid, user_stack) =
            (task.id(), task.queue(), task.process(), task.user_stack());

        if let Some(tag) = queue {
            match self.scheduler.queue_mut(tag) {
                Some(queue) => queue.remove(&mut self.tasks, handle)?,
                None => panic!("task {id} parked on missing queue {tag:?}"),
            }
        }

        if let Some(pid) = pid {
            let process = self.processes.get_mut(pid)?;
            process.tasks.remove(&mut self.tasks, handle)?;
            if let Some(stack) = user_stack {
                let removed =
                    process
                        .space
                        .vma_remove(&mut self.heap, stack.bottom(), stack.memory().size());
                if let Err(error) = removed {
                    log::warn!("user stack of process {pid} was not mapped: {error}");
                }
            }
        }

        let task = self.tasks.remove(handle)?;
        if let Some(stack) = task.kernel_stack() {
            self.heap.free(stack.base());
        }
        if let Some(stack) = task.user_stack() {
            self.heap.free(stack.memory().base());
        }
        self.task_ids.release(id.as_u32());
        log::debug!("disposed task {id}");
        Ok(())
    }

    /// Moves a task to `Running`, `Waiting` or `Finished`.
    ///
    /// Any other target state, or a move the task state machine forbids, is
    /// rejected. Queue membership is left to the caller.
    pub fn task_set_state(&mut self, handle: TaskHandle, state: TaskState) -> KernelResult<()> {
        if !matches!(
            state,
            TaskState::Running | TaskState::Waiting | TaskState::Finished
        ) {
            return Err(KernelError::InvalidArgument);
        }
        let task = self.tasks.get_mut(handle)?;
        if !task.state().can_transition_to(state) {
            return Err(KernelError::InvalidArgument);
        }
        task.transition(state);
        Ok(())
    }
}
