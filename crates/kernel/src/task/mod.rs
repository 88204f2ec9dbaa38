//! Tasks: the schedulable execution contexts of the kernel.
//!
//! Tasks live in a [`TaskTable`] arena and are named by generation-checked
//! [`TaskHandle`]s. Each task carries two independent list links, one for its
//! process's task list and one for whichever scheduler queue holds it.

mod id;
mod list;
mod table;

use core::fmt;

use mm::{PhysicalAddress, VirtualAddress};

pub use id::IdAllocator;
pub use list::{Link, LinkRole, ListTag, TaskList, TaskQueue, WaitQueueId};
pub use table::{TaskHandle, TaskTable};

use crate::process::Pid;

/// Numeric task identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TaskId(u32);

impl TaskId {
    /// The idle task.
    pub const IDLE: Self = Self(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything needed to resume a task where it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Registers {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub eip: u32,
    pub esp: u32,
    pub eflags: u32,
    pub cs: u32,
    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,
    pub ss: u32,
}

impl Registers {
    /// Returns true if these registers resume in ring 3.
    pub fn is_user(&self) -> bool {
        self.cs & 3 == 3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    New,
    Ready,
    Running,
    Waiting,
    Finished,
}

impl TaskState {
    /// Returns true if a task may move from `self` to `next`.
    ///
    /// Valid lifecycles follow `New -> Ready -> Running -> (Waiting -> Ready)* -> Finished`,
    /// with `Running -> Ready` on preemption.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (New, Ready)
                | (Ready, Running)
                | (Running, Ready)
                | (Running, Waiting)
                | (Running, Finished)
                | (Waiting, Ready)
        )
    }
}

/// A block of kernel heap memory used as a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stack {
    base: PhysicalAddress,
    size: usize,
}

impl Stack {
    pub fn new(base: PhysicalAddress, size: usize) -> Self {
        Self { base, size }
    }

    pub fn base(&self) -> PhysicalAddress {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// One past the highest byte, where a downward stack starts.
    pub fn top(&self) -> PhysicalAddress {
        self.base + self.size
    }
}

/// A user stack: heap-backed memory mapped below `top` in the process address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserStack {
    memory: Stack,
    top: VirtualAddress,
}

impl UserStack {
    pub fn new(memory: Stack, top: VirtualAddress) -> Self {
        Self { memory, top }
    }

    pub fn memory(&self) -> Stack {
        self.memory
    }

    pub fn top(&self) -> VirtualAddress {
        self.top
    }

    /// Lowest mapped address.
    pub fn bottom(&self) -> VirtualAddress {
        self.top - self.memory.size
    }
}

#[derive(Debug)]
pub struct Task {
    id: TaskId,
    registers: Registers,
    /// Back-reference only; the process table owns processes.
    process: Option<Pid>,
    kernel_stack: Option<Stack>,
    user_stack: Option<UserStack>,
    state: TaskState,
    priority: u8,
    links: [Link; 2],
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        process: Option<Pid>,
        registers: Registers,
        kernel_stack: Option<Stack>,
        user_stack: Option<UserStack>,
    ) -> Self {
        Self {
            id,
            registers,
            process,
            kernel_stack,
            user_stack,
            state: TaskState::New,
            priority: 0,
            links: [Link::default(); 2],
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub(crate) fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn process(&self) -> Option<Pid> {
        self.process
    }

    pub fn kernel_stack(&self) -> Option<Stack> {
        self.kernel_stack
    }

    pub fn user_stack(&self) -> Option<UserStack> {
        self.user_stack
    }

    /// Swaps in new stacks, returning the old ones.
    pub(crate) fn replace_stacks(
        &mut self,
        kernel_stack: Option<Stack>,
        user_stack: Option<UserStack>,
    ) -> (Option<Stack>, Option<UserStack>) {
        let old_kernel = core::mem::replace(&mut self.kernel_stack, kernel_stack);
        let old_user = core::mem::replace(&mut self.user_stack, user_stack);
        (old_kernel, old_user)
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Moves the task to `state`, panicking on a transition the state machine forbids.
    pub(crate) fn transition(&mut self, state: TaskState) {
        assert!(
            self.state.can_transition_to(state),
            "task {} cannot move from {:?} to {:?}",
            self.id,
            self.state,
            state
        );
        self.state = state;
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    /// The scheduler queue currently holding this task.
    pub fn queue(&self) -> Option<ListTag> {
        self.links[LinkRole::Queue as usize].owner()
    }

    pub(crate) fn link(&self, role: LinkRole) -> &Link {
        &self.links[role as usize]
    }

    pub(crate) fn link_mut(&mut self, role: LinkRole) -> &mut Link {
        &mut self.links[role as usize]
    }
}
