//! Scheduling: the ready, terminate and wait queues, the idle task, and the
//! operations that move tasks between them.
//!
//! Scheduling stays inert until [`Kernel::scheduler_start`]; before that,
//! [`Kernel::schedule`] and the timer tick never switch.

mod dispatcher;

use alloc::collections::BTreeMap;

use mm::KernelHeap;

pub use dispatcher::Dispatch;

use crate::error::{KernelError, KernelResult};
use crate::interrupts::{InterruptRegistry, InterruptVector};
use crate::kernel::Kernel;
use crate::task::{ListTag, Registers, TaskHandle, TaskQueue, TaskState, WaitQueueId};

#[derive(Debug)]
pub struct Scheduler {
    idle: TaskHandle,
    current: TaskHandle,
    ready: TaskQueue,
    terminate: TaskQueue,
    waits: BTreeMap<WaitQueueId, TaskQueue>,
    next_wait: u32,
    active: bool,
    ticks: u64,
}

impl Scheduler {
    /// Creates a scheduler whose running context is the idle task.
    pub(crate) fn new(idle: TaskHandle) -> Self {
        Self {
            idle,
            current: idle,
            ready: TaskQueue::new(ListTag::Ready),
            terminate: TaskQueue::new(ListTag::Terminate),
            waits: BTreeMap::new(),
            next_wait: 0,
            active: false,
            ticks: 0,
        }
    }

    pub fn idle(&self) -> TaskHandle {
        self.idle
    }

    /// The task whose context is on the processor.
    pub fn current(&self) -> TaskHandle {
        self.current
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Timer interrupts seen since scheduling started.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn ready(&self) -> &TaskQueue {
        &self.ready
    }

    pub fn terminate(&self) -> &TaskQueue {
        &self.terminate
    }

    pub fn wait_queue(&self, id: WaitQueueId) -> Option<&TaskQueue> {
        self.waits.get(&id)
    }

    pub(crate) fn queue_mut(&mut self, tag: ListTag) -> Option<&mut TaskQueue> {
        match tag {
            ListTag::Ready => Some(&mut self.ready),
            ListTag::Terminate => Some(&mut self.terminate),
            ListTag::Wait(id) => self.waits.get_mut(&id),
            ListTag::Process(_) => None,
        }
    }
}

impl<H: KernelHeap> Kernel<H> {
    /// Marks a task `Ready` and appends it to the ready queue.
    ///
    /// Accepts new tasks, tasks taken off the ready queue, and waiting tasks,
    /// which are first removed from their wait queue.
    pub fn scheduler_add_task(&mut self, handle: TaskHandle) -> KernelResult<()> {
        if handle == self.scheduler.idle {
            return Err(KernelError::InvalidArgument);
        }
        let task = self.tasks.get(handle)?;
        let (state, queue) = (task.state(), task.queue());

        match (state, queue) {
            (TaskState::New, None) => {}
            (TaskState::Ready, None) => {}
            (TaskState::Waiting, Some(tag @ ListTag::Wait(_))) => {
                if let Some(queue) = self.scheduler.queue_mut(tag) {
                    queue.remove(&mut self.tasks, handle)?;
                }
            }
            (TaskState::Waiting, None) => {}
            _ => return Err(KernelError::InvalidArgument),
        }

        let task = self.tasks.get_mut(handle)?;
        if task.state() != TaskState::Ready {
            task.transition(TaskState::Ready);
        }
        self.scheduler.ready.enqueue(&mut self.tasks, handle)?;
        log::trace!("task {handle:?} ready");
        Ok(())
    }

    /// Takes a task off whichever queue holds it.
    pub fn scheduler_remove_task(&mut self, handle: TaskHandle) -> KernelResult<()> {
        let tag = self.tasks.get(handle)?.queue().ok_or(KernelError::NotFound)?;
        self.scheduler
            .queue_mut(tag)
            .ok_or(KernelError::NotFound)?
            .remove(&mut self.tasks, handle)
    }

    /// Head of the ready queue, or the idle task if nothing is ready.
    pub fn scheduler_pick_next(&mut self) -> TaskHandle {
        self.scheduler
            .ready
            .dequeue(&mut self.tasks)
            .unwrap_or(self.scheduler.idle)
    }

    /// Gives up the processor to the next ready task.
    ///
    /// The current task's registers must already be saved.
    pub fn schedule(&mut self) -> Dispatch {
        if !self.scheduler.active {
            return Dispatch::Stay;
        }
        let next = self.scheduler_pick_next();
        self.switch_to(next)
    }

    /// Starts routing the timer and page faults to the kernel and turns
    /// scheduling on.
    pub fn scheduler_start(&mut self, registry: &mut dyn InterruptRegistry) -> KernelResult<()> {
        if self.scheduler.active {
            return Err(KernelError::InvalidArgument);
        }
        registry.register(InterruptVector::TIMER)?;
        registry.register(InterruptVector::PAGE_FAULT)?;
        self.scheduler.active = true;
        log::info!("scheduler started, {} tasks ready", self.scheduler.ready.len());
        Ok(())
    }

    /// Records where the current task stopped.
    pub fn save_current(&mut self, registers: Registers) {
        let current = self.scheduler.current;
        match self.tasks.get_mut(current) {
            Ok(task) => *task.registers_mut() = registers,
            Err(_) => panic!("current task {current:?} vanished"),
        }
    }

    /// Preempts the current task.
    pub fn timer_tick(&mut self, registers: Registers) -> Dispatch {
        if !self.scheduler.active {
            return Dispatch::Stay;
        }
        self.scheduler.ticks += 1;
        self.save_current(registers);
        self.schedule()
    }

    pub fn create_wait_queue(&mut self) -> WaitQueueId {
        let id = WaitQueueId(self.scheduler.next_wait);
        self.scheduler.next_wait = self.scheduler.next_wait.wrapping_add(1);
        self.scheduler
            .waits
            .insert(id, TaskQueue::new(ListTag::Wait(id)));
        id
    }

    /// Drops an empty wait queue.
    pub fn destroy_wait_queue(&mut self, id: WaitQueueId) -> KernelResult<()> {
        let queue = self.scheduler.waits.get(&id).ok_or(KernelError::NotFound)?;
        if !queue.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        self.scheduler.waits.remove(&id);
        Ok(())
    }

    /// Marks the current task `Waiting` and parks it on `queue` without
    /// switching away. A yield must follow.
    pub fn park_current(&mut self, queue: WaitQueueId) -> KernelResult<()> {
        let current = self.scheduler.current;
        if current == self.scheduler.idle {
            return Err(KernelError::InvalidArgument);
        }
        if !self.scheduler.waits.contains_key(&queue) {
            return Err(KernelError::NotFound);
        }

        self.task_set_state(current, TaskState::Waiting)?;
        let parked = self
            .scheduler
            .queue_mut(ListTag::Wait(queue))
            .map(|waits| waits.enqueue(&mut self.tasks, current));
        match parked {
            Some(Ok(())) => Ok(()),
            _ => panic!("cannot park task {current:?} on wait queue {queue:?}"),
        }
    }

    /// Parks the current task on `queue` and switches away.
    pub fn block_current(&mut self, queue: WaitQueueId) -> KernelResult<Dispatch> {
        if !self.scheduler.active {
            return Err(KernelError::InvalidArgument);
        }
        self.park_current(queue)?;
        Ok(self.schedule())
    }

    /// Moves the oldest waiter on `queue` to the ready queue.
    pub fn wake_one(&mut self, queue: WaitQueueId) -> KernelResult<Option<TaskHandle>> {
        let waiter = self
            .scheduler
            .waits
            .get_mut(&queue)
            .ok_or(KernelError::NotFound)?
            .dequeue(&mut self.tasks);
        if let Some(handle) = waiter {
            self.scheduler_add_task(handle)?;
        }
        Ok(waiter)
    }

    /// Moves every waiter on `queue` to the ready queue, returning how many.
    pub fn wake_all(&mut self, queue: WaitQueueId) -> KernelResult<usize> {
        let mut woken = 0;
        while self.wake_one(queue)?.is_some() {
            woken += 1;
        }
        Ok(woken)
    }

    /// Finishes the current task and switches away. Its resources are freed by
    /// the next [`reap`](Self::reap).
    pub fn exit_current(&mut self) -> KernelResult<Dispatch> {
        if !self.scheduler.active || self.scheduler.current == self.scheduler.idle {
            return Err(KernelError::InvalidArgument);
        }
        self.task_set_state(self.scheduler.current, TaskState::Finished)?;
        Ok(self.schedule())
    }

    /// Finishes the current task after an unrecoverable fault.
    pub(crate) fn terminate_current(&mut self) -> Dispatch {
        let current = self.scheduler.current;
        assert!(
            current != self.scheduler.idle,
            "idle task cannot be terminated"
        );
        assert!(self.scheduler.active, "task fault before scheduling started");
        if let Err(error) = self.task_set_state(current, TaskState::Finished) {
            panic!("cannot finish faulting task {current:?}: {error}");
        }
        self.schedule()
    }

    /// Disposes finished tasks, terminates processes they leave empty, and
    /// frees kernel stacks retired by exec. Returns the number of tasks reaped.
    ///
    /// Must not run on a kernel stack that is about to be freed.
    pub fn reap(&mut self) -> usize {
        let mut reaped = 0;
        while let Some(handle) = self.scheduler.terminate.dequeue(&mut self.tasks) {
            let pid = self.tasks.get(handle).ok().and_then(|task| task.process());
            if let Err(error) = self.task_dispose(handle) {
                panic!("cannot reap finished task {handle:?}: {error}");
            }
            reaped += 1;

            let orphaned = pid.filter(|&pid| {
                self.processes
                    .get(pid)
                    .is_ok_and(|process| process.task_count() == 0)
            });
            if let Some(pid) = orphaned {
                if let Err(error) = self.process_terminate(pid) {
                    log::warn!("process {pid} left without tasks was not terminated: {error}");
                }
            }
        }

        for stack in self.retired_stacks.drain(..) {
            self.heap.free(stack.base());
        }
        if reaped > 0 {
            log::debug!("reaped {reaped} tasks");
        }
        reaped
    }
}
