//! The switch protocol.
//!
//! Switching never transfers control itself. [`Kernel::switch_to`] updates
//! task states, queues and the active address space, then tells the caller
//! which saved context to resume; the interrupt glue performs the actual
//! transfer after releasing the kernel.

use mm::KernelHeap;

use crate::kernel::Kernel;
use crate::task::{ListTag, TaskHandle, TaskState};

/// What the interrupted processor should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Dispatch {
    /// Return to the interrupted context.
    Stay,
    /// Abandon the interrupted context and resume this task's saved registers.
    Resume(TaskHandle),
}

impl<H: KernelHeap> Kernel<H> {
    pub(crate) fn switch_to(&mut self, next: TaskHandle) -> Dispatch {
        let prev = self.scheduler.current;
        if prev == next {
            // Woken before it yielded, then taken straight back off the ready queue.
            if self.tasks.get(prev).is_ok_and(|task| task.state() == TaskState::Ready) {
                self.set_state(prev, TaskState::Running);
            }
            return Dispatch::Stay;
        }

        let idle = self.scheduler.idle;
        let Ok(prev_task) = self.tasks.get(prev) else {
            panic!("current task {prev:?} vanished");
        };
        let (prev_id, prev_state, prev_queue) = (prev_task.id(), prev_task.state(), prev_task.queue());

        if next == idle && matches!(prev_state, TaskState::Running | TaskState::Ready) {
            log::warn!("refusing to switch runnable task {prev_id} to idle");
            return Dispatch::Stay;
        }

        if prev == idle {
            if prev_state == TaskState::Running {
                self.set_state(prev, TaskState::Ready);
            }
        } else {
            match prev_state {
                TaskState::Running => {
                    self.set_state(prev, TaskState::Ready);
                    self.park(ListTag::Ready, prev);
                }
                TaskState::Ready if prev_queue.is_none() => self.park(ListTag::Ready, prev),
                TaskState::Ready => {}
                TaskState::Finished => self.park(ListTag::Terminate, prev),
                TaskState::Waiting => {
                    if !matches!(prev_queue, Some(ListTag::Wait(_))) {
                        panic!("task {prev_id} is waiting on no queue");
                    }
                }
                TaskState::New => panic!("task {prev_id} was running without being scheduled"),
            }
        }

        self.set_state(next, TaskState::Running);
        self.activate(next);
        self.scheduler.current = next;
        log::trace!("switch {prev:?} -> {next:?}");
        Dispatch::Resume(next)
    }

    /// Loads the address space `handle` runs in: its process's, or the
    /// kernel's for the idle task.
    pub(crate) fn activate(&mut self, handle: TaskHandle) {
        let process = match self.tasks.get(handle) {
            Ok(task) => task.process(),
            Err(_) => panic!("activating missing task {handle:?}"),
        };
        let directory = match process {
            Some(pid) => match self.processes.get(pid) {
                Ok(process) => process.space().directory(),
                Err(_) => panic!("task {handle:?} belongs to missing process {pid}"),
            },
            None => self.kernel_space.directory(),
        };
        if let Err(error) = self.mmu.switch(directory) {
            panic!("cannot activate address space of task {handle:?}: {error}");
        }
    }

    fn set_state(&mut self, handle: TaskHandle, state: TaskState) {
        match self.tasks.get_mut(handle) {
            Ok(task) => task.transition(state),
            Err(_) => panic!("switching through missing task {handle:?}"),
        }
    }

    fn park(&mut self, tag: ListTag, handle: TaskHandle) {
        let parked = self
            .scheduler
            .queue_mut(tag)
            .map(|queue| queue.enqueue(&mut self.tasks, handle));
        if !matches!(parked, Some(Ok(()))) {
            panic!("cannot park task {handle:?} on {tag:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use mm::VirtualAddress;

    #[test]
    fn same_task_is_a_no_op() {
        let mut kernel = testing::started_kernel();
        let idle = kernel.scheduler().idle();
        let switches = kernel.mmu().switch_count();

        assert_eq!(kernel.switch_to(idle), Dispatch::Stay);
        assert_eq!(kernel.mmu().switch_count(), switches);
        assert_eq!(kernel.task(idle).unwrap().state(), TaskState::Running);
    }

    #[test]
    fn switching_back_to_active_space_does_not_reload() {
        let mut kernel = testing::started_kernel();
        let pid = kernel.process_create("p", None, &[], &[]).unwrap();
        let task = kernel.task_new(pid, VirtualAddress::new(0x0040_0000)).unwrap();
        kernel.scheduler_add_task(task).unwrap();

        let before = kernel.mmu().switch_count();
        assert_eq!(kernel.schedule(), Dispatch::Resume(task));
        assert_eq!(kernel.mmu().switch_count(), before + 1);

        kernel.activate(task);
        assert_eq!(kernel.mmu().switch_count(), before + 1);
    }

    #[test]
    #[should_panic(expected = "running without being scheduled")]
    fn new_task_cannot_be_switched_from() {
        let mut kernel = testing::started_kernel();
        let pid = kernel.process_create("p", None, &[], &[]).unwrap();
        let fresh = kernel.task_new(pid, VirtualAddress::new(0x0040_0000)).unwrap();
        let other = kernel.task_new(pid, VirtualAddress::new(0x0040_0000)).unwrap();
        kernel.scheduler_add_task(other).unwrap();

        kernel.scheduler.current = fresh;
        let next = kernel.scheduler_pick_next();
        let _ = kernel.switch_to(next);
    }
}
