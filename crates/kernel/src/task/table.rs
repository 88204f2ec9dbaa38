use alloc::vec::Vec;

use super::{LinkRole, Link, Task, TaskId};
use crate::error::{KernelError, KernelResult};

/// A stable, generation-checked reference to a task in a [`TaskTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    task: Option<Task>,
}

/// Arena owning every task of a kernel instance.
///
/// Removing a task bumps its slot's generation, so handles to it go stale
/// instead of silently naming whichever task reuses the slot.
#[derive(Default)]
pub struct TaskTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, task: Task) -> TaskHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.task = Some(task);
            return TaskHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            task: Some(task),
        });
        TaskHandle {
            index,
            generation: 0,
        }
    }

    pub fn remove(&mut self, handle: TaskHandle) -> KernelResult<Task> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(KernelError::NullReference)?;
        let task = slot.task.take().ok_or(KernelError::NullReference)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Ok(task)
    }

    pub fn get(&self, handle: TaskHandle) -> KernelResult<&Task> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.task.as_ref())
            .ok_or(KernelError::NullReference)
    }

    pub fn get_mut(&mut self, handle: TaskHandle) -> KernelResult<&mut Task> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.task.as_mut())
            .ok_or(KernelError::NullReference)
    }

    pub fn contains(&self, handle: TaskHandle) -> bool {
        self.get(handle).is_ok()
    }

    /// Finds the live task with the given id.
    pub fn find(&self, id: TaskId) -> Option<TaskHandle> {
        self.iter()
            .find(|(_, task)| task.id() == id)
            .map(|(handle, _)| handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskHandle, &Task)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.task.as_ref().map(|task| {
                (
                    TaskHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    task,
                )
            })
        })
    }

    /// Link of a task that some list is known to hold.
    ///
    /// A list holding a stale handle means the lists and the arena disagree,
    /// which the kernel cannot recover from.
    pub(crate) fn link(&self, handle: TaskHandle, role: LinkRole) -> &Link {
        match self.get(handle) {
            Ok(task) => task.link(role),
            Err(_) => panic!("task list holds stale handle {handle:?}"),
        }
    }

    pub(crate) fn link_mut(&mut self, handle: TaskHandle, role: LinkRole) -> &mut Link {
        match self.get_mut(handle) {
            Ok(task) => task.link_mut(role),
            Err(_) => panic!("task list holds stale handle {handle:?}"),
        }
    }
}
