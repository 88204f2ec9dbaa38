//! Index-based intrusive task lists.
//!
//! A task holds one [`Link`] per [`LinkRole`]; a list only stores its head, tail
//! and count, and walks the links stored in the [`TaskTable`]. Each link records
//! which list owns it, so a task can be in at most one list per role.

use super::{TaskHandle, TaskTable};
use crate::error::{KernelError, KernelResult};
use crate::process::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WaitQueueId(pub u32);

/// The two independent memberships a task can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Membership in the owning process's task list.
    Process = 0,
    /// Membership in a scheduler or wait queue.
    Queue = 1,
}

/// Identity of a list instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListTag {
    Process(Pid),
    Ready,
    Terminate,
    Wait(WaitQueueId),
}

impl ListTag {
    pub fn role(self) -> LinkRole {
        match self {
            ListTag::Process(_) => LinkRole::Process,
            _ => LinkRole::Queue,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Link {
    prev: Option<TaskHandle>,
    next: Option<TaskHandle>,
    owner: Option<ListTag>,
}

impl Link {
    pub fn owner(&self) -> Option<ListTag> {
        self.owner
    }
}

/// A doubly-linked list of tasks threaded through one link role.
#[derive(Debug)]
pub struct TaskList {
    tag: ListTag,
    head: Option<TaskHandle>,
    tail: Option<TaskHandle>,
    count: usize,
}

impl TaskList {
    pub const fn new(tag: ListTag) -> Self {
        Self {
            tag,
            head: None,
            tail: None,
            count: 0,
        }
    }

    pub fn tag(&self) -> ListTag {
        self.tag
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0 && self.head.is_none()
    }

    pub fn head(&self) -> Option<TaskHandle> {
        self.head
    }

    pub fn tail(&self) -> Option<TaskHandle> {
        self.tail
    }

    pub fn contains(&self, tasks: &TaskTable, handle: TaskHandle) -> bool {
        tasks
            .get(handle)
            .is_ok_and(|task| task.link(self.tag.role()).owner == Some(self.tag))
    }

    /// Appends a task that is not yet in any list of this role.
    pub fn push_back(&mut self, tasks: &mut TaskTable, handle: TaskHandle) -> KernelResult<()> {
        let role = self.tag.role();
        let link = tasks.get_mut(handle)?.link_mut(role);
        if link.owner.is_some() {
            return Err(KernelError::InvalidArgument);
        }
        *link = Link {
            prev: self.tail,
            next: None,
            owner: Some(self.tag),
        };

        match self.tail {
            Some(tail) => tasks.link_mut(tail, role).next = Some(handle),
            None => self.head = Some(handle),
        }
        self.tail = Some(handle);
        self.count += 1;
        Ok(())
    }

    pub fn pop_front(&mut self, tasks: &mut TaskTable) -> Option<TaskHandle> {
        let head = self.head?;
        self.unlink(tasks, head);
        Some(head)
    }

    /// Removes `handle` from this list.
    pub fn remove(&mut self, tasks: &mut TaskTable, handle: TaskHandle) -> KernelResult<()> {
        if !self.contains(tasks, handle) {
            return Err(KernelError::NotFound);
        }
        self.unlink(tasks, handle);
        Ok(())
    }

    fn unlink(&mut self, tasks: &mut TaskTable, handle: TaskHandle) {
        let role = self.tag.role();
        let link = core::mem::take(tasks.link_mut(handle, role));

        match link.prev {
            Some(prev) => tasks.link_mut(prev, role).next = link.next,
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => tasks.link_mut(next, role).prev = link.prev,
            None => self.tail = link.prev,
        }
        self.count -= 1;
    }

    /// Handles in list order.
    pub fn iter<'a>(&self, tasks: &'a TaskTable) -> impl Iterator<Item = TaskHandle> + use<'a> {
        let role = self.tag.role();
        core::iter::successors(self.head, move |&handle| tasks.link(handle, role).next)
    }
}

/// A FIFO of tasks: the ready queue, the terminate queue, or a wait queue.
#[derive(Debug)]
pub struct TaskQueue(TaskList);

impl TaskQueue {
    pub const fn new(tag: ListTag) -> Self {
        Self(TaskList::new(tag))
    }

    pub fn tag(&self) -> ListTag {
        self.0.tag()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn head(&self) -> Option<TaskHandle> {
        self.0.head()
    }

    pub fn enqueue(&mut self, tasks: &mut TaskTable, handle: TaskHandle) -> KernelResult<()> {
        self.0.push_back(tasks, handle)
    }

    pub fn dequeue(&mut self, tasks: &mut TaskTable) -> Option<TaskHandle> {
        self.0.pop_front(tasks)
    }

    pub fn remove(&mut self, tasks: &mut TaskTable, handle: TaskHandle) -> KernelResult<()> {
        self.0.remove(tasks, handle)
    }

    pub fn contains(&self, tasks: &TaskTable, handle: TaskHandle) -> bool {
        self.0.contains(tasks, handle)
    }

    pub fn iter<'a>(&self, tasks: &'a TaskTable) -> impl Iterator<Item = TaskHandle> + use<'a> {
        self.0.iter(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Registers, Task, TaskId};
    use alloc::vec::Vec;
    use proptest::prelude::*;

    fn spawn(tasks: &mut TaskTable, id: u32) -> TaskHandle {
        tasks.insert(Task::new(TaskId::new(id), None, Registers::default(), None, None))
    }

    #[test]
    fn fifo_order_and_empty_afterwards() {
        let mut tasks = TaskTable::new();
        let mut ready = TaskQueue::new(ListTag::Ready);
        let a = spawn(&mut tasks, 1);
        let b = spawn(&mut tasks, 2);
        let c = spawn(&mut tasks, 3);

        for handle in [a, b, c] {
            ready.enqueue(&mut tasks, handle).unwrap();
        }
        assert_eq!(ready.len(), 3);

        assert_eq!(ready.dequeue(&mut tasks), Some(a));
        assert_eq!(ready.dequeue(&mut tasks), Some(b));
        assert_eq!(ready.dequeue(&mut tasks), Some(c));
        assert_eq!(ready.len(), 0);
        assert!(ready.head().is_none());
        assert!(ready.is_empty());
        assert_eq!(ready.dequeue(&mut tasks), None);
    }

    #[test]
    fn one_queue_at_a_time() {
        let mut tasks = TaskTable::new();
        let mut ready = TaskQueue::new(ListTag::Ready);
        let mut terminate = TaskQueue::new(ListTag::Terminate);
        let a = spawn(&mut tasks, 1);

        ready.enqueue(&mut tasks, a).unwrap();
        assert_eq!(
            terminate.enqueue(&mut tasks, a),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(tasks.get(a).unwrap().queue(), Some(ListTag::Ready));

        ready.remove(&mut tasks, a).unwrap();
        terminate.enqueue(&mut tasks, a).unwrap();
        assert_eq!(tasks.get(a).unwrap().queue(), Some(ListTag::Terminate));
    }

    #[test]
    fn roles_are_independent() {
        let mut tasks = TaskTable::new();
        let mut members = TaskList::new(ListTag::Process(Pid::new(1)));
        let mut ready = TaskQueue::new(ListTag::Ready);
        let a = spawn(&mut tasks, 1);
        let b = spawn(&mut tasks, 2);

        members.push_back(&mut tasks, a).unwrap();
        members.push_back(&mut tasks, b).unwrap();
        ready.enqueue(&mut tasks, b).unwrap();
        ready.enqueue(&mut tasks, a).unwrap();

        assert_eq!(members.iter(&tasks).collect::<Vec<_>>(), [a, b]);
        assert_eq!(ready.iter(&tasks).collect::<Vec<_>>(), [b, a]);
    }

    #[test]
    fn remove_from_middle() {
        let mut tasks = TaskTable::new();
        let mut ready = TaskQueue::new(ListTag::Ready);
        let handles: Vec<_> = (1..=3).map(|id| spawn(&mut tasks, id)).collect();
        for &handle in &handles {
            ready.enqueue(&mut tasks, handle).unwrap();
        }

        ready.remove(&mut tasks, handles[1]).unwrap();
        assert_eq!(ready.iter(&tasks).collect::<Vec<_>>(), [handles[0], handles[2]]);
        assert_eq!(
            ready.remove(&mut tasks, handles[1]),
            Err(KernelError::NotFound)
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue,
        Dequeue,
    }

    proptest! {
        #[test]
        fn queue_law(ops in proptest::collection::vec(
            prop_oneof![Just(Op::Enqueue), Just(Op::Dequeue)],
            0..128,
        )) {
            let mut tasks = TaskTable::new();
            let mut queue = TaskQueue::new(ListTag::Ready);
            let mut model = std::collections::VecDeque::new();
            let mut next_id = 1;

            for op in ops {
                match op {
                    Op::Enqueue => {
                        let handle = spawn(&mut tasks, next_id);
                        next_id += 1;
                        queue.enqueue(&mut tasks, handle).unwrap();
                        model.push_back(handle);
                    }
                    Op::Dequeue => {
                        prop_assert_eq!(queue.dequeue(&mut tasks), model.pop_front());
                    }
                }
                prop_assert_eq!(queue.len(), queue.iter(&tasks).count());
                prop_assert_eq!(queue.len(), model.len());
                prop_assert_eq!(queue.is_empty(), model.is_empty());
            }
        }
    }
}
