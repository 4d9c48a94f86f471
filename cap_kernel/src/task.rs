//! Tasks and the task arena.
//!
//! A task's scheduling state lives in the scheduler; everything else —
//! domain membership, parent/child links, the attached blocker, the
//! pending wake result, the exit record — lives here. Links between tasks
//! are identifiers, never owning references, so tearing one task down
//! never chases pointers.

use core_types::{ObjectId, TaskId};
use kernel_api::{SysError, SyscallReturn};
use std::collections::HashMap;

use crate::blocker::Blocker;

/// The initial register context recorded by `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartContext {
    pub ip: u64,
    pub sp: u64,
    pub args: [u64; 3],
}

/// A finished task's exit record.
#[derive(Debug, Clone, Copy)]
pub struct ExitStatus {
    pub value: u64,
    /// Set once a waiter has claimed the value through the wait engine.
    pub claimed: bool,
}

/// One task.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    /// The registry object representing this task.
    object: ObjectId,
    /// The domain the task executes in.
    domain: ObjectId,
    /// The address space the task executes in (one counted reference).
    space: ObjectId,
    parent: Option<TaskId>,
    children: Vec<TaskId>,
    start: Option<StartContext>,
    blocker: Option<Blocker>,
    /// The result of the syscall the task blocked in, delivered on wake.
    wake: Option<Result<SyscallReturn, SysError>>,
    exit: Option<ExitStatus>,
}

impl Task {
    pub fn new(
        id: TaskId,
        object: ObjectId,
        domain: ObjectId,
        space: ObjectId,
        parent: Option<TaskId>,
    ) -> Self {
        Self {
            id,
            object,
            domain,
            space,
            parent,
            children: Vec::new(),
            start: None,
            blocker: None,
            wake: None,
            exit: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn domain(&self) -> ObjectId {
        self.domain
    }

    pub fn space(&self) -> ObjectId {
        self.space
    }

    pub fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    pub fn clear_parent(&mut self) {
        self.parent = None;
    }

    pub fn children(&self) -> &[TaskId] {
        &self.children
    }

    pub fn add_child(&mut self, child: TaskId) {
        self.children.push(child);
    }

    pub fn remove_child(&mut self, child: TaskId) {
        self.children.retain(|&id| id != child);
    }

    pub fn start_context(&self) -> Option<&StartContext> {
        self.start.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.start.is_some()
    }

    pub fn set_start_context(&mut self, context: StartContext) {
        self.start = Some(context);
    }

    pub fn blocker(&self) -> Option<&Blocker> {
        self.blocker.as_ref()
    }

    /// Attaches a blocker. At most one blocker per task; attaching over an
    /// existing one is a kernel bug.
    pub fn attach_blocker(&mut self, blocker: Blocker) {
        debug_assert!(self.blocker.is_none());
        self.blocker = Some(blocker);
    }

    pub fn take_blocker(&mut self) -> Option<Blocker> {
        self.blocker.take()
    }

    pub fn set_wake(&mut self, result: Result<SyscallReturn, SysError>) {
        self.wake = Some(result);
    }

    pub fn take_wake(&mut self) -> Option<Result<SyscallReturn, SysError>> {
        self.wake.take()
    }

    pub fn exit(&self) -> Option<&ExitStatus> {
        self.exit.as_ref()
    }

    pub fn set_exit(&mut self, value: u64) {
        self.exit = Some(ExitStatus {
            value,
            claimed: false,
        });
    }

    /// Marks the exit value claimed; returns false if it already was.
    pub fn claim_exit(&mut self) -> bool {
        match self.exit.as_mut() {
            Some(status) if !status.claimed => {
                status.claimed = true;
                true
            }
            _ => false,
        }
    }
}

/// All live tasks, keyed by id.
#[derive(Debug, Default)]
pub struct TaskArena {
    tasks: HashMap<TaskId, Task>,
}

impl TaskArena {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.id(), task);
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        self.tasks.remove(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(
            TaskId::new(),
            ObjectId::new(),
            ObjectId::new(),
            ObjectId::new(),
            None,
        )
    }

    #[test]
    fn test_exit_claimed_once() {
        let mut task = task();
        assert!(task.claim_exit() == false);

        task.set_exit(7);
        assert!(task.claim_exit());
        assert!(!task.claim_exit());
        assert_eq!(task.exit().unwrap().value, 7);
    }

    #[test]
    fn test_child_links() {
        let mut parent = task();
        let child = TaskId::new();
        parent.add_child(child);
        assert_eq!(parent.children(), &[child]);
        parent.remove_child(child);
        assert!(parent.children().is_empty());
    }

    #[test]
    fn test_wake_is_taken_once() {
        let mut task = task();
        task.set_wake(Ok(SyscallReturn::None));
        assert!(task.take_wake().is_some());
        assert!(task.take_wake().is_none());
    }
}
