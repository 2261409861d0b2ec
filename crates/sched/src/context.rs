//! Handle passed to task callbacks for talking to the rest of the runtime.

use kestrel_core::{MessageId, TaskId, ThreadId};
use kestrel_fabric::{Block, Cell, MessageFlags, MessageWriter};

use crate::dispatch;
use crate::router::Router;
use crate::task::{Task, TaskStatus};

/// Messaging surface for the task currently being run.
///
/// Everything sent through a context is stamped with the running task's id
/// as its source and goes out through the owning TaskMaster's queues.
pub struct TaskContext<'a> {
    router: &'a mut Router,
    task_id: TaskId,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(router: &'a mut Router, task_id: TaskId) -> Self {
        Self { router, task_id }
    }

    /// Id of the task being run (or the TaskMaster's thread id for
    /// subsystems and external callers).
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn thread_id(&self) -> ThreadId {
        self.router.thread_id()
    }

    pub fn thread_count(&self) -> usize {
        self.router.thread_count()
    }

    /// Last known owner of `task`.
    pub fn owner_of(&self, task: TaskId) -> Option<ThreadId> {
        self.router.owner_of(task)
    }

    pub fn is_target_on_same_taskmaster(&self, target: TaskId) -> bool {
        dispatch::is_target_on_same_taskmaster(&*self.router, target)
    }

    pub fn send(
        &mut self,
        msg_id: MessageId,
        target: TaskId,
        payload: impl Into<Cell>,
        blocks: &[Block],
    ) {
        self.send_flagged(msg_id, MessageFlags::NONE, target, payload, blocks);
    }

    pub fn send_flagged(
        &mut self,
        msg_id: MessageId,
        flags: MessageFlags,
        target: TaskId,
        payload: impl Into<Cell>,
        blocks: &[Block],
    ) {
        let payload = payload.into();
        dispatch::send_message(self.router, msg_id, flags, self.task_id, target, payload, blocks);
    }

    /// Send a message whose `block_count` payload blocks are written in
    /// place by `fill`.
    pub fn send_with(
        &mut self,
        msg_id: MessageId,
        target: TaskId,
        payload: impl Into<Cell>,
        block_count: usize,
        fill: impl FnOnce(&mut MessageWriter<'_>),
    ) {
        dispatch::send_message_with(
            self.router,
            msg_id,
            MessageFlags::NONE,
            self.task_id,
            target,
            payload.into(),
            block_count,
            fill,
        );
    }

    pub fn broadcast(&mut self, msg_id: MessageId, payload: impl Into<Cell>, blocks: &[Block]) {
        dispatch::broadcast_message(
            self.router,
            msg_id,
            MessageFlags::NONE,
            self.task_id,
            payload.into(),
            blocks,
        );
    }

    /// Schedule `task` on this TaskMaster.
    pub fn insert_task(&mut self, task: Task) -> TaskId {
        let thread = self.thread_id();
        self.insert_task_on(thread, task)
    }

    /// Schedule `task` on TaskMaster `thread`.
    pub fn insert_task_on(&mut self, thread: ThreadId, task: Task) -> TaskId {
        let id = task.id();
        dispatch::insert_task(self.router, self.task_id, thread, task);
        id
    }

    pub fn request_set_task_owner(&mut self, task: TaskId, new_owner: ThreadId) {
        dispatch::request_set_task_owner(self.router, self.task_id, task, new_owner);
    }

    pub fn request_set_parent(&mut self, child: TaskId, parent: TaskId) {
        dispatch::request_set_parent(self.router, self.task_id, child, parent);
    }

    pub fn remove_task(&mut self, task: TaskId) {
        dispatch::remove_task(self.router, self.task_id, task);
    }

    pub fn set_task_status(&mut self, task: TaskId, status: TaskStatus) {
        dispatch::set_task_status(self.router, self.task_id, task, status);
    }

    /// Start a runtime-wide shutdown from this TaskMaster.
    pub fn fin(&mut self) {
        let thread = self.thread_id();
        dispatch::fin(self.router, self.task_id, thread);
    }

    pub fn toggle_pause(&mut self) {
        dispatch::toggle_pause(self.router, self.task_id);
    }

    pub fn register_mutable_dependency(&self, target: TaskId) {
        dispatch::register_mutable_dependency(self.task_id, target);
    }

    pub fn deregister_mutable_dependency(&self, target: TaskId) {
        dispatch::deregister_mutable_dependency(self.task_id, target);
    }
}
