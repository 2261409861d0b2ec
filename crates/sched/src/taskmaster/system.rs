//! Messages addressed to the TaskMaster itself: task insertion and removal,
//! ownership transfer, re-parenting, pause and shutdown.

use tracing::{debug, info, warn};

use kestrel_core::{msg, TaskId, ThreadId};
use kestrel_fabric::{Block, Cell, Message, MessageFlags, MessageRef};

use super::{Core, TaskMasterState};
use crate::context::TaskContext;
use crate::dispatch;
use crate::task::{MessageResult, Task, TaskStatus};

impl Core {
    pub(crate) fn handle_system(&mut self, msg: &MessageRef<'_>) -> MessageResult {
        match msg.msg_id() {
            id if id == msg::INSERT_TASK => {
                let blocks = [*msg.block(0), *msg.block(1)];
                // SAFETY: insert_task__ payloads are produced only by
                // `Task::into_blocks`, and each message is drained exactly once.
                let task = unsafe { Task::from_blocks(&blocks) };
                self.insert(task, msg.payload().u32());
            }
            id if id == msg::REMOVE_TASK => {
                self.remove(TaskId::new(msg.payload().u32()));
            }
            id if id == msg::REQUEST_SET_TASK_OWNER => {
                let [task, owner, ..] = msg.block(0).u32s();
                if let Some(owner) = self.checked_thread(owner) {
                    self.on_request_owner(TaskId::new(task), owner);
                }
            }
            id if id == msg::CONFIRM_SET_TASK_OWNER => {
                let [task, owner, generation, _] = msg.block(0).u32s();
                if let Some(owner) = self.checked_thread(owner) {
                    self.on_confirm_owner(TaskId::new(task), owner, generation);
                }
            }
            id if id == msg::REQUEST_SET_PARENT => {
                let [child, parent, ..] = msg.block(0).u32s();
                self.on_request_parent(TaskId::new(child), TaskId::new(parent));
            }
            id if id == msg::TOGGLE_PAUSE => {
                self.paused = !self.paused;
                info!(thread = %self.thread_id, paused = self.paused, "pause toggled");
            }
            id if id == msg::FIN => self.finalize(),
            id if id == msg::SHUTDOWN => self.on_shutdown(msg.source()),
            other => {
                warn!(
                    thread = %self.thread_id,
                    msg = %other,
                    source = %msg.source(),
                    "unhandled TaskMaster message"
                );
                return MessageResult::Propagate;
            }
        }
        MessageResult::Consumed
    }

    fn checked_thread(&self, raw: u32) -> Option<ThreadId> {
        let index = raw as usize;
        if index < self.router.thread_count() {
            Some(ThreadId::new(index))
        } else {
            warn!(
                thread = %self.thread_id,
                owner = raw,
                "ownership message names a nonexistent TaskMaster"
            );
            None
        }
    }

    // ── Ownership ────────────────────────────────────────────────────

    /// Take ownership of `task` locally, without telling peers. Returns
    /// false if the task was dropped instead.
    pub(crate) fn take(&mut self, mut task: Task, generation: u32) -> bool {
        let id = task.id();
        if self.state != TaskMasterState::Initialized {
            debug!(
                thread = %self.thread_id,
                task = %id,
                state = ?self.state,
                "dropping task inserted outside the frame loop"
            );
            return false;
        }
        if task.status() == TaskStatus::Initializing {
            task.set_status(TaskStatus::Running);
        }
        if let Err(duplicate) = self.owned.insert(task) {
            warn!(
                thread = %self.thread_id,
                task = %id,
                "task already owned here, dropping the duplicate"
            );
            drop(duplicate);
            return false;
        }
        self.router.set_owner(id, self.thread_id, generation);
        self.stats.tasks_inserted += 1;
        self.stats.observe_owned(self.owned.len());
        debug!(
            thread = %self.thread_id,
            task = %id,
            generation,
            owned = self.owned.len(),
            "task inserted"
        );
        true
    }

    /// Take ownership of `task` and tell every peer.
    pub(crate) fn insert(&mut self, task: Task, generation: u32) {
        let id = task.id();
        if !self.take(task, generation) {
            return;
        }
        let owner = self.thread_id.index() as u32;
        let block = Block::from_u32s([id.raw(), owner, generation, 0]);
        dispatch::broadcast_message(
            &mut self.router,
            msg::CONFIRM_SET_TASK_OWNER,
            MessageFlags::NONE,
            self.thread_id.task_id(),
            Cell::ZERO,
            &[block],
        );
    }

    /// Hand an owned task to `new_owner`. Returns false if not owned here.
    fn transfer(&mut self, id: TaskId, new_owner: ThreadId) -> bool {
        let Some(task) = self.owned.remove(id) else {
            return false;
        };
        let generation = self.router.generation_of(id).unwrap_or(0).wrapping_add(1);
        self.router.set_owner(id, new_owner, generation);
        let source = self.thread_id.task_id();
        dispatch::hand_over(&mut self.router, source, new_owner, task, generation);
        self.stats.tasks_transferred_out += 1;
        debug!(task = %id, from = %self.thread_id, to = %new_owner, generation, "task transferred");
        true
    }

    fn on_request_owner(&mut self, id: TaskId, new_owner: ThreadId) {
        if !self.owned.contains(id) {
            return;
        }
        if new_owner == self.thread_id {
            debug!(task = %id, thread = %self.thread_id, "task already owned by requested thread");
            return;
        }
        if self.state == TaskMasterState::Initialized {
            self.transfer(id, new_owner);
        }
    }

    fn on_confirm_owner(&mut self, id: TaskId, owner: ThreadId, generation: u32) {
        if !self.router.confirm_owner(id, owner, generation) {
            debug!(
                thread = %self.thread_id,
                task = %id,
                stale_owner = %owner,
                generation,
                "ignoring stale owner confirmation"
            );
        }
    }

    fn on_request_parent(&mut self, child: TaskId, parent: TaskId) {
        if !self.owned.contains(child) {
            return;
        }
        let parent_owner = if self.owned.contains(parent) {
            Some(self.thread_id)
        } else {
            self.router.owner_of(parent)
        };
        let Some(parent_owner) = parent_owner else {
            warn!(%child, %parent, "parent owner unknown, dropping re-parent request");
            return;
        };
        if parent_owner != self.thread_id && self.state == TaskMasterState::Initialized {
            self.transfer(child, parent_owner);
        }
        // Follows the insert on the same queue when the child moved.
        dispatch::send_message(
            &mut self.router,
            msg::CONFIRM_SET_PARENT,
            MessageFlags::FORCE_PROPAGATE,
            self.thread_id.task_id(),
            child,
            Cell::from_u32(parent.raw()),
            &[],
        );
    }

    /// Forget `id` everywhere; if owned here, deliver `fin` and drop it.
    fn remove(&mut self, id: TaskId) {
        self.router.forget_owner(id);
        if let Some(task) = self.owned.remove(id) {
            debug!(thread = %self.thread_id, task = %id, "task removed");
            self.fin_task(task);
        }
    }

    /// Deliver a forced `fin` to a task this thread no longer tracks, then drop it.
    fn fin_task(&mut self, mut task: Task) {
        let id = task.id();
        let header = Message::new(
            msg::FIN,
            MessageFlags::FORCE_PROPAGATE,
            self.thread_id.task_id(),
            id,
            Cell::ZERO,
            0,
        );
        let mut ctx = TaskContext::new(&mut self.router, id);
        task.message_immediate(&MessageRef::contiguous(header, &[]), &mut ctx);
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Tear down every owned task and announce shutdown to all peers.
    pub(crate) fn finalize(&mut self) {
        if self.state != TaskMasterState::Initialized {
            return;
        }
        info!(thread = %self.thread_id, tasks = self.owned.len(), "finalizing TaskMaster");
        self.state = TaskMasterState::Finalizing;
        for task in self.owned.drain() {
            self.fin_task(task);
        }
        self.router.clear_owners();
        dispatch::broadcast_message(
            &mut self.router,
            msg::SHUTDOWN,
            MessageFlags::NONE,
            self.thread_id.task_id(),
            Cell::ZERO,
            &[],
        );
    }

    fn on_shutdown(&mut self, source: TaskId) {
        self.shutdown_acks += 1;
        debug!(
            thread = %self.thread_id,
            from = %source,
            acks = self.shutdown_acks,
            needed = self.router.thread_count(),
            "shutdown received"
        );
        if self.state == TaskMasterState::Initialized {
            self.finalize();
        }
        if self.state == TaskMasterState::Finalizing
            && self.shutdown_acks >= self.router.thread_count()
        {
            self.state = TaskMasterState::Shutdown;
            info!(thread = %self.thread_id, "TaskMaster shut down");
        }
    }
}
