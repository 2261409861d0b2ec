//! Draining inbound queues and routing each message to its recipient.

use tracing::{debug, error, trace};

use kestrel_core::{msg, TaskId};
use kestrel_fabric::{MessageFlags, MessageRef};

use super::{Core, TaskMaster};
use crate::context::TaskContext;
use crate::dispatch;
use crate::task::{MessageResult, TaskStatus};

impl TaskMaster {
    /// Drain every inbound queue once, source thread by source thread.
    ///
    /// Only messages already published when a queue is reached are handled,
    /// so a task that keeps messaging itself cannot stall the frame.
    /// Returns the number of messages handled.
    pub fn process_messages(&mut self) -> usize {
        let mut processed = 0;
        for peer in 0..self.inbox.len() {
            let mut budget = self.inbox[peer].pending_blocks();
            while budget > 0 {
                let Some(msg) = self.inbox[peer].pop_begin() else {
                    break;
                };
                budget = budget.saturating_sub(msg.block_count() + 1);
                self.core.dispatch(&msg);
                self.inbox[peer].pop_commit();
                processed += 1;
            }
        }
        self.core.stats.messages_processed += processed as u64;
        processed
    }
}

impl Core {
    /// Route one drained message: TaskMaster messages are handled here,
    /// owned tasks get it delivered, and anything else is forwarded to its
    /// known owner or dropped.
    pub(crate) fn dispatch(&mut self, msg: &MessageRef<'_>) {
        let target = msg.target();
        if let Some(thread) = target.as_thread() {
            assert_eq!(
                thread,
                self.thread_id,
                "message {} for TaskMaster {thread} drained by TaskMaster {}",
                msg.msg_id(),
                self.thread_id
            );
            self.handle_system(msg);
            return;
        }

        if self.owned.contains(target) {
            self.deliver_queued(msg);
            return;
        }

        match self.router.owner_of(target) {
            Some(owner) if owner != self.thread_id => {
                trace!(msg = %msg.msg_id(), %target, to = %owner, "forwarding to owner");
                self.router.transcribe(owner, msg);
                self.stats.messages_forwarded += 1;
            }
            _ => {
                debug!(
                    thread = %self.thread_id,
                    msg = %msg.msg_id(),
                    source = %msg.source(),
                    %target,
                    deferred = msg.flags().contains(MessageFlags::DEFERRED),
                    "dropping message for unknown task"
                );
                self.stats.messages_dropped += 1;
            }
        }
    }

    fn deliver_queued(&mut self, msg: &MessageRef<'_>) {
        let target = msg.target();
        if msg.msg_id() == msg::SET_TASK_STATUS {
            self.apply_status(target, TaskStatus::from_bits(msg.payload().u32()));
            return;
        }
        let Some(task) = self.owned.get_mut(target) else {
            return;
        };
        let mut ctx = TaskContext::new(&mut self.router, target);
        let result = task.message(msg, &mut ctx);
        if result == MessageResult::Propagate
            && !msg.flags().contains(MessageFlags::FORCE_PROPAGATE)
        {
            error!(
                thread = %self.thread_id,
                msg = %msg.msg_id(),
                source = %msg.source(),
                %target,
                "task declined a message addressed to it"
            );
            panic!(
                "task {target} did not consume message {} from {}",
                msg.msg_id(),
                msg.source()
            );
        }
    }

    /// Synchronous delivery to an owned task; `None` if not owned here.
    pub(crate) fn deliver_immediate(&mut self, msg: &MessageRef<'_>) -> Option<MessageResult> {
        let target = msg.target();
        let task = self.owned.get_mut(target)?;
        let mut ctx = TaskContext::new(&mut self.router, target);
        Some(task.message_immediate(msg, &mut ctx))
    }

    fn apply_status(&mut self, target: TaskId, status: TaskStatus) {
        let Some(task) = self.owned.get_mut(target) else {
            return;
        };
        debug!(task = %target, from = ?task.status(), to = ?status, "task status changed");
        task.set_status(status);
        if status == TaskStatus::Dead {
            dispatch::remove_task(&mut self.router, self.thread_id.task_id(), target);
        }
    }
}
