//! TaskMaster: per-thread owner of tasks, inbound queues and the frame loop.
//!
//! A TaskMaster drains every inbound queue, updates its tasks, drains again
//! and (on the primary) runs frame subsystems before meeting the other
//! TaskMasters at the frame barrier. All cross-thread effects, including
//! task insertion, migration and shutdown, travel as messages.

mod process;
mod system;


use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use kestrel_core::{msg, KestrelError, MessageId, TaskId, ThreadId};
use kestrel_fabric::{
    Block, Cell, Message, MessageConsumer, MessageFlags, MessageProducer, MessageRef,
};

use crate::context::TaskContext;
use crate::metrics::FrameStats;
use crate::owned::OwnedTasks;
use crate::router::Router;
use crate::runtime::{bind_thread, Shared};
use crate::subsystem::FrameSubsystem;
use crate::task::{MessageResult, Task, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMasterState {
    Uninitialized,
    Initialized,
    /// Tasks are gone; waiting for every peer's `shutdown__`.
    Finalizing,
    Shutdown,
}

/// Everything a TaskMaster owns except its inbound queues, so a drained
/// message can be read in place while tasks and routing state are mutated.
pub(crate) struct Core {
    thread_id: ThreadId,
    state: TaskMasterState,
    paused: bool,
    owned: OwnedTasks,
    router: Router,
    shutdown_acks: usize,
    stats: FrameStats,
}

pub struct TaskMaster {
    /// One consumer per source thread, own loopback included.
    inbox: Vec<MessageConsumer>,
    core: Core,
    subsystems: Vec<Box<dyn FrameSubsystem>>,
    shared: Arc<Shared>,
}

impl TaskMaster {
    pub(crate) fn new(
        thread_id: ThreadId,
        inbox: Vec<MessageConsumer>,
        outbound: Vec<MessageProducer>,
        owned_capacity: usize,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            inbox,
            core: Core {
                thread_id,
                state: TaskMasterState::Uninitialized,
                paused: false,
                owned: OwnedTasks::with_capacity(owned_capacity),
                router: Router::new(thread_id, outbound, owned_capacity),
                shutdown_acks: 0,
                stats: FrameStats::new(thread_id),
            },
            subsystems: Vec::new(),
            shared,
        }
    }

    /// Move from `Uninitialized` to `Initialized`. Only allowed once.
    pub fn init(&mut self) -> Result<(), KestrelError> {
        if self.core.state != TaskMasterState::Uninitialized {
            return Err(KestrelError::AlreadyInitialized);
        }
        self.core.state = TaskMasterState::Initialized;
        debug!(thread = %self.core.thread_id, "TaskMaster initialized");
        Ok(())
    }

    pub fn thread_id(&self) -> ThreadId {
        self.core.thread_id
    }

    pub fn is_primary(&self) -> bool {
        self.core.thread_id.is_primary()
    }

    pub fn state(&self) -> TaskMasterState {
        self.core.state
    }

    pub fn is_paused(&self) -> bool {
        self.core.paused
    }

    pub fn owned_len(&self) -> usize {
        self.core.owned.len()
    }

    pub fn owns(&self, task: TaskId) -> bool {
        self.core.owned.contains(task)
    }

    pub fn task(&self, task: TaskId) -> Option<&Task> {
        self.core.owned.get(task)
    }

    pub fn owner_of(&self, task: TaskId) -> Option<ThreadId> {
        self.core.router.owner_of(task)
    }

    #[cfg(test)]
    pub(crate) fn inbox_len(&self) -> usize {
        self.inbox.len()
    }

    pub fn stats(&self) -> &FrameStats {
        &self.core.stats
    }

    /// Take ownership of `task` right away without telling peers; the
    /// runtime records the owner on every TaskMaster itself.
    pub(crate) fn adopt(&mut self, task: Task) -> bool {
        self.core.take(task, 0)
    }

    pub(crate) fn record_owner(&mut self, task: TaskId, owner: ThreadId) {
        self.core.router.set_owner(task, owner, 0);
    }

    /// Register a per-frame subsystem. Only the primary runs subsystems.
    pub fn add_subsystem(&mut self, subsystem: Box<dyn FrameSubsystem>) {
        assert!(
            self.is_primary(),
            "subsystem {} registered on auxiliary TaskMaster {}",
            subsystem.name(),
            self.core.thread_id
        );
        info!(subsystem = subsystem.name(), "registered frame subsystem");
        self.subsystems.push(subsystem);
    }

    /// Run `f` with a context whose source is this TaskMaster's thread id.
    pub fn with_context<R>(&mut self, f: impl FnOnce(&mut TaskContext<'_>) -> R) -> R {
        let source = self.core.thread_id.task_id();
        let mut ctx = TaskContext::new(&mut self.core.router, source);
        f(&mut ctx)
    }

    /// Deliver a message synchronously to a task this TaskMaster owns.
    /// Returns `None` when the target is not owned here.
    pub fn send_immediate(
        &mut self,
        msg_id: MessageId,
        target: TaskId,
        payload: impl Into<Cell>,
        blocks: &[Block],
    ) -> Option<MessageResult> {
        let header = Message::new(
            msg_id,
            MessageFlags::NONE,
            self.core.thread_id.task_id(),
            target,
            payload.into(),
            blocks.len(),
        );
        self.core.deliver_immediate(&MessageRef::contiguous(header, blocks))
    }

    // ── Frame loop ───────────────────────────────────────────────────

    /// Tick every running, updatable task. Skipped while paused.
    pub fn update_tasks(&mut self, delta: f32) {
        let core = &mut self.core;
        if core.paused || core.state != TaskMasterState::Initialized {
            return;
        }
        let mut slot = 0;
        while core.state == TaskMasterState::Initialized {
            let Some(task) = core.owned.slot_mut(slot) else {
                break;
            };
            if task.is_updatable() && task.status() == TaskStatus::Running {
                let id = task.id();
                let mut ctx = TaskContext::new(&mut core.router, id);
                task.update(delta, &mut ctx);
                core.stats.updates += 1;
            }
            slot += 1;
        }
    }

    fn update_subsystems(&mut self, delta: f32) {
        let source = self.core.thread_id.task_id();
        for subsystem in self.subsystems.iter_mut().filter(|s| s.enabled()) {
            let mut ctx = TaskContext::new(&mut self.core.router, source);
            subsystem.update(delta, &mut ctx);
        }
    }

    /// One frame without barrier or pacing: drain, update, drain and, on
    /// the primary, subsystems followed by a final drain.
    pub fn run_frame(&mut self, delta: f32) {
        let started = Instant::now();
        self.process_messages();
        self.update_tasks(delta);
        self.process_messages();
        if self.is_primary() {
            self.update_subsystems(delta);
            self.process_messages();
        }
        let stats = &mut self.core.stats;
        stats.frames += 1;
        stats.busy += started.elapsed();
        stats.messages_sent = self.core.router.sent();
        stats.observe_owned(self.core.owned.len());
    }

    /// Run frames on the current OS thread until shutdown completes.
    ///
    /// Binds this TaskMaster to the calling thread; an OS thread can host
    /// only one TaskMaster for its lifetime.
    pub fn run(&mut self) {
        bind_thread(self.core.thread_id);
        info!(thread = %self.core.thread_id, primary = self.is_primary(), "TaskMaster running");
        let shared = Arc::clone(&self.shared);
        let guard = AbandonGuard {
            shared: &shared,
            primary: self.is_primary(),
        };
        if guard.primary {
            self.run_primary(&shared);
        } else {
            self.run_auxiliary(&shared);
        }
        drop(guard);
        self.cleanup();
    }

    fn run_primary(&mut self, shared: &Shared) {
        let mut last = Instant::now();
        while self.core.state != TaskMasterState::Shutdown {
            if shared.abandoned.load(Ordering::Acquire) {
                warn!(
                    thread = %self.core.thread_id,
                    "peer TaskMaster panicked, abandoning frame loop"
                );
                break;
            }
            let frame_start = Instant::now();
            let delta = frame_start.duration_since(last).min(shared.max_delta);
            last = frame_start;

            self.observe_shutdown_request(shared);
            self.run_frame(delta.as_secs_f32());
            shared.barrier.finish_frame();
            for subsystem in self.subsystems.iter_mut() {
                subsystem.end_frame();
            }

            if let Some(budget) = shared.frame_budget {
                let spent = frame_start.elapsed();
                if spent < budget {
                    thread::sleep(budget - spent);
                }
            }
        }
    }

    fn run_auxiliary(&mut self, shared: &Shared) {
        let mut frame = shared.barrier.frame();
        let mut last = Instant::now();
        while self.core.state != TaskMasterState::Shutdown {
            if shared.abandoned.load(Ordering::Acquire) {
                warn!(
                    thread = %self.core.thread_id,
                    "peer TaskMaster panicked, abandoning frame loop"
                );
                break;
            }
            let now = Instant::now();
            let delta = now.duration_since(last).min(shared.max_delta);
            last = now;

            self.observe_shutdown_request(shared);
            self.run_frame(delta.as_secs_f32());
            if self.core.state == TaskMasterState::Shutdown {
                break;
            }
            frame = shared.barrier.arrive_and_wait(frame);
        }
    }

    fn observe_shutdown_request(&mut self, shared: &Shared) {
        if self.core.state == TaskMasterState::Initialized
            && shared.shutdown_requested.load(Ordering::Acquire)
        {
            info!(thread = %self.core.thread_id, "external shutdown requested");
            self.core.finalize();
        }
    }

    /// Release anything left after the frame loop ends.
    fn cleanup(&mut self) {
        let leftover = self.core.owned.drain();
        if !leftover.is_empty() {
            warn!(
                thread = %self.core.thread_id,
                tasks = leftover.len(),
                "dropping tasks left at exit"
            );
        }
        let in_flight = self.discard_pending_inserts();
        if in_flight > 0 {
            warn!(
                thread = %self.core.thread_id,
                tasks = in_flight,
                "dropping tasks still in transit"
            );
        }
        self.core.router.clear_owners();
        self.subsystems.clear();
        let stats = &self.core.stats;
        info!(
            thread = %stats.thread,
            frames = stats.frames,
            processed = stats.messages_processed,
            sent = stats.messages_sent,
            forwarded = stats.messages_forwarded,
            dropped = stats.messages_dropped,
            updates = stats.updates,
            avg_frame_ms = stats.avg_frame_ms(),
            "TaskMaster stopped"
        );
    }

    /// Empty every inbound queue, dropping the tasks carried by any
    /// `insert_task__` still waiting there. Returns how many were dropped.
    fn discard_pending_inserts(&mut self) -> usize {
        let me = self.core.thread_id.task_id();
        let mut discarded = 0;
        for consumer in &mut self.inbox {
            while let Some(msg) = consumer.pop_begin() {
                if msg.msg_id() == msg::INSERT_TASK && msg.target() == me {
                    let blocks = [*msg.block(0), *msg.block(1)];
                    // SAFETY: the message is committed right after and never
                    // decoded again, so this is the only owner of the task.
                    drop(unsafe { Task::from_blocks(&blocks) });
                    discarded += 1;
                }
                consumer.pop_commit();
            }
        }
        discarded
    }

    pub fn into_stats(mut self) -> FrameStats {
        let fresh = FrameStats::new(self.core.thread_id);
        std::mem::replace(&mut self.core.stats, fresh)
    }
}

impl Drop for TaskMaster {
    fn drop(&mut self) {
        self.discard_pending_inserts();
    }
}

impl std::fmt::Debug for TaskMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskMaster")
            .field("thread_id", &self.core.thread_id)
            .field("state", &self.core.state)
            .field("paused", &self.core.paused)
            .field("owned", &self.core.owned.len())
            .field("subsystems", &self.subsystems.len())
            .finish()
    }
}

/// Releases the barrier when a frame loop exits, and flags the runtime as
/// abandoned when it exits by panicking so peers stop waiting for it.
struct AbandonGuard<'a> {
    shared: &'a Shared,
    primary: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.shared.abandoned.store(true, Ordering::Release);
        }
        if self.primary {
            self.shared.barrier.retire_primary();
        } else {
            self.shared.barrier.retire_auxiliary();
        }
    }
}
