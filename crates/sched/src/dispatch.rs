//! Message dispatch helpers.
//!
//! Every helper works on the calling thread's [`Router`]: it resolves the
//! destination queue, builds the header and publishes the message. Tasks
//! normally reach these through [`TaskContext`](crate::TaskContext).

use tracing::trace;

use kestrel_core::{msg, MessageId, TaskId, ThreadId};
use kestrel_fabric::{Block, Cell, Message, MessageFlags, MessageProducer, MessageWriter};

use crate::router::{Route, Router};
use crate::task::{Task, TaskStatus};

/// Producer for messages from `source` to `target`, with the route taken.
///
/// A deferred route means the caller must tag the header with
/// [`MessageFlags::DEFERRED`]; [`send_message`] does this itself.
pub fn get_message_queue<'r>(
    router: &'r mut Router,
    source: TaskId,
    target: TaskId,
) -> (Route, &'r mut MessageProducer) {
    let route = router.resolve(target);
    trace!(%source, %target, thread = %route.thread, deferred = route.deferred, "resolved queue");
    (route, router.producer(route.thread))
}

/// True when `target` is this thread or a task this thread believes it owns.
///
/// Callers use this to decide whether immediate delivery is possible.
pub fn is_target_on_same_taskmaster(router: &Router, target: TaskId) -> bool {
    match target.as_thread() {
        Some(thread) => thread == router.thread_id(),
        None => router.owner_of(target) == Some(router.thread_id()),
    }
}

/// Queue a message for `target`.
pub fn send_message(
    router: &mut Router,
    msg_id: MessageId,
    flags: MessageFlags,
    source: TaskId,
    target: TaskId,
    payload: Cell,
    blocks: &[Block],
) {
    let (route, header) =
        routed_header(router, msg_id, flags, source, target, payload, blocks.len());
    router.push(route.thread, header, blocks);
}

/// Queue a message for `target`, writing its payload in place.
#[allow(clippy::too_many_arguments)]
pub fn send_message_with(
    router: &mut Router,
    msg_id: MessageId,
    flags: MessageFlags,
    source: TaskId,
    target: TaskId,
    payload: Cell,
    block_count: usize,
    fill: impl FnOnce(&mut MessageWriter<'_>),
) {
    let (route, header) =
        routed_header(router, msg_id, flags, source, target, payload, block_count);
    router.push_with(route.thread, header, fill);
}

fn routed_header(
    router: &Router,
    msg_id: MessageId,
    flags: MessageFlags,
    source: TaskId,
    target: TaskId,
    payload: Cell,
    block_count: usize,
) -> (Route, Message) {
    let route = router.resolve(target);
    let flags = if route.deferred {
        flags | MessageFlags::DEFERRED
    } else {
        flags
    };
    trace!(
        msg = %msg_id,
        %source,
        %target,
        thread = %route.thread,
        deferred = route.deferred,
        "send"
    );
    (route, Message::new(msg_id, flags, source, target, payload, block_count))
}

/// Queue one copy of a message to every TaskMaster, this one included.
/// Each copy is addressed to the receiving thread's id.
pub fn broadcast_message(
    router: &mut Router,
    msg_id: MessageId,
    flags: MessageFlags,
    source: TaskId,
    payload: Cell,
    blocks: &[Block],
) {
    trace!(msg = %msg_id, %source, threads = router.thread_count(), "broadcast");
    for index in 0..router.thread_count() {
        let thread = ThreadId::new(index);
        let header = Message::new(msg_id, flags, source, thread.task_id(), payload, blocks.len());
        router.push(thread, header, blocks);
    }
}

/// Hand `task` to TaskMaster `thread`, which takes ownership when it drains
/// the message.
pub fn insert_task(router: &mut Router, source: TaskId, thread: ThreadId, task: Task) {
    hand_over(router, source, thread, task, 0);
}

/// [`insert_task`] for a task leaving its current owner. The payload carries
/// the transfer `generation` so peers can order the owner confirmations.
pub(crate) fn hand_over(
    router: &mut Router,
    source: TaskId,
    thread: ThreadId,
    task: Task,
    generation: u32,
) {
    trace!(task = %task.id(), %thread, generation, "insert task");
    let blocks = task.into_blocks();
    send_message(
        router,
        msg::INSERT_TASK,
        MessageFlags::NONE,
        source,
        thread.task_id(),
        Cell::from_u32(generation),
        &blocks,
    );
}

/// Ask whichever thread owns `task` to move it to `new_owner`.
pub fn request_set_task_owner(
    router: &mut Router,
    source: TaskId,
    task: TaskId,
    new_owner: ThreadId,
) {
    let block = Block::from_u32s([task.raw(), new_owner.index() as u32, 0, 0]);
    broadcast_message(
        router,
        msg::REQUEST_SET_TASK_OWNER,
        MessageFlags::NONE,
        source,
        Cell::ZERO,
        &[block],
    );
}

/// Ask for `child` to be co-located with `parent`. The child receives
/// `confirm_set_parent__` once its owner has acted on the request.
pub fn request_set_parent(router: &mut Router, source: TaskId, child: TaskId, parent: TaskId) {
    let block = Block::from_u32s([child.raw(), parent.raw(), 0, 0]);
    broadcast_message(
        router,
        msg::REQUEST_SET_PARENT,
        MessageFlags::NONE,
        source,
        Cell::ZERO,
        &[block],
    );
}

/// Remove `task` everywhere. Its owner delivers `fin` and drops it.
pub fn remove_task(router: &mut Router, source: TaskId, task: TaskId) {
    broadcast_message(
        router,
        msg::REMOVE_TASK,
        MessageFlags::NONE,
        source,
        Cell::from_u32(task.raw()),
        &[],
    );
}

/// Ask TaskMaster `thread` to finalize, which starts a runtime-wide shutdown.
pub fn fin(router: &mut Router, source: TaskId, thread: ThreadId) {
    send_message(
        router,
        msg::FIN,
        MessageFlags::NONE,
        source,
        thread.task_id(),
        Cell::ZERO,
        &[],
    );
}

/// Flip the paused flag on every TaskMaster.
pub fn toggle_pause(router: &mut Router, source: TaskId) {
    broadcast_message(router, msg::TOGGLE_PAUSE, MessageFlags::NONE, source, Cell::ZERO, &[]);
}

/// Set `task`'s status through its owner. `Dead` removes the task.
pub fn set_task_status(router: &mut Router, source: TaskId, task: TaskId, status: TaskStatus) {
    send_message(
        router,
        msg::SET_TASK_STATUS,
        MessageFlags::NONE,
        source,
        task,
        Cell::from_u32(status as u32),
        &[],
    );
}

/// Declare that `source` mutates state owned by `target` during its update.
///
/// Recorded for diagnostics only; the scheduler does not yet reorder or
/// co-locate tasks based on declared dependencies.
pub fn register_mutable_dependency(source: TaskId, target: TaskId) {
    trace!(%source, %target, "register mutable dependency");
}

pub fn deregister_mutable_dependency(source: TaskId, target: TaskId) {
    trace!(%source, %target, "deregister mutable dependency");
}

#[cfg(test)]
mod tests {
    use kestrel_core::ids::next_task_id;
    use kestrel_fabric::{message_queue, MessageConsumer};

    use super::*;

    fn router(thread: usize) -> (Router, Vec<MessageConsumer>) {
        let (producers, consumers): (Vec<_>, Vec<_>) =
            (0..2).map(|_| message_queue(64).unwrap()).unzip();
        (Router::new(ThreadId::new(thread), producers, 8), consumers)
    }

    #[test]
    fn unknown_target_is_deferred_on_loopback() {
        let (mut router, mut consumers) = router(1);
        let target = next_task_id();
        send_message(
            &mut router,
            MessageId::from_name("hello"),
            MessageFlags::NONE,
            TaskId::new(40),
            target,
            Cell::from_u32(3),
            &[],
        );
        assert!(consumers[0].pop_begin().is_none());
        let msg = consumers[1].pop_begin().unwrap();
        assert_eq!(msg.target(), target);
        assert!(msg.flags().contains(MessageFlags::DEFERRED));
    }

    #[test]
    fn broadcast_addresses_each_thread() {
        let (mut router, mut consumers) = router(0);
        broadcast_message(
            &mut router,
            msg::TOGGLE_PAUSE,
            MessageFlags::NONE,
            TaskId::new(0),
            Cell::ZERO,
            &[],
        );
        for (i, consumer) in consumers.iter_mut().enumerate() {
            let msg = consumer.pop_begin().unwrap();
            assert_eq!(msg.msg_id(), msg::TOGGLE_PAUSE);
            assert_eq!(msg.target(), ThreadId::new(i).task_id());
        }
    }

    #[test]
    fn ownership_request_carries_task_and_owner() {
        let (mut router, mut consumers) = router(0);
        let task = next_task_id();
        request_set_task_owner(&mut router, TaskId::new(0), task, ThreadId::new(1));
        let msg = consumers[1].pop_begin().unwrap();
        assert_eq!(msg.block_count(), 1);
        assert_eq!(msg.block(0).u32s()[..2], [task.raw(), 1]);
    }

    #[test]
    fn same_taskmaster_check() {
        let (mut router, _consumers) = router(1);
        let local = next_task_id();
        let remote = next_task_id();
        router.set_owner(local, ThreadId::new(1), 0);
        router.set_owner(remote, ThreadId::new(0), 0);

        assert!(is_target_on_same_taskmaster(&router, local));
        assert!(!is_target_on_same_taskmaster(&router, remote));
        assert!(is_target_on_same_taskmaster(&router, ThreadId::new(1).task_id()));
        assert!(!is_target_on_same_taskmaster(&router, ThreadId::new(0).task_id()));
        assert!(!is_target_on_same_taskmaster(&router, next_task_id()));
    }
}
