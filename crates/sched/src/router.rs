//! Outbound side of a TaskMaster: one producer per peer queue plus the
//! ownership map used to pick the right one.

use std::collections::HashMap;

use tracing::error;

use kestrel_core::{TaskId, ThreadId};
use kestrel_fabric::{Block, FabricError, Message, MessageProducer, MessageRef, MessageWriter};

/// Where a message for some target should be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub thread: ThreadId,
    /// The owner was unknown; the message goes to the sender's own loopback
    /// queue and is resolved again when drained.
    pub deferred: bool,
}

/// Last known owner of a task and the transfer that put it there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OwnerEntry {
    thread: ThreadId,
    /// Bumped on every transfer of the task. Confirmations may be drained
    /// out of order across queues; only a newer generation replaces an entry.
    generation: u32,
}

/// True when `generation` was issued before `known`, allowing for wrap.
fn is_older(generation: u32, known: u32) -> bool {
    (generation.wrapping_sub(known) as i32) < 0
}

/// Per-thread view of where tasks live, plus the producers into every
/// peer's inbox (index = destination thread, own index = loopback).
pub struct Router {
    thread_id: ThreadId,
    outbound: Vec<MessageProducer>,
    owners: HashMap<TaskId, OwnerEntry>,
    sent: u64,
}

impl Router {
    pub(crate) fn new(
        thread_id: ThreadId,
        outbound: Vec<MessageProducer>,
        owned_capacity: usize,
    ) -> Self {
        assert!(
            thread_id.index() < outbound.len(),
            "TaskMaster {thread_id} has no loopback queue"
        );
        Self {
            thread_id,
            outbound,
            owners: HashMap::with_capacity(owned_capacity),
            sent: 0,
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn thread_count(&self) -> usize {
        self.outbound.len()
    }

    /// Messages pushed by this thread so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Last known owner of `id`, as far as this thread has heard.
    pub fn owner_of(&self, id: TaskId) -> Option<ThreadId> {
        self.owners.get(&id).map(|entry| entry.thread)
    }

    /// Transfer generation of the last known owner of `id`.
    pub fn generation_of(&self, id: TaskId) -> Option<u32> {
        self.owners.get(&id).map(|entry| entry.generation)
    }

    pub(crate) fn set_owner(&mut self, id: TaskId, owner: ThreadId, generation: u32) {
        self.owners.insert(id, OwnerEntry { thread: owner, generation });
    }

    /// Record `owner` for `id` unless a later transfer is already known.
    /// Returns false when the confirmation was stale and ignored.
    pub(crate) fn confirm_owner(&mut self, id: TaskId, owner: ThreadId, generation: u32) -> bool {
        if let Some(known) = self.owners.get(&id) {
            if is_older(generation, known.generation) {
                return false;
            }
        }
        self.set_owner(id, owner, generation);
        true
    }

    pub(crate) fn forget_owner(&mut self, id: TaskId) -> Option<ThreadId> {
        self.owners.remove(&id).map(|entry| entry.thread)
    }

    pub(crate) fn clear_owners(&mut self) {
        self.owners.clear();
    }

    /// Pick the queue for `target`.
    ///
    /// Thread ids go to that thread. Singletons go to their known owner,
    /// falling back to the primary. Other tasks go to their known owner,
    /// falling back to a deferred self-send.
    pub fn resolve(&self, target: TaskId) -> Route {
        if let Some(thread) = target.as_thread() {
            assert!(
                thread.index() < self.thread_count(),
                "message addressed to TaskMaster {thread}, only {} exist",
                self.thread_count()
            );
            return Route { thread, deferred: false };
        }
        match self.owner_of(target) {
            Some(thread) => Route { thread, deferred: false },
            None if target.is_singleton() => Route {
                thread: ThreadId::PRIMARY,
                deferred: false,
            },
            None => Route {
                thread: self.thread_id,
                deferred: true,
            },
        }
    }

    pub(crate) fn producer(&mut self, thread: ThreadId) -> &mut MessageProducer {
        &mut self.outbound[thread.index()]
    }

    /// Push a whole message to `thread`, aborting on overflow.
    pub(crate) fn push(&mut self, thread: ThreadId, header: Message, blocks: &[Block]) {
        let result = self.outbound[thread.index()].push(header, blocks);
        self.settle(thread, &header, result);
    }

    /// Reserve a message on `thread`'s queue, let `fill` write the payload
    /// in place, then publish it.
    pub(crate) fn push_with(
        &mut self,
        thread: ThreadId,
        header: Message,
        fill: impl FnOnce(&mut MessageWriter<'_>),
    ) {
        let producer = &mut self.outbound[thread.index()];
        let result = producer.push_begin_header(header).map(|mut writer| fill(&mut writer));
        if result.is_ok() {
            producer.push_commit();
        }
        self.settle(thread, &header, result);
    }

    /// Copy a drained message into `thread`'s queue unchanged.
    pub(crate) fn transcribe(&mut self, thread: ThreadId, msg: &MessageRef<'_>) {
        let result = self.outbound[thread.index()].transcribe(msg);
        self.settle(thread, msg.header(), result);
    }

    fn settle(&mut self, thread: ThreadId, header: &Message, result: Result<(), FabricError>) {
        match result {
            Ok(()) => self.sent += 1,
            Err(err) => {
                error!(
                    from = %self.thread_id,
                    to = %thread,
                    msg = %header.msg_id(),
                    error = %err,
                    "message queue overflow"
                );
                panic!(
                    "message queue {} -> {} overflowed ({err}); raise queues.capacity_blocks",
                    self.thread_id, thread
                );
            }
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("thread_id", &self.thread_id)
            .field("thread_count", &self.thread_count())
            .field("known_owners", &self.owners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use kestrel_core::ids::next_task_id;
    use kestrel_core::MessageId;
    use kestrel_fabric::{message_queue, Cell, MessageConsumer, MessageFlags};

    use super::*;

    /// Router for thread 1 of 3 plus the consumers on the other ends.
    fn router(capacity: usize) -> (Router, Vec<MessageConsumer>) {
        let (producers, consumers): (Vec<_>, Vec<_>) =
            (0..3).map(|_| message_queue(capacity).unwrap()).unzip();
        (Router::new(ThreadId::new(1), producers, 8), consumers)
    }

    #[test]
    fn thread_ids_route_to_that_thread() {
        let (router, _) = router(64);
        let route = router.resolve(ThreadId::new(2).task_id());
        assert_eq!(route, Route { thread: ThreadId::new(2), deferred: false });
    }

    #[test]
    #[should_panic(expected = "only 3 exist")]
    fn missing_thread_is_fatal() {
        let (router, _) = router(64);
        router.resolve(ThreadId::new(5).task_id());
    }

    #[test]
    fn singletons_default_to_primary_until_owned() {
        let (mut router, _) = router(64);
        assert_eq!(router.resolve(TaskId::RENDERER).thread, ThreadId::PRIMARY);
        router.set_owner(TaskId::RENDERER, ThreadId::new(2), 0);
        assert_eq!(router.resolve(TaskId::RENDERER).thread, ThreadId::new(2));
    }

    #[test]
    fn unknown_task_defers_to_loopback() {
        let (mut router, _) = router(64);
        let id = next_task_id();
        assert_eq!(router.resolve(id), Route { thread: ThreadId::new(1), deferred: true });

        router.set_owner(id, ThreadId::new(0), 0);
        assert_eq!(router.resolve(id), Route { thread: ThreadId::new(0), deferred: false });

        router.forget_owner(id);
        assert!(router.resolve(id).deferred);
    }

    #[test]
    fn older_confirmation_never_replaces_newer_owner() {
        let (mut router, _) = router(64);
        let id = next_task_id();
        assert!(router.confirm_owner(id, ThreadId::new(1), 1));
        assert!(router.confirm_owner(id, ThreadId::new(0), 2));
        assert!(!router.confirm_owner(id, ThreadId::new(1), 1));
        assert_eq!(router.owner_of(id), Some(ThreadId::new(0)));
        assert_eq!(router.generation_of(id), Some(2));

        // Generations compare across wrap.
        assert!(router.confirm_owner(id, ThreadId::new(2), u32::MAX));
        assert!(router.confirm_owner(id, ThreadId::new(1), 0));
        assert!(!router.confirm_owner(id, ThreadId::new(2), u32::MAX));
        assert_eq!(router.owner_of(id), Some(ThreadId::new(1)));
    }

    #[test]
    fn push_with_writes_in_place() {
        let (mut router, mut consumers) = router(64);
        let header = Message::new(
            MessageId::from_name("fill"),
            MessageFlags::NONE,
            TaskId::new(20),
            TaskId::new(21),
            Cell::from_u32(4),
            2,
        );
        router.push_with(ThreadId::new(2), header, |w| {
            w.set_block(0, Block::from_u32s([1, 2, 3, 4]));
            w.set_block(1, Block::from_u32s([5, 6, 7, 8]));
        });
        assert_eq!(router.sent(), 1);

        let msg = consumers[2].pop_begin().unwrap();
        assert_eq!(msg.payload().u32(), 4);
        assert_eq!(msg.block(1).u32s(), [5, 6, 7, 8]);
    }

    #[test]
    #[should_panic(expected = "raise queues.capacity_blocks")]
    fn overflow_is_fatal() {
        let (mut router, _consumers) = router(16);
        let header = Message::new(
            MessageId::from_name("big"),
            MessageFlags::NONE,
            TaskId::new(20),
            TaskId::new(21),
            Cell::ZERO,
            15,
        );
        let blocks = [Block::ZERO; 15];
        router.push(ThreadId::new(0), header, &blocks);
        router.push(ThreadId::new(0), header, &blocks);
    }
}
