//! Task: a 32-byte, by-value handle binding a user object to its update and
//! message entry points.
//!
//! Objects do not implement a common base type. Instead, [`Task::create`]
//! and [`Task::create_updatable`] capture a table of monomorphized stub
//! functions for the concrete type, so dispatch is one indirect call into
//! the right `impl` with no per-object vtable header.

use std::fmt;
use std::ptr;

use kestrel_core::ids::{next_task_id, TaskId, TASK_ID_MAX};
use kestrel_fabric::{Block, MessageRef};

use crate::context::TaskContext;

/// Result of handing a message to a task or TaskMaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageResult {
    /// The recipient handled the message.
    Consumed,
    /// The recipient declined it; routing should treat delivery as incomplete.
    Propagate,
}

/// Implemented by every object that can be scheduled as a [`Task`].
pub trait MessageHandler: Send + 'static {
    /// Handle a message drained from a queue.
    fn message(&mut self, msg: &MessageRef<'_>, ctx: &mut TaskContext<'_>) -> MessageResult;

    /// Handle a message delivered synchronously by a co-located sender.
    fn message_immediate(
        &mut self,
        msg: &MessageRef<'_>,
        ctx: &mut TaskContext<'_>,
    ) -> MessageResult {
        self.message(msg, ctx)
    }
}

/// Objects that also want a per-frame tick.
pub trait Updatable: MessageHandler {
    fn update(&mut self, delta: f32, ctx: &mut TaskContext<'_>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    Initializing = 0,
    Running = 1,
    Paused = 2,
    Dead = 3,
}

impl TaskStatus {
    /// Decode a 2-bit status. Anything else is a corrupted header.
    pub fn from_bits(bits: u32) -> Self {
        match bits {
            0 => TaskStatus::Initializing,
            1 => TaskStatus::Running,
            2 => TaskStatus::Paused,
            3 => TaskStatus::Dead,
            other => panic!("task status {other} out of range"),
        }
    }
}

/// 2-bit permission level carried in the task header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Permission(u8);

impl Permission {
    pub const DEFAULT: Permission = Permission(0);
    pub const SYSTEM: Permission = Permission(3);

    pub fn new(level: u8) -> Self {
        assert!(level < 4, "permission level {level} out of range");
        Permission(level)
    }

    pub fn level(self) -> u8 {
        self.0
    }
}

// ── Stub table ───────────────────────────────────────────────────────

type MessageStub = unsafe fn(*mut (), &MessageRef<'_>, &mut TaskContext<'_>) -> MessageResult;
type UpdateStub = unsafe fn(*mut (), f32, &mut TaskContext<'_>);

pub(crate) struct TaskStubs {
    message: MessageStub,
    message_immediate: MessageStub,
    update: UpdateStub,
    drop: unsafe fn(*mut ()),
    updatable: bool,
}

unsafe fn message_stub<T: MessageHandler>(
    object: *mut (),
    msg: &MessageRef<'_>,
    ctx: &mut TaskContext<'_>,
) -> MessageResult {
    (*object.cast::<T>()).message(msg, ctx)
}

unsafe fn message_immediate_stub<T: MessageHandler>(
    object: *mut (),
    msg: &MessageRef<'_>,
    ctx: &mut TaskContext<'_>,
) -> MessageResult {
    (*object.cast::<T>()).message_immediate(msg, ctx)
}

unsafe fn update_stub<T: Updatable>(object: *mut (), delta: f32, ctx: &mut TaskContext<'_>) {
    (*object.cast::<T>()).update(delta, ctx)
}

unsafe fn update_noop(_: *mut (), _: f32, _: &mut TaskContext<'_>) {}

unsafe fn drop_stub<T>(object: *mut ()) {
    drop(Box::from_raw(object.cast::<T>()));
}

unsafe fn blank_message(_: *mut (), _: &MessageRef<'_>, _: &mut TaskContext<'_>) -> MessageResult {
    MessageResult::Propagate
}

unsafe fn blank_drop(_: *mut ()) {}

fn message_stubs<T: MessageHandler>() -> &'static TaskStubs {
    &TaskStubs {
        message: message_stub::<T>,
        message_immediate: message_immediate_stub::<T>,
        update: update_noop,
        drop: drop_stub::<T>,
        updatable: false,
    }
}

fn updatable_stubs<T: Updatable>() -> &'static TaskStubs {
    &TaskStubs {
        message: message_stub::<T>,
        message_immediate: message_immediate_stub::<T>,
        update: update_stub::<T>,
        drop: drop_stub::<T>,
        updatable: true,
    }
}

static BLANK_STUBS: TaskStubs = TaskStubs {
    message: blank_message,
    message_immediate: blank_message,
    update: update_noop,
    drop: blank_drop,
    updatable: false,
};

// ── Task ─────────────────────────────────────────────────────────────

const STATUS_SHIFT: u32 = 30;
const PERMISSION_SHIFT: u32 = 28;

/// Scheduling handle for one user object.
///
/// Header word layout: `status:2 | permission:2 | id:28`.
///
/// A task owns its object: dropping a non-blank task drops the object.
/// Moving a task between TaskMasters goes through [`Task::into_blocks`] and
/// [`Task::from_blocks`] inside an `insert_task__` message.
#[repr(C, align(32))]
pub struct Task {
    bits: u32,
    name_hash: u32,
    object: *mut (),
    stubs: &'static TaskStubs,
}

const _: () = assert!(std::mem::size_of::<Task>() == 32);

// SAFETY: the object behind `object` is `Send` (required by MessageHandler)
// and only ever touched by whichever thread currently holds the Task.
unsafe impl Send for Task {}

impl Task {
    /// Schedule `object` with a fresh id. `update` is a no-op for this task.
    pub fn create<T: MessageHandler>(object: Box<T>, name_hash: u32) -> Task {
        Self::create_with_id(next_task_id(), object, name_hash)
    }

    /// Schedule `object` with a fresh id, binding its `update` entry point.
    pub fn create_updatable<T: Updatable>(object: Box<T>, name_hash: u32) -> Task {
        Self::create_updatable_with_id(next_task_id(), object, name_hash)
    }

    /// Like [`create`](Self::create) with an explicit id, e.g. a reserved singleton id.
    pub fn create_with_id<T: MessageHandler>(id: TaskId, object: Box<T>, name_hash: u32) -> Task {
        Self::from_parts(id, name_hash, Box::into_raw(object).cast(), message_stubs::<T>())
    }

    pub fn create_updatable_with_id<T: Updatable>(
        id: TaskId,
        object: Box<T>,
        name_hash: u32,
    ) -> Task {
        Self::from_parts(id, name_hash, Box::into_raw(object).cast(), updatable_stubs::<T>())
    }

    fn from_parts(id: TaskId, name_hash: u32, object: *mut (), stubs: &'static TaskStubs) -> Task {
        assert!(!id.is_thread(), "task id {id} collides with a thread id");
        let mut task = Task {
            bits: 0,
            name_hash,
            object,
            stubs,
        };
        task.set_header(TaskStatus::Initializing, Permission::DEFAULT, id);
        task
    }

    /// The absent-task sentinel: id 0, no object.
    pub fn blank() -> Task {
        Task {
            bits: 0,
            name_hash: 0,
            object: ptr::null_mut(),
            stubs: &BLANK_STUBS,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.object.is_null()
    }

    pub fn id(&self) -> TaskId {
        TaskId::new(self.bits & TASK_ID_MAX)
    }

    pub fn name_hash(&self) -> u32 {
        self.name_hash
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_bits(self.bits >> STATUS_SHIFT)
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.set_header(status, self.permission(), self.id());
    }

    pub fn permission(&self) -> Permission {
        Permission(((self.bits >> PERMISSION_SHIFT) & 0b11) as u8)
    }

    pub fn set_permission(&mut self, permission: Permission) {
        self.set_header(self.status(), permission, self.id());
    }

    pub fn is_updatable(&self) -> bool {
        self.stubs.updatable
    }

    fn set_header(&mut self, status: TaskStatus, permission: Permission, id: TaskId) {
        self.bits = ((status as u32) << STATUS_SHIFT)
            | (u32::from(permission.level()) << PERMISSION_SHIFT)
            | id.raw();
    }

    /// Tick the object. Does nothing unless the task is `Running`.
    pub fn update(&mut self, delta: f32, ctx: &mut TaskContext<'_>) {
        if self.status() == TaskStatus::Running {
            // SAFETY: `object` matches the type the stubs were built for.
            unsafe { (self.stubs.update)(self.object, delta, ctx) }
        }
    }

    /// Deliver a queued message.
    pub fn message(&mut self, msg: &MessageRef<'_>, ctx: &mut TaskContext<'_>) -> MessageResult {
        // SAFETY: as above; blank tasks use stubs that ignore the pointer.
        unsafe { (self.stubs.message)(self.object, msg, ctx) }
    }

    /// Deliver a message synchronously from a co-located sender.
    pub fn message_immediate(
        &mut self,
        msg: &MessageRef<'_>,
        ctx: &mut TaskContext<'_>,
    ) -> MessageResult {
        // SAFETY: as above.
        unsafe { (self.stubs.message_immediate)(self.object, msg, ctx) }
    }

    /// Flatten the handle into two payload blocks, giving up ownership of
    /// the object to whoever calls [`from_blocks`](Self::from_blocks).
    pub fn into_blocks(self) -> [Block; 2] {
        let object = self.object.expose_provenance() as u64;
        let stubs = ptr::from_ref(self.stubs).expose_provenance() as u64;
        let blocks = [
            Block::from_u32s([self.bits, self.name_hash, object as u32, (object >> 32) as u32]),
            Block::from_u32s([stubs as u32, (stubs >> 32) as u32, 0, 0]),
        ];
        std::mem::forget(self);
        blocks
    }

    /// Rebuild a task flattened by [`into_blocks`](Self::into_blocks).
    ///
    /// # Safety
    ///
    /// `blocks` must come from exactly one `into_blocks` call in this process
    /// and must be decoded at most once; a second decode would double-own
    /// the object.
    pub unsafe fn from_blocks(blocks: &[Block; 2]) -> Task {
        let [bits, name_hash, obj_lo, obj_hi] = blocks[0].u32s();
        let [stubs_lo, stubs_hi, _, _] = blocks[1].u32s();
        let object = (u64::from(obj_hi) << 32 | u64::from(obj_lo)) as usize;
        let stubs = (u64::from(stubs_hi) << 32 | u64::from(stubs_lo)) as usize;
        let task = Task {
            bits,
            name_hash,
            object: ptr::with_exposed_provenance_mut(object),
            stubs: &*ptr::with_exposed_provenance::<TaskStubs>(stubs),
        };
        // Validates the status bits.
        let _ = task.status();
        task
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if !self.object.is_null() {
            // SAFETY: non-blank tasks own a Box of the type the stubs were built for.
            unsafe { (self.stubs.drop)(self.object) }
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Task::blank()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("permission", &self.permission())
            .field("name_hash", &format_args!("{:#010x}", self.name_hash))
            .field("updatable", &self.is_updatable())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use kestrel_core::message_id::hash_name;
    use kestrel_core::{KestrelConfig, MessageId, ThreadId};
    use kestrel_fabric::{Cell, Message, MessageFlags};

    use super::*;
    use crate::runtime::init_task_masters;

    const POKE: MessageId = MessageId::from_name("poke");

    /// Records updates and messages into its own counters.
    struct Counter {
        updates: Arc<AtomicUsize>,
        messages: Arc<AtomicUsize>,
        weight: usize,
    }

    impl MessageHandler for Counter {
        fn message(&mut self, msg: &MessageRef<'_>, _ctx: &mut TaskContext<'_>) -> MessageResult {
            if msg.msg_id() == POKE {
                self.messages.fetch_add(self.weight, Ordering::SeqCst);
                MessageResult::Consumed
            } else {
                MessageResult::Propagate
            }
        }
    }

    impl Updatable for Counter {
        fn update(&mut self, _delta: f32, _ctx: &mut TaskContext<'_>) {
            self.updates.fetch_add(self.weight, Ordering::SeqCst);
        }
    }

    /// A second, unrelated type that tracks the deltas it was given.
    struct Accumulator {
        total: Arc<parking_lot::Mutex<f32>>,
        pokes: Arc<AtomicUsize>,
    }

    impl MessageHandler for Accumulator {
        fn message(&mut self, _msg: &MessageRef<'_>, _ctx: &mut TaskContext<'_>) -> MessageResult {
            self.pokes.fetch_add(1, Ordering::SeqCst);
            MessageResult::Consumed
        }
    }

    impl Updatable for Accumulator {
        fn update(&mut self, delta: f32, _ctx: &mut TaskContext<'_>) {
            *self.total.lock() += delta;
        }
    }

    struct Quiet;

    impl MessageHandler for Quiet {
        fn message(&mut self, _msg: &MessageRef<'_>, _ctx: &mut TaskContext<'_>) -> MessageResult {
            MessageResult::Consumed
        }
    }

    struct DropFlag(Arc<AtomicUsize>);

    impl MessageHandler for DropFlag {
        fn message(&mut self, _msg: &MessageRef<'_>, _ctx: &mut TaskContext<'_>) -> MessageResult {
            MessageResult::Consumed
        }
    }

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn poke(target: TaskId) -> Message {
        Message::new(POKE, MessageFlags::NONE, TaskId::new(20), target, Cell::ZERO, 0)
    }

    #[test]
    fn task_is_thirty_two_bytes() {
        assert_eq!(std::mem::size_of::<Task>(), 32);
    }

    #[test]
    fn delegates_reach_the_right_instance() {
        let mut runtime = init_task_masters(KestrelConfig::with_threads(1)).unwrap();
        let master = runtime.task_master_mut(ThreadId::PRIMARY);

        let a_updates = Arc::new(AtomicUsize::new(0));
        let a_messages = Arc::new(AtomicUsize::new(0));
        let b_updates = Arc::new(AtomicUsize::new(0));
        let b_messages = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(parking_lot::Mutex::new(0.0f32));
        let pokes = Arc::new(AtomicUsize::new(0));

        let mut a = Task::create_updatable(
            Box::new(Counter {
                updates: a_updates.clone(),
                messages: a_messages.clone(),
                weight: 1,
            }),
            hash_name("a"),
        );
        let mut b = Task::create_updatable(
            Box::new(Counter {
                updates: b_updates.clone(),
                messages: b_messages.clone(),
                weight: 10,
            }),
            hash_name("b"),
        );
        let mut c = Task::create_updatable(
            Box::new(Accumulator { total: total.clone(), pokes: pokes.clone() }),
            hash_name("c"),
        );
        for t in [&mut a, &mut b, &mut c] {
            t.set_status(TaskStatus::Running);
        }

        master.with_context(|ctx| {
            a.update(0.5, ctx);
            b.update(0.5, ctx);
            b.update(0.5, ctx);
            c.update(0.25, ctx);
            c.update(0.5, ctx);

            let header = poke(b.id());
            let result = b.message(&MessageRef::contiguous(header, &[]), ctx);
            assert_eq!(result, MessageResult::Consumed);
            let header = poke(a.id());
            assert_eq!(
                a.message_immediate(&MessageRef::contiguous(header, &[]), ctx),
                MessageResult::Consumed
            );
            c.message(&MessageRef::contiguous(poke(c.id()), &[]), ctx);
        });

        assert_eq!(a_updates.load(Ordering::SeqCst), 1);
        assert_eq!(b_updates.load(Ordering::SeqCst), 20);
        assert_eq!(a_messages.load(Ordering::SeqCst), 1);
        assert_eq!(b_messages.load(Ordering::SeqCst), 10);
        assert_eq!(*total.lock(), 0.75);
        assert_eq!(pokes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn update_requires_running_status_and_updatable_binding() {
        let mut runtime = init_task_masters(KestrelConfig::with_threads(1)).unwrap();
        let master = runtime.task_master_mut(ThreadId::PRIMARY);
        let updates = Arc::new(AtomicUsize::new(0));

        let mut task = Task::create_updatable(
            Box::new(Counter { updates: updates.clone(), messages: Arc::default(), weight: 1 }),
            0,
        );
        let mut quiet = Task::create(Box::new(Quiet), 0);
        assert!(!quiet.is_updatable());
        quiet.set_status(TaskStatus::Running);

        master.with_context(|ctx| {
            task.update(1.0, ctx); // Initializing
            task.set_status(TaskStatus::Paused);
            task.update(1.0, ctx);
            task.set_status(TaskStatus::Running);
            task.update(1.0, ctx);
            quiet.update(1.0, ctx);
        });
        assert_eq!(updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn header_bits_pack_independently() {
        let mut task = Task::create(Box::new(Quiet), hash_name("quiet"));
        let id = task.id();
        task.set_permission(Permission::SYSTEM);
        task.set_status(TaskStatus::Dead);
        assert_eq!(task.id(), id);
        assert_eq!(task.status(), TaskStatus::Dead);
        assert_eq!(task.permission(), Permission::SYSTEM);
        assert_eq!(task.name_hash(), hash_name("quiet"));
    }

    #[test]
    fn blocks_round_trip_moves_ownership() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut task = Task::create(Box::new(DropFlag(drops.clone())), 7);
        task.set_status(TaskStatus::Paused);
        let id = task.id();

        let blocks = task.into_blocks();
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        let back = unsafe { Task::from_blocks(&blocks) };
        assert_eq!(back.id(), id);
        assert_eq!(back.status(), TaskStatus::Paused);
        assert_eq!(back.name_hash(), 7);
        drop(back);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn blank_task_is_inert() {
        let mut runtime = init_task_masters(KestrelConfig::with_threads(1)).unwrap();
        let mut blank = Task::blank();
        assert!(blank.is_blank());
        assert_eq!(blank.id(), TaskId::NONE);
        runtime.task_master_mut(ThreadId::PRIMARY).with_context(|ctx| {
            let r = blank.message(&MessageRef::contiguous(poke(TaskId::NONE), &[]), ctx);
            assert_eq!(r, MessageResult::Propagate);
        });
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn corrupt_status_bits_panic() {
        let _ = TaskStatus::from_bits(4);
    }
}
