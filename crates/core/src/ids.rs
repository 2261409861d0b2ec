//! Task and thread addressing.
//!
//! A [`TaskId`] is a 28-bit value. The lowest [`MAX_THREADS`] ids address
//! TaskMaster threads directly, the top of the id space is reserved for
//! well-known singleton subsystems, and everything in between is handed out
//! by a process-global counter that never reuses a value.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Number of bits available to a task id in packed headers.
pub const TASK_ID_BITS: u32 = 28;

/// Largest representable task id.
pub const TASK_ID_MAX: u32 = (1 << TASK_ID_BITS) - 1;

/// Upper bound on TaskMaster threads. Ids below this address threads.
pub const MAX_THREADS: usize = 16;

/// First id of the reserved singleton range at the top of the id space.
pub const RESERVED_BASE: u32 = TASK_ID_MAX - 15;

/// Process-unique identifier of a schedulable unit (or, below
/// [`MAX_THREADS`], of a TaskMaster thread).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u32);

impl TaskId {
    /// The blank/absent id. Shares its bits with thread 0, which is never a task.
    pub const NONE: TaskId = TaskId(0);

    pub const RENDERER: TaskId = TaskId(RESERVED_BASE);
    pub const INPUT_MANAGER: TaskId = TaskId(RESERVED_BASE + 1);
    pub const ASSET_MANAGER: TaskId = TaskId(RESERVED_BASE + 2);
    pub const MODEL_MANAGER: TaskId = TaskId(RESERVED_BASE + 3);
    pub const SPRITE_MANAGER: TaskId = TaskId(RESERVED_BASE + 4);
    pub const AUDIO_MANAGER: TaskId = TaskId(RESERVED_BASE + 5);
    pub const EDITOR: TaskId = TaskId(RESERVED_BASE + 6);

    /// Wrap a raw id, panicking if it does not fit in 28 bits.
    pub const fn new(raw: u32) -> Self {
        assert!(raw <= TASK_ID_MAX, "task id exceeds 28 bits");
        TaskId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// True when this id addresses a TaskMaster thread rather than a task.
    pub const fn is_thread(self) -> bool {
        (self.0 as usize) < MAX_THREADS
    }

    /// True for the reserved singleton subsystem ids.
    pub const fn is_singleton(self) -> bool {
        self.0 >= RESERVED_BASE
    }

    /// The thread this id addresses, if it is a thread id.
    pub fn as_thread(self) -> Option<ThreadId> {
        if self.is_thread() {
            Some(ThreadId(self.0 as u8))
        } else {
            None
        }
    }

    /// Name of a reserved singleton id, for diagnostics.
    pub fn singleton_name(self) -> Option<&'static str> {
        match self {
            TaskId::RENDERER => Some("renderer"),
            TaskId::INPUT_MANAGER => Some("input_manager"),
            TaskId::ASSET_MANAGER => Some("asset_manager"),
            TaskId::MODEL_MANAGER => Some("model_manager"),
            TaskId::SPRITE_MANAGER => Some("sprite_manager"),
            TaskId::AUDIO_MANAGER => Some("audio_manager"),
            TaskId::EDITOR => Some("editor"),
            _ => None,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.singleton_name() {
            write!(f, "{name}")
        } else if self.is_thread() {
            write!(f, "thread:{}", self.0)
        } else {
            write!(f, "task:{}", self.0)
        }
    }
}

/// Index of a TaskMaster. Thread 0 is the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(u8);

impl ThreadId {
    pub const PRIMARY: ThreadId = ThreadId(0);

    pub fn new(index: usize) -> Self {
        assert!(index < MAX_THREADS, "thread index {index} >= MAX_THREADS");
        ThreadId(index as u8)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn is_primary(self) -> bool {
        self.0 == 0
    }

    /// The task id used to address this TaskMaster in message headers.
    pub const fn task_id(self) -> TaskId {
        TaskId(self.0 as u32)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_TASK_ID: AtomicU32 = AtomicU32::new(MAX_THREADS as u32);

/// Issue a fresh dynamic task id. Ids are never reused within a process.
pub fn next_task_id() -> TaskId {
    let raw = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
    assert!(raw < RESERVED_BASE, "dynamic task id space exhausted");
    TaskId(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_ids_skip_threads_and_are_unique() {
        let a = next_task_id();
        let b = next_task_id();
        assert!(!a.is_thread());
        assert!(!a.is_singleton());
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn thread_ids_round_trip_through_task_ids() {
        let t = ThreadId::new(3);
        assert_eq!(t.task_id().as_thread(), Some(t));
        assert!(t.task_id().is_thread());
        assert_eq!(TaskId::new(500).as_thread(), None);
    }

    #[test]
    fn singletons_sit_at_top_of_id_space() {
        assert!(TaskId::RENDERER.is_singleton());
        assert!(TaskId::EDITOR.is_singleton());
        assert!(TaskId::EDITOR.raw() <= TASK_ID_MAX);
        assert_eq!(TaskId::AUDIO_MANAGER.to_string(), "audio_manager");
    }

    #[test]
    #[should_panic(expected = "28 bits")]
    fn oversized_id_panics() {
        let _ = TaskId::new(TASK_ID_MAX + 1);
    }
}
