//! Frame-synchronized task scheduling.
//!
//! One [`TaskMaster`] runs per worker thread. Tasks are plain Rust objects
//! wrapped in a 32-byte [`Task`] handle; they talk to each other only by
//! messages over per-thread-pair SPSC queues, and move between threads by
//! an ownership-transfer protocol carried on those same queues.

pub mod barrier;
pub mod context;
pub mod dispatch;
pub mod metrics;
pub mod owned;
pub mod router;
pub mod runtime;
pub mod subsystem;
pub mod task;
pub mod taskmaster;

pub use barrier::FrameBarrier;
pub use context::TaskContext;
pub use metrics::{FrameStats, RuntimeSummary};
pub use router::{Route, Router};
pub use runtime::{active_thread, init_task_masters, Runtime, RunningRuntime};
pub use subsystem::FrameSubsystem;
pub use task::{MessageHandler, MessageResult, Permission, Task, TaskStatus, Updatable};
pub use taskmaster::{TaskMaster, TaskMasterState};
