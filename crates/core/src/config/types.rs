use serde::{Deserialize, Serialize};

use crate::ids::MAX_THREADS;

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration for the scheduling core.
///
/// Parsed from `kestrel.toml` with support for environment variable overrides.
/// Thread count and queue sizing are supplied once at startup and never change
/// for the lifetime of a runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KestrelConfig {
    /// TaskMaster thread pool.
    #[serde(default)]
    pub threads: ThreadsConfig,

    /// Per-peer message queue sizing.
    #[serde(default)]
    pub queues: QueuesConfig,

    /// Ownership map reservations.
    #[serde(default)]
    pub tasks: TasksConfig,

    /// Frame pacing on the primary TaskMaster.
    #[serde(default)]
    pub frame: FrameConfig,
}

// ── Section configs ─────────────────────────────────────────────────

/// Threads section: one TaskMaster per OS thread, thread 0 is primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadsConfig {
    /// Number of TaskMasters (1..=MAX_THREADS).
    #[serde(default = "default_thread_count")]
    pub count: usize,
}

fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_THREADS)
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            count: default_thread_count(),
        }
    }
}

/// Queue section. Every TaskMaster owns one inbound ring per peer (itself
/// included), each holding `capacity_blocks` 16-byte blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuesConfig {
    /// Ring capacity in blocks. Must be a power of two.
    #[serde(default = "default_capacity_blocks")]
    pub capacity_blocks: usize,
}

fn default_capacity_blocks() -> usize {
    4096
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            capacity_blocks: default_capacity_blocks(),
        }
    }
}

/// Task section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Initial capacity reserved in each TaskMaster's ownership maps.
    #[serde(default = "default_owned_capacity")]
    pub owned_capacity: usize,
}

fn default_owned_capacity() -> usize {
    256
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            owned_capacity: default_owned_capacity(),
        }
    }
}

/// Frame section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameConfig {
    /// Target frames per second for the primary loop. 0 runs unpaced.
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,

    /// Upper clamp for the delta handed to `update`, in milliseconds.
    #[serde(default = "default_max_delta_ms")]
    pub max_delta_ms: u64,
}

fn default_target_fps() -> u32 {
    60
}

fn default_max_delta_ms() -> u64 {
    100
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            max_delta_ms: default_max_delta_ms(),
        }
    }
}
