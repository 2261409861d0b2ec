//! Per-TaskMaster counters, reported when a TaskMaster shuts down.

use std::time::Duration;

use serde::Serialize;

use kestrel_core::ThreadId;

/// Accumulated stats for a single TaskMaster.
#[derive(Debug, Clone, Serialize)]
pub struct FrameStats {
    pub thread: ThreadId,
    /// Frames run to completion.
    pub frames: u64,
    /// Messages drained from inbound queues.
    pub messages_processed: u64,
    /// Messages pushed to any queue, loopback included.
    pub messages_sent: u64,
    /// Drained messages re-queued to the owning thread.
    pub messages_forwarded: u64,
    /// Drained messages whose target was unknown here.
    pub messages_dropped: u64,
    /// Task `update` calls made.
    pub updates: u64,
    /// Tasks received through `insert_task__`.
    pub tasks_inserted: u64,
    /// Tasks handed to another TaskMaster.
    pub tasks_transferred_out: u64,
    /// Largest number of tasks owned at once.
    pub peak_tasks_owned: usize,
    /// Wall time spent inside frames, barrier waits excluded.
    #[serde(skip)]
    pub busy: Duration,
}

impl FrameStats {
    pub fn new(thread: ThreadId) -> Self {
        Self {
            thread,
            frames: 0,
            messages_processed: 0,
            messages_sent: 0,
            messages_forwarded: 0,
            messages_dropped: 0,
            updates: 0,
            tasks_inserted: 0,
            tasks_transferred_out: 0,
            peak_tasks_owned: 0,
            busy: Duration::ZERO,
        }
    }

    /// Mean time per frame in milliseconds.
    pub fn avg_frame_ms(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        self.busy.as_secs_f64() * 1000.0 / self.frames as f64
    }

    pub(crate) fn observe_owned(&mut self, owned: usize) {
        self.peak_tasks_owned = self.peak_tasks_owned.max(owned);
    }
}

/// Sum of several TaskMasters' stats.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeSummary {
    pub threads: usize,
    pub frames: u64,
    pub messages_processed: u64,
    pub messages_forwarded: u64,
    pub messages_dropped: u64,
    pub updates: u64,
    pub tasks_transferred: u64,
}

impl RuntimeSummary {
    pub fn from_stats(stats: &[FrameStats]) -> Self {
        stats.iter().fold(
            RuntimeSummary {
                threads: stats.len(),
                ..Default::default()
            },
            |mut sum, s| {
                sum.frames = sum.frames.max(s.frames);
                sum.messages_processed += s.messages_processed;
                sum.messages_forwarded += s.messages_forwarded;
                sum.messages_dropped += s.messages_dropped;
                sum.updates += s.updates;
                sum.tasks_transferred += s.tasks_transferred_out;
                sum
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_frame_time() {
        let mut stats = FrameStats::new(ThreadId::PRIMARY);
        assert_eq!(stats.avg_frame_ms(), 0.0);
        stats.frames = 4;
        stats.busy = Duration::from_millis(10);
        assert!((stats.avg_frame_ms() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn summary_adds_counters_and_keeps_max_frames() {
        let mut a = FrameStats::new(ThreadId::new(0));
        a.frames = 10;
        a.updates = 3;
        a.tasks_transferred_out = 1;
        let mut b = FrameStats::new(ThreadId::new(1));
        b.frames = 9;
        b.updates = 4;
        b.messages_dropped = 2;

        let sum = RuntimeSummary::from_stats(&[a, b]);
        assert_eq!(sum.threads, 2);
        assert_eq!(sum.frames, 10);
        assert_eq!(sum.updates, 7);
        assert_eq!(sum.messages_dropped, 2);
        assert_eq!(sum.tasks_transferred, 1);

        let json = serde_json::to_value(&sum).unwrap();
        assert_eq!(json["updates"], 7);
    }
}
