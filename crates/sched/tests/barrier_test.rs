//! Integration test for frame ordering between the primary and auxiliaries.
//!
//! The primary counts its completed subsystem passes; auxiliary tasks count
//! their updates. Neither side may observe the other lagging by a full frame.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use kestrel_core::{KestrelConfig, ThreadId};
use kestrel_fabric::MessageRef;
use kestrel_sched::{
    init_task_masters, FrameSubsystem, MessageHandler, MessageResult, Task, TaskContext, Updatable,
};

const TIMEOUT: Duration = Duration::from_secs(10);
const FRAMES: u64 = 200;
const AUX: usize = 3;

#[derive(Default)]
struct Counters {
    /// Bumped by the primary subsystem, before the primary signals the frame.
    primary_frames: AtomicU64,
    /// Bumped by each auxiliary task on update, before its thread arrives.
    aux_updates: [AtomicU64; AUX],
    violations: AtomicUsize,
}

struct PrimaryTracker {
    counters: Arc<Counters>,
}

impl FrameSubsystem for PrimaryTracker {
    fn name(&self) -> &str {
        "primary-tracker"
    }

    fn update(&mut self, _delta: f32, ctx: &mut TaskContext<'_>) {
        let frame = self.counters.primary_frames.load(Ordering::SeqCst);
        if frame >= FRAMES {
            return;
        }
        // Every auxiliary finished frames 0..frame before this one began.
        for done in &self.counters.aux_updates {
            if done.load(Ordering::SeqCst) < frame {
                self.counters.violations.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.counters.primary_frames.store(frame + 1, Ordering::SeqCst);
        if frame + 1 == FRAMES {
            ctx.fin();
        }
    }
}

struct AuxTracker {
    slot: usize,
    counters: Arc<Counters>,
}

impl MessageHandler for AuxTracker {
    fn message(&mut self, _msg: &MessageRef<'_>, _ctx: &mut TaskContext<'_>) -> MessageResult {
        MessageResult::Consumed
    }
}

impl Updatable for AuxTracker {
    fn update(&mut self, _delta: f32, _ctx: &mut TaskContext<'_>) {
        let k = self.counters.aux_updates[self.slot].load(Ordering::SeqCst);
        // Frame k starts only after the primary signalled frame k - 1.
        if self.counters.primary_frames.load(Ordering::SeqCst) < k {
            self.counters.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.counters.aux_updates[self.slot].store(k + 1, Ordering::SeqCst);
    }
}

#[test]
fn primary_and_auxiliaries_stay_in_lockstep() {
    let mut config = KestrelConfig::with_threads(AUX + 1);
    config.frame.target_fps = 0;
    let mut rt = init_task_masters(config).unwrap();

    let counters = Arc::new(Counters::default());
    rt.primary_mut().add_subsystem(Box::new(PrimaryTracker {
        counters: counters.clone(),
    }));
    for slot in 0..AUX {
        let aux = Task::create_updatable(
            Box::new(AuxTracker {
                slot,
                counters: counters.clone(),
            }),
            0,
        );
        rt.adopt_task(ThreadId::new(slot + 1), aux);
    }

    let running = rt.start().unwrap();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(running.join());
    });
    let stats = rx
        .recv_timeout(TIMEOUT)
        .expect("runtime did not shut down in time")
        .unwrap();

    assert_eq!(counters.violations.load(Ordering::SeqCst), 0);
    assert_eq!(counters.primary_frames.load(Ordering::SeqCst), FRAMES);
    for done in &counters.aux_updates {
        assert!(done.load(Ordering::SeqCst) >= FRAMES - 1);
    }
    assert_eq!(stats.len(), AUX + 1);
}
