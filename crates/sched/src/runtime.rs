//! Bootstrapping: builds the queue mesh and one TaskMaster per thread, then
//! runs them on their own OS threads.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info};

use kestrel_core::{KestrelConfig, KestrelError, TaskId, ThreadId};
use kestrel_fabric::{message_queue, MessageConsumer, MessageProducer};

use crate::barrier::FrameBarrier;
use crate::metrics::FrameStats;
use crate::task::Task;
use crate::taskmaster::TaskMaster;

thread_local! {
    static ACTIVE_THREAD: Cell<Option<ThreadId>> = const { Cell::new(None) };
}

/// The TaskMaster running on the calling OS thread, if any.
pub fn active_thread() -> Option<ThreadId> {
    ACTIVE_THREAD.with(Cell::get)
}

/// Bind the calling OS thread to `thread`. Binding twice is a bug.
pub(crate) fn bind_thread(thread: ThreadId) {
    ACTIVE_THREAD.with(|slot| {
        if let Some(existing) = slot.get() {
            panic!("OS thread already hosts TaskMaster {existing}, cannot host {thread}");
        }
        slot.set(Some(thread));
    });
}

/// State every TaskMaster of one runtime shares.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) barrier: FrameBarrier,
    pub(crate) shutdown_requested: AtomicBool,
    /// Set when a TaskMaster's frame loop panicked.
    pub(crate) abandoned: AtomicBool,
    pub(crate) frame_budget: Option<Duration>,
    pub(crate) max_delta: Duration,
}

/// TaskMasters built but not yet running. Seed tasks and subsystems here,
/// then [`run`](Runtime::run) or [`start`](Runtime::start).
#[derive(Debug)]
pub struct Runtime {
    masters: Vec<TaskMaster>,
    shared: Arc<Shared>,
}

/// Build `config.threads.count` initialized TaskMasters wired with one
/// queue per ordered (source, destination) pair, loopbacks included.
pub fn init_task_masters(config: KestrelConfig) -> Result<Runtime, KestrelError> {
    config.validate()?;
    let count = config.threads.count;
    let capacity = config.queues.capacity_blocks;

    // outbound[src][dst] and inbound[dst][src] are the two ends of one queue.
    let mut outbound: Vec<Vec<MessageProducer>> =
        (0..count).map(|_| Vec::with_capacity(count)).collect();
    let mut inbound: Vec<Vec<MessageConsumer>> =
        (0..count).map(|_| Vec::with_capacity(count)).collect();
    for dst in 0..count {
        for src in 0..count {
            let (producer, consumer) = message_queue(capacity)
                .map_err(|e| KestrelError::Config(format!("queue {src} -> {dst}: {e}")))?;
            outbound[src].push(producer);
            inbound[dst].push(consumer);
        }
    }

    let shared = Arc::new(Shared {
        barrier: FrameBarrier::new(count - 1),
        shutdown_requested: AtomicBool::new(false),
        abandoned: AtomicBool::new(false),
        frame_budget: config.frame_budget(),
        max_delta: config.max_delta(),
    });

    let masters = inbound
        .into_iter()
        .zip(outbound)
        .enumerate()
        .map(|(index, (inbox, outbox))| {
            let mut master = TaskMaster::new(
                ThreadId::new(index),
                inbox,
                outbox,
                config.tasks.owned_capacity,
                Arc::clone(&shared),
            );
            master.init()?;
            Ok(master)
        })
        .collect::<Result<Vec<_>, KestrelError>>()?;

    info!(
        threads = count,
        capacity_blocks = capacity,
        target_fps = config.frame.target_fps,
        "TaskMasters initialized"
    );
    Ok(Runtime { masters, shared })
}

impl Runtime {
    pub fn thread_count(&self) -> usize {
        self.masters.len()
    }

    pub fn primary_mut(&mut self) -> &mut TaskMaster {
        &mut self.masters[0]
    }

    pub fn task_master_mut(&mut self, thread: ThreadId) -> &mut TaskMaster {
        &mut self.masters[thread.index()]
    }

    /// Seed `task` on TaskMaster `thread` before the runtime runs.
    ///
    /// Every TaskMaster records the owner directly, so seeding queues no
    /// messages and any number of tasks can be adopted up front.
    pub fn adopt_task(&mut self, thread: ThreadId, task: Task) -> TaskId {
        assert!(
            thread.index() < self.masters.len(),
            "cannot adopt onto TaskMaster {thread}, only {} exist",
            self.masters.len()
        );
        let id = task.id();
        if self.masters[thread.index()].adopt(task) {
            for master in &mut self.masters {
                master.record_owner(id, thread);
            }
        }
        id
    }

    /// All TaskMasters, indexed by thread. Useful for driving frames by
    /// hand without spawning threads.
    pub fn task_masters_mut(&mut self) -> &mut [TaskMaster] {
        &mut self.masters
    }

    /// Spawn every TaskMaster, the primary included, on its own thread.
    pub fn start(self) -> Result<RunningRuntime, KestrelError> {
        let shared = self.shared;
        let mut handles = Vec::with_capacity(self.masters.len());
        for master in self.masters {
            let thread = master.thread_id();
            match spawn(master) {
                Ok(handle) => handles.push((thread, handle)),
                Err(source) => {
                    error!(%thread, error = %source, "failed to spawn TaskMaster thread");
                    shared.abandoned.store(true, Ordering::Release);
                    shared.barrier.retire_primary();
                    return Err(KestrelError::ThreadSpawn { thread, source });
                }
            }
        }
        Ok(RunningRuntime { handles, shared })
    }

    /// Spawn the auxiliaries and run the primary on the calling thread until
    /// shutdown completes, then join everything.
    pub fn run(self) -> Result<Vec<FrameStats>, KestrelError> {
        let shared = self.shared;
        let mut masters = self.masters.into_iter();
        let Some(mut primary) = masters.next() else {
            return Err(KestrelError::Config("runtime has no TaskMasters".into()));
        };

        let mut handles = Vec::new();
        for master in masters {
            let thread = master.thread_id();
            match spawn(master) {
                Ok(handle) => handles.push((thread, handle)),
                Err(source) => {
                    error!(%thread, error = %source, "failed to spawn TaskMaster thread");
                    shared.abandoned.store(true, Ordering::Release);
                    shared.barrier.retire_primary();
                    return Err(KestrelError::ThreadSpawn { thread, source });
                }
            }
        }

        primary.run();
        let mut stats = vec![primary.into_stats()];
        stats.extend(RunningRuntime { handles, shared }.join()?);
        Ok(stats)
    }
}

fn spawn(mut master: TaskMaster) -> std::io::Result<JoinHandle<FrameStats>> {
    thread::Builder::new()
        .name(format!("taskmaster-{}", master.thread_id()))
        .spawn(move || {
            master.run();
            master.into_stats()
        })
}

/// Handle to TaskMasters running on their own threads.
#[derive(Debug)]
pub struct RunningRuntime {
    handles: Vec<(ThreadId, JoinHandle<FrameStats>)>,
    shared: Arc<Shared>,
}

impl RunningRuntime {
    /// Ask every TaskMaster to finalize at the start of its next frame.
    pub fn request_shutdown(&self) {
        self.shared.shutdown_requested.store(true, Ordering::Release);
    }

    /// Frames the primary has completed.
    pub fn frame(&self) -> u64 {
        self.shared.barrier.frame()
    }

    /// Wait for every TaskMaster thread to finish and collect its stats.
    pub fn join(self) -> Result<Vec<FrameStats>, KestrelError> {
        let mut stats = Vec::with_capacity(self.handles.len());
        let mut panicked = None;
        for (thread, handle) in self.handles {
            match handle.join() {
                Ok(s) => stats.push(s),
                Err(_) => {
                    error!(%thread, "TaskMaster thread panicked");
                    panicked.get_or_insert(thread);
                }
            }
        }
        match panicked {
            Some(thread) => Err(KestrelError::ThreadPanicked(thread)),
            None => Ok(stats),
        }
    }
}
