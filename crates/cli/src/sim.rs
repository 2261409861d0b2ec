//! Synthetic workload for exercising a runtime end to end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use kestrel_core::message_id::hash_name;
use kestrel_core::{next_task_id, KestrelConfig, MessageId, TaskId, ThreadId};
use kestrel_fabric::MessageRef;
use kestrel_sched::{
    init_task_masters, FrameStats, FrameSubsystem, MessageHandler, MessageResult, Runtime,
    RuntimeSummary, Task, TaskContext, Updatable,
};

const VOLLEY: MessageId = MessageId::from_name("sim.volley");
const BEAT: MessageId = MessageId::from_name("sim.beat");

/// Workload shape, independent of the runtime config.
#[derive(Debug, Clone)]
pub struct SimPlan {
    pub frames: u64,
    pub tasks_per_thread: usize,
    pub migrate_every: u32,
}

#[derive(Debug, Default)]
struct Tallies {
    volleys: AtomicU64,
    beats: AtomicU64,
    hops_requested: AtomicU64,
}

/// Final report printed by the binary.
#[derive(Debug, Serialize)]
pub struct SimReport {
    pub summary: RuntimeSummary,
    pub volleys: u64,
    pub beats: u64,
    pub hops_requested: u64,
    pub threads: Vec<FrameStats>,
}

/// Returns every volley to whoever sent it. The serving side opens the
/// rally on its first update.
struct Pinger {
    partner: TaskId,
    serve: bool,
    tallies: Arc<Tallies>,
}

impl MessageHandler for Pinger {
    fn message(&mut self, msg: &MessageRef<'_>, ctx: &mut TaskContext<'_>) -> MessageResult {
        if msg.msg_id() != VOLLEY {
            return MessageResult::Consumed;
        }
        self.tallies.volleys.fetch_add(1, Ordering::Relaxed);
        ctx.send(VOLLEY, msg.source(), msg.payload().u32().wrapping_add(1), &[]);
        MessageResult::Consumed
    }
}

impl Updatable for Pinger {
    fn update(&mut self, _delta: f32, ctx: &mut TaskContext<'_>) {
        if self.serve {
            self.serve = false;
            ctx.send(VOLLEY, self.partner, 0u32, &[]);
        }
    }
}

/// Reports a heartbeat to the tally every update and periodically asks to
/// move to the next thread.
struct Wanderer {
    tally: TaskId,
    migrate_every: u32,
    updates: u32,
    tallies: Arc<Tallies>,
}

impl MessageHandler for Wanderer {
    fn message(&mut self, _msg: &MessageRef<'_>, _ctx: &mut TaskContext<'_>) -> MessageResult {
        MessageResult::Consumed
    }
}

impl Updatable for Wanderer {
    fn update(&mut self, _delta: f32, ctx: &mut TaskContext<'_>) {
        self.updates += 1;
        ctx.send(BEAT, self.tally, ctx.thread_id().index() as u32, &[]);
        if self.migrate_every == 0
            || ctx.thread_count() < 2
            || self.updates % self.migrate_every != 0
        {
            return;
        }
        let next = ThreadId::new((ctx.thread_id().index() + 1) % ctx.thread_count());
        let me = ctx.task_id();
        debug!(task = %me, to = %next, "requesting hop");
        self.tallies.hops_requested.fetch_add(1, Ordering::Relaxed);
        ctx.request_set_task_owner(me, next);
    }
}

/// Counts heartbeats on the primary.
struct Tally {
    tallies: Arc<Tallies>,
}

impl MessageHandler for Tally {
    fn message(&mut self, msg: &MessageRef<'_>, _ctx: &mut TaskContext<'_>) -> MessageResult {
        if msg.msg_id() == BEAT {
            self.tallies.beats.fetch_add(1, Ordering::Relaxed);
        }
        MessageResult::Consumed
    }
}

/// Ends the run after a fixed number of primary frames.
struct FrameLimit {
    remaining: u64,
}

impl FrameSubsystem for FrameLimit {
    fn name(&self) -> &str {
        "frame-limit"
    }

    fn enabled(&self) -> bool {
        self.remaining > 0
    }

    fn update(&mut self, _delta: f32, ctx: &mut TaskContext<'_>) {
        self.remaining -= 1;
        if self.remaining == 0 {
            info!("frame limit reached, shutting down");
            ctx.fin();
        }
    }
}

fn populate(rt: &mut Runtime, plan: &SimPlan, tallies: &Arc<Tallies>) {
    let threads = rt.thread_count();

    let tally = Task::create(
        Box::new(Tally {
            tallies: Arc::clone(tallies),
        }),
        hash_name("Tally"),
    );
    let tally = rt.adopt_task(ThreadId::PRIMARY, tally);

    for i in 0..threads {
        let server = next_task_id();
        let returner = next_task_id();
        let serving = Task::create_updatable_with_id(
            server,
            Box::new(Pinger {
                partner: returner,
                serve: true,
                tallies: Arc::clone(tallies),
            }),
            hash_name("Pinger"),
        );
        let returning = Task::create_updatable_with_id(
            returner,
            Box::new(Pinger {
                partner: server,
                serve: false,
                tallies: Arc::clone(tallies),
            }),
            hash_name("Pinger"),
        );
        rt.adopt_task(ThreadId::new(i), serving);
        rt.adopt_task(ThreadId::new((i + 1) % threads), returning);

        for _ in 0..plan.tasks_per_thread {
            let wanderer = Task::create_updatable(
                Box::new(Wanderer {
                    tally,
                    migrate_every: plan.migrate_every,
                    updates: 0,
                    tallies: Arc::clone(tallies),
                }),
                hash_name("Wanderer"),
            );
            rt.adopt_task(ThreadId::new(i), wanderer);
        }
    }

    rt.primary_mut().add_subsystem(Box::new(FrameLimit {
        remaining: plan.frames,
    }));
}

/// Build a runtime from `config`, load the workload and run it to completion
/// with the primary on the calling thread.
pub fn run(config: KestrelConfig, plan: &SimPlan) -> anyhow::Result<SimReport> {
    let mut rt = init_task_masters(config)?;
    let tallies = Arc::new(Tallies::default());
    populate(&mut rt, plan, &tallies);

    let threads = rt.run()?;
    Ok(SimReport {
        summary: RuntimeSummary::from_stats(&threads),
        volleys: tallies.volleys.load(Ordering::Relaxed),
        beats: tallies.beats.load(Ordering::Relaxed),
        hops_requested: tallies.hops_requested.load(Ordering::Relaxed),
        threads,
    })
}
