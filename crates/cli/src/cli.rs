use std::path::PathBuf;

use clap::Parser;

/// Drive a threaded TaskMaster runtime with synthetic load.
///
/// Every thread hosts one side of a ping-pong pair with its neighbour plus a
/// set of wandering tasks that hop to the next thread on a fixed cadence.
/// The run stops after `--frames` primary frames and prints per-thread stats.
#[derive(Parser, Debug)]
#[command(name = "kestrel-sim", version, about)]
pub struct CliArgs {
    /// Path to a kestrel.toml config file (defaults plus env overrides if unset).
    #[arg(long, env = "KESTREL_CONFIG")]
    pub config: Option<PathBuf>,

    /// TaskMaster thread count, overrides the config file.
    #[arg(long)]
    pub threads: Option<usize>,

    /// Target frames per second, overrides the config file. 0 runs unpaced.
    #[arg(long)]
    pub fps: Option<u32>,

    /// Primary frames to run before shutting down.
    #[arg(long, env = "KESTREL_SIM_FRAMES", default_value_t = 600,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub frames: u64,

    /// Wandering tasks started on each thread.
    #[arg(long, env = "KESTREL_SIM_TASKS_PER_THREAD", default_value_t = 8)]
    pub tasks_per_thread: usize,

    /// Updates between hops for wandering tasks (0 = never move).
    #[arg(long, env = "KESTREL_SIM_MIGRATE_EVERY", default_value_t = 30)]
    pub migrate_every: u32,

    /// Print the final report as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}
