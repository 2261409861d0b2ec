mod cli;
mod sim;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use kestrel_core::{load_dotenv, KestrelConfig};

use crate::cli::CliArgs;
use crate::sim::SimPlan;

fn main() -> Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_names(true)
        .init();

    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => KestrelConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => KestrelConfig::from_env().context("invalid configuration")?,
    };
    if let Some(threads) = args.threads {
        config.threads.count = threads;
    }
    if let Some(fps) = args.fps {
        config.frame.target_fps = fps;
    }
    config.validate().context("invalid configuration")?;

    let plan = SimPlan {
        frames: args.frames,
        tasks_per_thread: args.tasks_per_thread,
        migrate_every: args.migrate_every,
    };
    info!(
        threads = config.threads.count,
        target_fps = config.frame.target_fps,
        frames = plan.frames,
        tasks_per_thread = plan.tasks_per_thread,
        migrate_every = plan.migrate_every,
        "starting simulation"
    );

    let report = sim::run(config, &plan)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let s = &report.summary;
    println!(
        "{} threads, {} frames, {} messages ({} forwarded, {} dropped), {} updates, {} transfers",
        s.threads,
        s.frames,
        s.messages_processed,
        s.messages_forwarded,
        s.messages_dropped,
        s.updates,
        s.tasks_transferred
    );
    println!(
        "volleys {}, beats {}, hops requested {}",
        report.volleys, report.beats, report.hops_requested
    );
    for t in &report.threads {
        println!(
            "  {:>4}  frames {:>7}  msgs {:>9}  updates {:>9}  peak tasks {:>5}  avg {:.3} ms",
            t.thread.to_string(),
            t.frames,
            t.messages_processed,
            t.updates,
            t.peak_tasks_owned,
            t.avg_frame_ms()
        );
    }
    Ok(())
}
