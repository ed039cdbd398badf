use anyhow::{Context, bail};
use env_logger::Builder;
use log::{LevelFilter, debug, error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::common::scene::{build_simulation, load_scene};
use crate::control::{CommandSink, DirectiveSink, EngineConfig, LogSink};
use crate::simulation::handover::HandoverPolicy;
use crate::simulation::link_quality::LinkQualityEngine;
use crate::simulation::scheduler::MobilityScheduler;
use crate::simulation::types::NodeId;

mod common;
mod control;
mod simulation;
#[cfg(test)]
mod test_helpers;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
const USAGE: &str = "usage: mobility-link-emulator <scene.json> [config.toml]";

fn main() -> ExitCode {
    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("mobility_link_emulator"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(scene_path) = args.next() else {
        bail!(USAGE);
    };
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| EngineConfig::config_path_from_scene(&scene_path));

    let config = EngineConfig::load_or_default(&config_path)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("config {}", config_path.display()))?;
    let scene = load_scene(&scene_path).with_context(|| format!("scene {}", scene_path))?;
    let access_points: Vec<NodeId> = scene.associations.iter().map(|a| a.access_point).collect();
    let setup = build_simulation(&scene)?;
    let ctx = Arc::new(setup.context);

    info!("Loaded {} node(s) from {}", ctx.nodes().len(), scene_path);

    let sink: Arc<dyn DirectiveSink> = if config.dry_run {
        info!("Dry run: directives are logged, not executed");
        Arc::new(LogSink)
    } else {
        Arc::new(CommandSink::from_context(&ctx, config.use_sudo))
    };

    // Establish the initial topology before anything moves.
    let engine = LinkQualityEngine::new(config.link_metrics.clone());
    for node in ctx.nodes() {
        engine.evaluate(&ctx, node.node_id, sink.as_ref());
    }

    let handover = HandoverPolicy::new(config.handover);
    handover.review(&ctx, &access_points, sink.as_ref());

    match setup.plan {
        Some(plan) => {
            let scheduler = MobilityScheduler::start(Arc::clone(&ctx), engine, plan, config.scheduler_settings(), Arc::clone(&sink))?;
            while scheduler.is_running() {
                thread::sleep(PROGRESS_INTERVAL);
                debug!("t = {:.1} s, motion {:?}", scheduler.elapsed_secs(), scheduler.motion_states());
            }
            scheduler.join();
            handover.review(&ctx, &access_points, sink.as_ref());
        }
        None => info!("Scene has no mobility block, topology is static"),
    }

    let graph = ctx.graph();
    info!("Finished with {} active edge(s)", graph.edge_count());
    Ok(())
}
