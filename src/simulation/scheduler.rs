//! Mobility scheduler: drives trajectories on the simulated clock and keeps
//! link parameters converged.
//!
//! Two background threads share one [`SimulationContext`]:
//!
//! - `mobility-advance` ticks every `step` simulated seconds, advances each due
//!   trajectory in registration order, writes the new position and evaluates
//!   the moved node (and any peer whose edge flipped). It is the only writer
//!   of node positions.
//! - `mobility-evaluate` re-evaluates every mobile node so that peers moving
//!   around a stationary node are picked up. It sleeps on a condition variable
//!   until positions move or the re-evaluation interval elapses.
//!
//! Stopping is cooperative. Both loops check the liveness flag at the top of
//! each iteration, so an iteration in progress always completes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::control::DirectiveSink;

use super::clock::SimulationClock;
use super::context::SimulationContext;
use super::link_quality::LinkQualityEngine;
use super::trajectory::{MotionState, Trajectory};
use super::types::NodeId;

/// Which repetitions are walked backwards when reversal is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReversalParity {
    /// Repetitions 1, 3, 5, ... (round trips).
    #[default]
    Odd,
    /// Repetitions 0, 2, 4, ...
    Even,
}

impl ReversalParity {
    pub fn reverses(self, repetition: u32) -> bool {
        match self {
            ReversalParity::Odd => repetition % 2 == 1,
            ReversalParity::Even => repetition % 2 == 0,
        }
    }
}

/// One mobility session.
#[derive(Debug, Clone)]
pub struct MobilityPlan {
    /// No trajectory advances before this many seconds into a repetition.
    pub init_time: f64,
    /// Length of one repetition in simulated seconds.
    pub final_time: f64,
    pub repetitions: u32,
    pub reverse: bool,
    pub reverse_parity: ReversalParity,
    pub trajectories: Vec<Trajectory>,
}

impl MobilityPlan {
    fn reversed_on(&self, repetition: u32) -> bool {
        self.reverse && self.reverse_parity.reverses(repetition)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    /// Longest wall-clock sleep between iterations of the advance loop; the
    /// loop wakes earlier when the next tick is due sooner.
    pub polling_interval: Duration,
    /// Upper bound on the wall-clock wait between re-evaluation passes.
    pub reevaluation_interval: Duration,
    /// Simulated seconds per tick.
    pub step: f64,
    pub speed_percent: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_millis(10),
            reevaluation_interval: Duration::from_millis(100),
            step: 1.0,
            speed_percent: 100,
        }
    }
}

/// Liveness flag plus a "positions moved" generation counter both loops
/// sleep on.
#[derive(Default)]
struct Liveness {
    alive: AtomicBool,
    generation: Mutex<u64>,
    wake: Condvar,
}

impl Liveness {
    fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            ..Self::default()
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn stop(&self) {
        self.alive.store(false, Ordering::Release);
        // Taking the lock orders the store before any waiter's predicate check.
        let _guard = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        self.wake.notify_all();
    }

    fn generation(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_moved(&self) {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        self.wake.notify_all();
    }

    /// Wait until the generation moves past `seen`, the timeout passes or the
    /// scheduler is stopped. Returns the generation observed on wake-up.
    fn wait_for_move(&self, seen: u64, timeout: Duration) -> u64 {
        let guard = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, timeout, |generation| *generation == seen && self.is_alive())
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Sleep for `timeout` unless stopped first.
    fn sleep(&self, timeout: Duration) {
        let guard = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .wake
            .wait_timeout_while(guard, timeout, |_| self.is_alive())
            .unwrap_or_else(PoisonError::into_inner);
    }
}

struct Shared {
    ctx: Arc<SimulationContext>,
    engine: LinkQualityEngine,
    sink: Arc<dyn DirectiveSink>,
    clock: SimulationClock,
    liveness: Liveness,
    settings: SchedulerSettings,
    mobile: Vec<NodeId>,
    motion: Mutex<Vec<(NodeId, MotionState)>>,
}

impl Shared {
    /// Evaluate `node_id` and then every peer whose edge it flipped.
    fn evaluate_with_peers(&self, node_id: NodeId) {
        let evaluation = self.engine.evaluate(&self.ctx, node_id, self.sink.as_ref());
        for peer in evaluation.changed_peers {
            self.engine.evaluate(&self.ctx, peer, self.sink.as_ref());
        }
    }

    fn publish_motion(&self, trajectories: &[Trajectory]) {
        let mut motion = self.motion.lock().unwrap_or_else(PoisonError::into_inner);
        motion.clear();
        motion.extend(trajectories.iter().map(|t| (t.node_id(), t.state())));
    }
}

pub struct MobilityScheduler {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl MobilityScheduler {
    /// Validate the plan and spin up both loops. Returns as soon as the
    /// threads are running.
    pub fn start(
        ctx: Arc<SimulationContext>,
        engine: LinkQualityEngine,
        mut plan: MobilityPlan,
        settings: SchedulerSettings,
        sink: Arc<dyn DirectiveSink>,
    ) -> anyhow::Result<Self> {
        if plan.repetitions == 0 {
            bail!("mobility plan needs at least one repetition");
        }
        if settings.step.is_nan() || settings.step <= 0.0 {
            bail!("tick step must be positive, got {}", settings.step);
        }
        if plan.final_time.is_nan() || plan.init_time.is_nan() || plan.init_time < 0.0 || plan.final_time < plan.init_time {
            bail!("invalid session window: init {} s, final {} s", plan.init_time, plan.final_time);
        }

        let mut seen = HashSet::new();
        for trajectory in &plan.trajectories {
            let id = trajectory.node_id();
            if ctx.node(id).is_none() {
                bail!("trajectory references unknown node {}", id);
            }
            if !seen.insert(id) {
                bail!("node {} has more than one trajectory", id);
            }
        }
        plan.trajectories.sort_by_key(|t| ctx.registration_index(t.node_id()));

        let shared = Arc::new(Shared {
            ctx,
            engine,
            sink,
            clock: SimulationClock::new(settings.speed_percent),
            liveness: Liveness::new(),
            mobile: plan.trajectories.iter().map(Trajectory::node_id).collect(),
            motion: Mutex::new(plan.trajectories.iter().map(|t| (t.node_id(), t.state())).collect()),
            settings,
        });

        log::info!(
            "Starting mobility: {} mobile node(s), {} repetition(s) of {:.1} s",
            shared.mobile.len(),
            plan.repetitions,
            plan.final_time
        );

        // Dropping a partially started scheduler stops and joins what is running.
        let mut scheduler = Self {
            shared,
            handles: Vec::with_capacity(2),
        };

        let advance = Arc::clone(&scheduler.shared);
        scheduler.handles.push(
            thread::Builder::new()
                .name("mobility-advance".into())
                .spawn(move || advance_loop(&advance, plan))
                .context("failed to start mobility advance thread")?,
        );

        let evaluate = Arc::clone(&scheduler.shared);
        scheduler.handles.push(
            thread::Builder::new()
                .name("mobility-evaluate".into())
                .spawn(move || evaluation_loop(&evaluate))
                .context("failed to start link evaluation thread")?,
        );

        Ok(scheduler)
    }

    /// Ask both loops to exit after their current iteration.
    pub fn stop(&self) {
        if self.shared.liveness.is_alive() {
            log::info!("Stopping mobility");
        }
        self.shared.liveness.stop();
    }

    pub fn is_running(&self) -> bool {
        self.shared.liveness.is_alive()
    }

    /// Block until both loops have exited, either through [`stop`](Self::stop)
    /// or because the session completed.
    pub fn join(mut self) {
        self.join_threads();
    }

    fn join_threads(&mut self) {
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("mobility").to_string();
            if handle.join().is_err() {
                log::error!("Thread {} panicked", name);
            }
        }
    }

    pub fn set_speed_percent(&self, percent: u32) {
        self.shared.clock.set_speed_percent(percent);
    }

    /// Simulated seconds into the current repetition.
    pub fn elapsed_secs(&self) -> f64 {
        self.shared.clock.elapsed_secs()
    }

    /// Motion state per mobile node, in evaluation order.
    pub fn motion_states(&self) -> Vec<(NodeId, MotionState)> {
        self.shared.motion.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Drop for MobilityScheduler {
    fn drop(&mut self) {
        self.stop();
        self.join_threads();
    }
}

fn advance_loop(shared: &Shared, mut plan: MobilityPlan) {
    let step = shared.settings.step;

    for repetition in 0..plan.repetitions {
        if !shared.liveness.is_alive() {
            return;
        }
        let reversed = plan.reversed_on(repetition);
        for trajectory in &mut plan.trajectories {
            trajectory.restart(reversed);
        }
        shared.clock.restart();
        log::info!("Mobility repetition {}/{}{}", repetition + 1, plan.repetitions, if reversed { " (reversed)" } else { "" });

        let mut next_tick = 0u64;
        loop {
            if !shared.liveness.is_alive() {
                return;
            }
            let elapsed = shared.clock.elapsed_secs();
            if elapsed >= plan.final_time {
                break;
            }
            if elapsed >= plan.init_time && elapsed >= next_tick as f64 * step {
                next_tick = (elapsed / step).floor() as u64 + 1;
                advance_tick(shared, &mut plan.trajectories, elapsed, step);
            }
            let due = shared.clock.real_instant_at((next_tick as f64 * step).max(plan.init_time));
            let wait = due.saturating_duration_since(Instant::now());
            shared.liveness.sleep(wait.min(shared.settings.polling_interval));
        }

        // Closing tick at the end of the repetition pins nodes whose window has passed.
        advance_tick(shared, &mut plan.trajectories, plan.final_time, step);
    }

    log::info!("Mobility session complete");
    shared.liveness.stop();
}

fn advance_tick(shared: &Shared, trajectories: &mut [Trajectory], elapsed: f64, step: f64) {
    let mut moved = false;
    for trajectory in trajectories.iter_mut() {
        let Some(position) = trajectory.advance(elapsed, step) else {
            continue;
        };
        if let Some(node) = shared.ctx.node(trajectory.node_id()) {
            node.set_position(position);
            moved = true;
            shared.evaluate_with_peers(trajectory.node_id());
        }
    }
    shared.publish_motion(trajectories);
    if moved {
        shared.liveness.notify_moved();
    }
}

fn evaluation_loop(shared: &Shared) {
    let mut seen = shared.liveness.generation();
    while shared.liveness.is_alive() {
        for &node_id in &shared.mobile {
            shared.engine.evaluate(&shared.ctx, node_id, shared.sink.as_ref());
        }
        seen = shared.liveness.wait_for_move(seen, shared.settings.reevaluation_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{Directive, EdgeAction};
    use crate::simulation::link_quality::LinkMetrics;
    use crate::simulation::types::Position;
    use crate::test_helpers::{RecordingSink, context, node_at};

    fn fast_settings() -> SchedulerSettings {
        SchedulerSettings {
            polling_interval: Duration::from_millis(1),
            reevaluation_interval: Duration::from_millis(5),
            step: 0.1,
            speed_percent: 1000,
        }
    }

    fn plan(trajectories: Vec<Trajectory>, final_time: f64, repetitions: u32, reverse: bool) -> MobilityPlan {
        MobilityPlan {
            init_time: 0.0,
            final_time,
            repetitions,
            reverse,
            reverse_parity: ReversalParity::Odd,
            trajectories,
        }
    }

    fn start(ctx: &Arc<SimulationContext>, plan: MobilityPlan, settings: SchedulerSettings, sink: &Arc<RecordingSink>) -> MobilityScheduler {
        MobilityScheduler::start(
            Arc::clone(ctx),
            LinkQualityEngine::new(LinkMetrics::default()),
            plan,
            settings,
            Arc::clone(sink) as Arc<dyn DirectiveSink>,
        )
        .unwrap()
    }

    #[test]
    fn parity_selects_reversed_repetitions() {
        assert!(!ReversalParity::Odd.reverses(0));
        assert!(ReversalParity::Odd.reverses(1));
        assert!(ReversalParity::Even.reverses(0));
        assert!(!ReversalParity::Even.reverses(3));
    }

    #[test]
    fn session_moves_node_into_range_and_completes() {
        let ctx = Arc::new(context(vec![node_at(1, 0.0, 0.0, 10.0), node_at(2, 20.0, 0.0, 10.0)]));
        let trajectory = Trajectory::new(2, &[Position::new(20.0, 0.0, 0.0), Position::new(5.0, 0.0, 0.0)], 0.0, 1.0).unwrap();
        let sink = Arc::new(RecordingSink::new());

        let scheduler = start(&ctx, plan(vec![trajectory], 1.5, 1, false), fast_settings(), &sink);
        assert_eq!(scheduler.motion_states().len(), 1);
        while scheduler.is_running() {
            thread::sleep(Duration::from_millis(5));
        }
        let states = scheduler.motion_states();
        scheduler.join();

        assert_eq!(states, vec![(2, MotionState::Arrived)]);
        assert_eq!(ctx.node(2).unwrap().position(), Position::new(5.0, 0.0, 0.0));
        assert!(ctx.graph().has_edge(1, 2));
        assert_eq!(sink.edge_directives(EdgeAction::Add)[..2], [(2, 1), (1, 2)]);
        assert!(
            sink.snapshot()
                .iter()
                .any(|d| matches!(d, Directive::Shaping(s) if s.node_id == 2))
        );
    }

    #[test]
    fn nothing_moves_before_init_time() {
        let ctx = Arc::new(context(vec![node_at(1, 0.0, 0.0, 10.0)]));
        let trajectory = Trajectory::new(1, &[Position::new(3.0, 0.0, 0.0), Position::new(8.0, 0.0, 0.0)], 0.0, 0.4).unwrap();
        let sink = Arc::new(RecordingSink::new());
        let settings = SchedulerSettings {
            speed_percent: 100,
            ..fast_settings()
        };
        let session = MobilityPlan {
            init_time: 0.3,
            ..plan(vec![trajectory], 0.6, 1, false)
        };

        // 0.3 s of simulated time is 300 ms of wall time at normal speed.
        let scheduler = start(&ctx, session, settings, &sink);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(scheduler.motion_states(), vec![(1, MotionState::Idle)]);
        assert_eq!(ctx.node(1).unwrap().position(), Position::new(0.0, 0.0, 0.0));

        while scheduler.is_running() {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(scheduler.motion_states(), vec![(1, MotionState::Arrived)]);
        scheduler.join();
        assert_eq!(ctx.node(1).unwrap().position(), Position::new(8.0, 0.0, 0.0));
    }

    #[test]
    fn round_trip_returns_to_start() {
        let ctx = Arc::new(context(vec![node_at(1, 0.0, 0.0, 10.0)]));
        let trajectory = Trajectory::new(1, &[Position::new(0.0, 0.0, 0.0), Position::new(4.0, 0.0, 0.0)], 0.0, 0.4).unwrap();
        let sink = Arc::new(RecordingSink::new());

        let scheduler = start(&ctx, plan(vec![trajectory], 1.0, 2, true), fast_settings(), &sink);
        scheduler.join();
        assert_eq!(ctx.node(1).unwrap().position(), Position::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn stopped_scheduler_issues_nothing_further() {
        let ctx = Arc::new(context(vec![node_at(1, 0.0, 0.0, 500.0), node_at(2, 10.0, 0.0, 500.0)]));
        let trajectory = Trajectory::new(2, &[Position::new(10.0, 0.0, 0.0), Position::new(400.0, 0.0, 0.0)], 0.0, 1000.0).unwrap();
        let sink = Arc::new(RecordingSink::new());
        let settings = SchedulerSettings {
            speed_percent: 100,
            ..fast_settings()
        };

        let scheduler = start(&ctx, plan(vec![trajectory], 1000.0, 1, false), settings, &sink);
        thread::sleep(Duration::from_millis(50));
        scheduler.stop();
        assert!(!scheduler.is_running());
        scheduler.join();

        let issued = sink.len();
        let position = ctx.node(2).unwrap().position();
        assert!(issued > 0);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sink.len(), issued);
        assert_eq!(ctx.node(2).unwrap().position(), position);
    }

    #[test]
    fn rejects_unknown_nodes_and_empty_sessions() {
        let ctx = Arc::new(context(vec![node_at(1, 0.0, 0.0, 10.0)]));
        let sink: Arc<dyn DirectiveSink> = Arc::new(RecordingSink::new());
        let stray = Trajectory::new(9, &[Position::default(), Position::new(1.0, 0.0, 0.0)], 0.0, 1.0).unwrap();

        let err = MobilityScheduler::start(
            Arc::clone(&ctx),
            LinkQualityEngine::new(LinkMetrics::default()),
            plan(vec![stray], 1.0, 1, false),
            SchedulerSettings::default(),
            Arc::clone(&sink),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("unknown node 9"));

        let err = MobilityScheduler::start(
            ctx,
            LinkQualityEngine::new(LinkMetrics::default()),
            plan(Vec::new(), 1.0, 0, false),
            SchedulerSettings::default(),
            sink,
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("repetition"));
    }
}
