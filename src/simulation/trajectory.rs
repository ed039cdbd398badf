//! Trajectory planning and per-node traversal state.
//!
//! A trajectory is rasterized once into integer-grid samples (Bresenham line
//! over the dominant axis) and then walked one tick at a time inside the
//! node's `[start_time, end_time]` window. Reversed traversals reuse the same
//! samples backwards instead of re-planning.

use std::fmt;

use super::types::{MAX_COORDINATE, NodeId, Position, PositionParseError};

/// Rasterize the segment `start → end` onto the integer grid.
///
/// The axis with the larger delta drives: one sample per unit step along it,
/// with error accumulation on the other planar axis. The height is held
/// constant along the segment. Endpoints are normalized before stepping, so
/// `plan(a, b)` is exactly `plan(b, a)` reversed.
pub fn plan(start: &Position, end: &Position) -> Vec<Position> {
    let (mut x1, mut y1) = (start.x.round() as i64, start.y.round() as i64);
    let (mut x2, mut y2) = (end.x.round() as i64, end.y.round() as i64);
    let (mut z_first, mut z_last) = (start.z.round(), end.z.round());

    let steep = (y2 - y1).abs() > (x2 - x1).abs();
    if steep {
        std::mem::swap(&mut x1, &mut y1);
        std::mem::swap(&mut x2, &mut y2);
    }

    let reversed = x1 > x2;
    if reversed {
        std::mem::swap(&mut x1, &mut x2);
        std::mem::swap(&mut y1, &mut y2);
        std::mem::swap(&mut z_first, &mut z_last);
    }

    let delta_x = x2 - x1;
    let delta_y = (y2 - y1).abs();
    let y_step = if y1 < y2 { 1 } else { -1 };
    let mut error = delta_x / 2;
    let mut y = y1;

    let mut points = Vec::with_capacity(delta_x as usize + 1);
    for x in x1..=x2 {
        let (px, py) = if steep { (y, x) } else { (x, y) };
        points.push(Position::new(px as f64, py as f64, z_first));
        error -= delta_y;
        if error < 0 {
            y += y_step;
            error += delta_x;
        }
    }

    if reversed {
        points.reverse();
    }
    points
}

/// Rasterize a chain of waypoints; consecutive segments share their joint
/// sample instead of repeating it.
pub fn plan_waypoints(waypoints: &[Position]) -> Vec<Position> {
    let mut samples: Vec<Position> = Vec::new();
    for pair in waypoints.windows(2) {
        let segment = plan(&pair[0], &pair[1]);
        let skip = usize::from(samples.last().is_some_and(|last| segment.first() == Some(last)));
        samples.extend(segment.into_iter().skip(skip));
    }
    samples
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrajectoryError {
    Position(PositionParseError),
    TooFewWaypoints(usize),
    OutOfBounds(Position),
    InvalidWindow { start_time: f64, end_time: f64 },
}

impl fmt::Display for TrajectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrajectoryError::Position(err) => write!(f, "{}", err),
            TrajectoryError::TooFewWaypoints(n) => write!(f, "trajectory needs at least 2 waypoints, got {}", n),
            TrajectoryError::OutOfBounds(p) => write!(f, "waypoint {} exceeds the ±{} m coordinate bound", p, MAX_COORDINATE),
            TrajectoryError::InvalidWindow { start_time, end_time } => {
                write!(f, "invalid time window: start {} s must not exceed end {} s", start_time, end_time)
            }
        }
    }
}

impl std::error::Error for TrajectoryError {}

impl From<PositionParseError> for TrajectoryError {
    fn from(err: PositionParseError) -> Self {
        TrajectoryError::Position(err)
    }
}

/// Per-node motion state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    /// Waiting for the simulated clock to reach the start time.
    Idle,
    Moving,
    /// Final sample reached; the position is frozen until the next restart.
    Arrived,
}

#[derive(Debug, Clone)]
pub struct Trajectory {
    node_id: NodeId,
    samples: Vec<Position>,
    start_time: f64,
    end_time: f64,
    index: usize,
    state: MotionState,
    reversed: bool,
}

impl Trajectory {
    /// Build a trajectory through `waypoints` traversed within
    /// `[start_time, end_time]` seconds of the repetition's start.
    pub fn new(node_id: NodeId, waypoints: &[Position], start_time: f64, end_time: f64) -> Result<Self, TrajectoryError> {
        if waypoints.len() < 2 {
            return Err(TrajectoryError::TooFewWaypoints(waypoints.len()));
        }
        if let Some(p) = waypoints.iter().find(|p| !p.is_in_bounds()) {
            return Err(TrajectoryError::OutOfBounds(*p));
        }
        if start_time.is_nan() || end_time.is_nan() || start_time > end_time || start_time < 0.0 {
            return Err(TrajectoryError::InvalidWindow { start_time, end_time });
        }

        Ok(Self {
            node_id,
            samples: plan_waypoints(waypoints),
            start_time,
            end_time,
            index: 0,
            state: MotionState::Idle,
            reversed: false,
        })
    }

    /// Same as [`Trajectory::new`], parsing `"x,y,z"` coordinates first.
    pub fn from_coordinates<S: AsRef<str>>(node_id: NodeId, coordinates: &[S], start_time: f64, end_time: f64) -> Result<Self, TrajectoryError> {
        let waypoints = coordinates.iter().map(|c| c.as_ref().parse::<Position>()).collect::<Result<Vec<_>, _>>()?;
        Self::new(node_id, &waypoints, start_time, end_time)
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn samples(&self) -> &[Position] {
        &self.samples
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    pub fn current_position(&self) -> Position {
        self.samples[self.index]
    }

    fn last_index(&self) -> usize {
        self.samples.len() - 1
    }

    /// Samples advanced per tick so the final sample is reached by
    /// `end_time`; at least one.
    pub fn stride(&self, step_secs: f64) -> usize {
        let remaining = self.last_index();
        let window_ticks = if step_secs > 0.0 {
            ((self.end_time - self.start_time) / step_secs).floor() as usize
        } else {
            0
        };
        if window_ticks == 0 {
            return remaining.max(1);
        }
        remaining.div_ceil(window_ticks).max(1)
    }

    /// Prepare a new traversal, going backwards when `reversed` is set.
    pub fn restart(&mut self, reversed: bool) {
        if reversed != self.reversed {
            self.samples.reverse();
            self.reversed = reversed;
        }
        self.index = 0;
        self.state = MotionState::Idle;
    }

    /// Advance on a scheduler tick at `elapsed` seconds into the repetition.
    ///
    /// Returns the new position when the node moved this tick. The first due
    /// tick places the node on the first sample; later ticks step forward,
    /// and once `end_time` passes the node is pinned to the last sample.
    pub fn advance(&mut self, elapsed: f64, step_secs: f64) -> Option<Position> {
        match self.state {
            MotionState::Arrived => return None,
            MotionState::Idle => {
                if elapsed < self.start_time {
                    return None;
                }
                self.index = 0;
                self.state = MotionState::Moving;
            }
            MotionState::Moving => {
                self.index = if elapsed >= self.end_time {
                    self.last_index()
                } else {
                    (self.index + self.stride(step_secs)).min(self.last_index())
                };
            }
        }

        if self.index == self.last_index() {
            self.state = MotionState::Arrived;
        }
        log::trace!("Node {} at sample {}/{}", self.node_id, self.index, self.last_index());
        Some(self.current_position())
    }
}
