//! Type definitions for the simulation.
//!
//! Contains the data structures shared by every simulation component:
//! - Node identity, radios and the live (lock-guarded) position
//! - 3D positions and their `"x,y,z"` textual form
//! - Per-node aggregate link parameters produced by the link-quality engine

use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

/// Identity of a node inside one simulation context.
pub type NodeId = u32;

/// Receiver sensitivity (dBm) used to derive a radio's range when the scene
/// does not configure one explicitly.
pub const DEFAULT_SENSITIVITY_DBM: f64 = -91.0;

/// Largest absolute coordinate (meters) accepted for a position.
pub const MAX_COORDINATE: f64 = 1_000_000.0;

/// Point in 3D world space (meters).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Every coordinate is finite and within [`MAX_COORDINATE`] of the origin.
    pub fn is_in_bounds(&self) -> bool {
        [self.x, self.y, self.z].iter().all(|c| c.is_finite() && c.abs() <= MAX_COORDINATE)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// Error for malformed `"x,y,z"` coordinate strings.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionParseError {
    pub input: String,
    pub reason: String,
}

impl fmt::Display for PositionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid position '{}': {}", self.input, self.reason)
    }
}

impl std::error::Error for PositionParseError {}

impl FromStr for Position {
    type Err = PositionParseError;

    /// Parses `"x,y"` or `"x,y,z"`; a missing z coordinate is 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: String| PositionParseError {
            input: s.to_string(),
            reason,
        };

        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(fail(format!("expected 2 or 3 comma-separated coordinates, got {}", parts.len())));
        }

        let mut coords = [0.0_f64; 3];
        for (slot, part) in coords.iter_mut().zip(&parts) {
            let value: f64 = part.parse().map_err(|_| fail(format!("'{part}' is not a number")))?;
            if !value.is_finite() {
                return Err(fail(format!("'{part}' is not a finite number")));
            }
            if value.abs() > MAX_COORDINATE {
                return Err(fail(format!("'{part}' exceeds the ±{MAX_COORDINATE} m coordinate bound")));
            }
            *slot = value;
        }

        Ok(Position::new(coords[0], coords[1], coords[2]))
    }
}

/// One radio interface of a node and its physical parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Radio {
    /// Interface name inside the node's namespace (e.g. `sensor1-pan0`).
    pub interface: String,
    /// Range threshold in meters used for the edge test.
    pub range: f64,
    /// Transmit power (dBm).
    pub tx_power: f64,
    /// Antenna gain (dBi).
    pub antenna_gain: f64,
    /// Antenna height above ground (meters).
    pub antenna_height: f64,
    /// Carrier frequency (GHz).
    pub frequency: f64,
}

/// A wireless node registered in the simulation context.
///
/// Identity and radios are immutable after registration. The position is the
/// only field mutated while a session runs; its writer is the mobility advance
/// loop, readers are the link-quality evaluations on both loops.
#[derive(Debug)]
pub struct Node {
    pub node_id: NodeId,
    pub name: String,
    /// Network namespace the node's commands run in; `None` runs them in the
    /// caller's namespace.
    pub namespace: Option<String>,
    /// Identifier of the node's radio inside the hardware simulator.
    pub hwsim_id: u32,
    pub radios: Vec<Radio>,
    position: RwLock<Position>,
}

impl Node {
    pub fn new(node_id: NodeId, name: impl Into<String>, position: Position, radios: Vec<Radio>) -> Self {
        Self {
            node_id,
            name: name.into(),
            namespace: None,
            hwsim_id: node_id,
            radios,
            position: RwLock::new(position),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_hwsim_id(mut self, hwsim_id: u32) -> Self {
        self.hwsim_id = hwsim_id;
        self
    }

    pub fn position(&self) -> Position {
        *self.position.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_position(&self, position: Position) {
        *self.position.write().unwrap_or_else(PoisonError::into_inner) = position;
    }

    pub fn radio(&self, radio_index: usize) -> Option<&Radio> {
        self.radios.get(radio_index)
    }

    /// Range threshold of the given radio; a node without that radio reaches
    /// nothing beyond its own position.
    pub fn range(&self, radio_index: usize) -> f64 {
        self.radio(radio_index).map_or(0.0, |r| r.range)
    }

    pub fn interface(&self, radio_index: usize) -> Option<&str> {
        self.radio(radio_index).map(|r| r.interface.as_str())
    }
}

/// Per-node impairment averaged over all currently active edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateLinkParams {
    pub bandwidth_mbit: f64,
    pub loss_percent: f64,
    pub latency_ms: f64,
    pub active_edges: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_and_two_coordinates() {
        assert_eq!("10,50,0".parse::<Position>().unwrap(), Position::new(10.0, 50.0, 0.0));
        assert_eq!(" 1.5 , -2 ".parse::<Position>().unwrap(), Position::new(1.5, -2.0, 0.0));
    }

    #[test]
    fn rejects_malformed_coordinates() {
        assert!("10".parse::<Position>().is_err());
        assert!("1,2,3,4".parse::<Position>().is_err());
        assert!("a,b,c".parse::<Position>().is_err());
        assert!("1,,3".parse::<Position>().is_err());
        assert!("1,inf,3".parse::<Position>().is_err());

        let err = "1,x,3".parse::<Position>().unwrap_err();
        assert!(err.to_string().contains("'x' is not a number"));
    }

    #[test]
    fn rejects_coordinates_beyond_world_bound() {
        assert!("1000000,-1000000,0".parse::<Position>().is_ok());
        let err = "1e300,0".parse::<Position>().unwrap_err();
        assert!(err.reason.contains("exceeds"), "{err}");
        assert!("0,0,-1000000.5".parse::<Position>().is_err());

        assert!(Position::new(MAX_COORDINATE, 0.0, 0.0).is_in_bounds());
        assert!(!Position::new(0.0, -1e9, 0.0).is_in_bounds());
        assert!(!Position::new(f64::NAN, 0.0, 0.0).is_in_bounds());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let p = Position::new(3.0, 4.5, -1.0);
        assert_eq!(p.to_string().parse::<Position>().unwrap(), p);
    }

    #[test]
    fn missing_radio_has_zero_range() {
        let node = Node::new(1, "sensor1", Position::default(), Vec::new());
        assert_eq!(node.range(0), 0.0);
        assert!(node.interface(0).is_none());
    }
}
